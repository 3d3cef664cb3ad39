//! Tier 1: deterministic text grammar for the two known document layouts.
//!
//! 1. **Land-registry excerpt**: sections delimited by `** B ***` (ownership)
//!    and `** C ***` (encumbrances). Owners follow `ANTEIL:` lines, with a
//!    `GEB: … ADR: …` line underneath; creditors are `für …` lines in C.
//! 2. **Professional appraisal**: a cover page naming the
//!    `Verpflichtete Partei` (owner) and `Betreibende Partei` (creditor),
//!    either inline (`name, street, postal city`) or one item per line.
//!
//! The grammar prefers precision over recall: a line that could be a notary,
//! a court, a representative or a file reference is dropped, not guessed.

use crate::config::KeywordRules;
use crate::record::ExtractionCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Separator between joint owners in `owner_name`.
pub const OWNER_SEPARATOR: &str = " / ";

/// Lines scanned after an `ANTEIL:` line for the owner's name.
const SHARE_NAME_WINDOW: usize = 8;
/// Lines scanned after the owner's name for the address line.
const SHARE_ADDRESS_WINDOW: usize = 3;
/// Lines scanned after a party-role label.
const PARTY_WINDOW: usize = 12;

// ── Land-registry markers ────────────────────────────────────────────────

static RE_SECTION_B: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\*{2,}\s*B\s*\*{2,}").unwrap());
static RE_SECTION_C: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\*{2,}\s*C\s*\*{2,}").unwrap());
static RE_SECTION_C_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\*{2,}\s*(?:HINWEIS\b|D\s*\*{2,})|\bHINWEIS\b").unwrap()
});
static RE_SHARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bANTEIL\s*:").unwrap());
static RE_CONTINUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\d|[a-z]\s+\d)").unwrap());
static RE_FIELD_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:GEB|ADR)\s*:").unwrap());
static RE_DECORATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\*.*|[\-=_~.\s]+)$").unwrap());
static RE_PAGE_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:seite|page)\s+\d+\s+(?:von|of)\s+\d+\b").unwrap());

static RE_ADR_WITH_BIRTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)GEB:\s*(\d{4}-\d{2}-\d{2})\s+ADR:\s*(.+?)\s{2,}(\d{4,5})\s*$").unwrap()
});
static RE_ADR_WITH_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ADR:\s*(.+?)\s{2,}(\d{4,5})\s*$").unwrap());
static RE_ADR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ADR:\s*(.+)").unwrap());
static RE_TRAILING_POSTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+(\d{4,5})\s*$").unwrap());
static RE_BIRTH_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)GEB:\s*(\d{4}-\d{2}-\d{2})").unwrap());

static RE_FOR_CREDITOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^f(?:ü|ue)r\s+(.+)").unwrap());
static RE_CLAIM_RECOVERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Hereinbringung\s+von\s+(EUR\s*[\d.,]+(?:-{1,2})?)").unwrap()
});
static RE_CLAIM_MAXIMUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)H(?:ö|oe)chstbetrag\s+(EUR\s*[\d.,]+(?:-{1,2})?)").unwrap()
});

// ── Appraisal party labels ───────────────────────────────────────────────

static RE_OBLIGATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*Verpflichtete(?:\s+Partei(?:en)?)?[ \t]*(?::|$)").unwrap());
static RE_PURSUING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[ \t]*Betreibende(?:\s+Partei(?:en)?)?[ \t]*(?::|$)").unwrap());
static RE_OTHER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:betreibende|verpflichtete|auftraggeber|gericht|gegenstand|bewertungsstichtag|liegenschaft)\b")
        .unwrap()
});
static RE_REPRESENTED_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)vertreten\s+durch").unwrap());
static RE_INLINE_PARTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<name>[^,]+),\s*(?P<street>[^,]*\d[^,]*),\s*(?P<postal>(?:[A-Z]{2}[- ]?)?\d{4,5}\s+\p{L}.*)$",
    )
    .unwrap()
});
static RE_POSTAL_CITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]{2}[- ]?)?\d{4,5}\s+\p{L}[\p{L}\s.\-/()]*$").unwrap()
});
static RE_STREET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\p{L}[\p{L}\s.\-']*\s\d+").unwrap());
static RE_REGISTRY_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:FN|ZVR|HRB|HRA)\s*\d").unwrap());
static RE_FILE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:gz|az|aktenzeichen|gesch(?:ä|ae)ftszahl)\b[:.\s])|^\d+\s*[a-z]{1,3}\s*\d+/\d+")
        .unwrap()
});
static RE_BIRTH_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bgeb(?:\.|oren|:)?\s*(?:am\s*)?\d{1,4}[.\-/]\s*\d{1,2}[.\-/]\s*\d{2,4}").unwrap()
});

/// One owner parsed from Section B.
#[derive(Debug, Default, Clone)]
struct ShareOwner {
    name: String,
    address: String,
    postal: String,
    birthdate: String,
}

/// A party block from an appraisal cover page.
#[derive(Debug, Default, Clone, PartialEq)]
struct PartyBlock {
    name: String,
    street: String,
    postal_city: String,
}

/// Tier 1 extractor. Holds the keyword rules it was built with.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    rules: KeywordRules,
}

impl PatternExtractor {
    pub fn new(rules: KeywordRules) -> Self {
        Self { rules }
    }

    /// Parse the full page text. Returns an all-empty candidate when neither
    /// layout is recognised.
    pub fn extract(&self, text: &str) -> ExtractionCandidate {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut out = ExtractionCandidate::default();

        if let Some(section_b) = find_section(&text, &RE_SECTION_B, &RE_SECTION_C) {
            let owners = parse_share_owners(section_b);
            if let Some(primary) = owners.first() {
                let mut names: Vec<&str> = Vec::new();
                for o in &owners {
                    if !names.contains(&o.name.as_str()) {
                        names.push(&o.name);
                    }
                }
                out.owner_name = names.join(OWNER_SEPARATOR);
                out.owner_address.clone_from(&primary.address);
                out.owner_postal_city.clone_from(&primary.postal);
                out.owner_birthdate.clone_from(&primary.birthdate);
                debug!("Section B: {} owner(s)", owners.len());
            }
        }

        if let Some(section_c) = find_section(&text, &RE_SECTION_C, &RE_SECTION_C_END) {
            let (creditors, claim) = parse_encumbrances(section_c);
            for c in &creditors {
                out.creditors.push(c);
            }
            out.claim_amount = claim;
        }

        if out.owner_name.is_empty() {
            if let Some(party) = self.parse_obligated_party(&text) {
                debug!("Appraisal cover: obligated party found");
                out.owner_name = party.name;
                out.owner_address = party.street;
                out.owner_postal_city = party.postal_city;
            }
        }

        if out.creditors.is_empty() {
            if let Some(creditor) = self.parse_pursuing_party(&text) {
                out.creditors.push(&creditor);
            }
        }

        out
    }

    // ── Appraisal layout ─────────────────────────────────────────────────

    fn parse_obligated_party(&self, text: &str) -> Option<PartyBlock> {
        RE_OBLIGATED
            .find_iter(text)
            .find_map(|m| self.parse_party_block(text, m.end()))
    }

    fn parse_party_block(&self, text: &str, start: usize) -> Option<PartyBlock> {
        let (remainder, following) = split_marker_line(text, start);

        if let Some(caps) = RE_INLINE_PARTY.captures(remainder) {
            let name = caps["name"].trim();
            if self.is_plausible_party_name(name) {
                return Some(PartyBlock {
                    name: name.to_string(),
                    street: caps["street"].trim().to_string(),
                    postal_city: caps["postal"].trim().to_string(),
                });
            }
        }

        #[derive(PartialEq)]
        enum Stage {
            Name,
            Street,
            Postal,
        }

        let mut block = PartyBlock::default();
        let mut stage = Stage::Name;
        let lines = std::iter::once(remainder).chain(following.lines().take(PARTY_WINDOW));

        'lines: for (i, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if i > 0 && (RE_OTHER_LABEL.is_match(line) || RE_PURSUING.is_match(line)) {
                break;
            }
            for segment in line.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match stage {
                    Stage::Name => {
                        if self.is_plausible_party_name(segment) {
                            block.name = segment.to_string();
                            stage = Stage::Street;
                        }
                    }
                    Stage::Street | Stage::Postal => {
                        if RE_POSTAL_CITY.is_match(segment) {
                            block.postal_city = segment.to_string();
                            break 'lines;
                        }
                        if stage == Stage::Street && is_street(segment) {
                            block.street = segment.to_string();
                            stage = Stage::Postal;
                        }
                    }
                }
            }
        }

        (!block.name.is_empty()).then_some(block)
    }

    fn parse_pursuing_party(&self, text: &str) -> Option<String> {
        RE_PURSUING
            .find_iter(text)
            .find_map(|m| self.parse_creditor_block(text, m.end()))
    }

    fn parse_creditor_block(&self, text: &str, start: usize) -> Option<String> {
        let (remainder, following) = split_marker_line(text, start);
        let mut skip_representative = false;

        for (i, line) in std::iter::once(remainder)
            .chain(following.lines().take(PARTY_WINDOW))
            .enumerate()
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if i > 0 && (RE_OBLIGATED.is_match(line) || RE_OTHER_LABEL.is_match(line)) {
                break;
            }
            if let Some(m) = RE_REPRESENTED_BY.find(line) {
                let before = line[..m.start()].trim().trim_end_matches(',').trim();
                if self.is_plausible_creditor(before) {
                    return Some(before.to_string());
                }
                let after = line[m.end()..].trim_matches(|c: char| c == ':' || c.is_whitespace());
                skip_representative = after.is_empty();
                continue;
            }
            if skip_representative {
                skip_representative = false;
                continue;
            }
            let head = line.split(',').next().unwrap_or(line).trim();
            if self.is_plausible_creditor(head) {
                return Some(head.to_string());
            }
        }
        None
    }

    fn is_plausible_party_name(&self, line: &str) -> bool {
        let line = line.trim();
        let Some(first) = line.chars().next() else {
            return false;
        };
        if !line.chars().any(char::is_alphabetic) {
            return false;
        }
        if first.is_lowercase() || ",;:)]/&+-".contains(first) {
            return false;
        }
        if line.ends_with('-') || line.chars().count() < 3 || line.chars().count() > 120 {
            return false;
        }
        let lower = line.to_lowercase();
        if matches!(lower.as_str(), "und" | "sowie" | "partei") || lower.contains("partei") {
            return false;
        }
        !(self.rules.mentions_non_party(&lower)
            || RE_REPRESENTED_BY.is_match(line)
            || RE_FILE_REFERENCE.is_match(line)
            || RE_PAGE_FOOTER.is_match(line)
            || RE_POSTAL_CITY.is_match(line)
            || RE_REGISTRY_NUMBER.is_match(line)
            || RE_BIRTH_FRAGMENT.is_match(line))
    }

    fn is_plausible_creditor(&self, line: &str) -> bool {
        if !self.is_plausible_party_name(line) || is_street(line) {
            return false;
        }
        let lower = line.to_lowercase();
        !(self.rules.mentions_court_officer(&lower) || self.rules.mentions_owner_association(&lower))
    }
}

/// Text between the start marker and the end marker (or the end of text).
fn find_section<'a>(text: &'a str, start: &Regex, end: &Regex) -> Option<&'a str> {
    let m = start.find(text)?;
    let rest = &text[m.end()..];
    let stop = end.find(rest).map(|e| e.start()).unwrap_or(rest.len());
    Some(&rest[..stop])
}

/// Split at a label: the rest of the label's line, and everything after it.
fn split_marker_line(text: &str, start: usize) -> (&str, &str) {
    let rest = &text[start..];
    match rest.find('\n') {
        Some(nl) => (rest[..nl].trim(), &rest[nl + 1..]),
        None => (rest.trim(), ""),
    }
}

fn is_street(segment: &str) -> bool {
    RE_STREET.is_match(segment)
        && !RE_POSTAL_CITY.is_match(segment)
        && !RE_REGISTRY_NUMBER.is_match(segment)
        && !RE_BIRTH_FRAGMENT.is_match(segment)
}

fn is_share_noise(line: &str) -> bool {
    RE_CONTINUATION.is_match(line)
        || RE_FIELD_LABEL.is_match(line)
        || RE_DECORATIVE.is_match(line)
        || RE_PAGE_FOOTER.is_match(line)
}

fn parse_share_owners(section_b: &str) -> Vec<ShareOwner> {
    let lines: Vec<&str> = section_b.lines().collect();
    let mut owners = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !RE_SHARE.is_match(line) {
            continue;
        }
        let window_end = (i + 1 + SHARE_NAME_WINDOW).min(lines.len());
        for j in (i + 1)..window_end {
            let candidate = lines[j].trim();
            if candidate.is_empty() {
                continue;
            }
            if RE_SHARE.is_match(candidate) {
                break;
            }
            if is_share_noise(candidate) {
                continue;
            }

            let mut owner = ShareOwner {
                name: candidate.to_string(),
                ..Default::default()
            };
            let addr_end = (j + 1 + SHARE_ADDRESS_WINDOW).min(lines.len());
            for adr_line in lines[(j + 1)..addr_end].iter().map(|l| l.trim()) {
                if adr_line.is_empty() {
                    continue;
                }
                if RE_SHARE.is_match(adr_line) {
                    break;
                }
                if parse_address_line(adr_line, &mut owner) {
                    break;
                }
            }
            owners.push(owner);
            break;
        }
    }
    owners
}

/// Fill address fields from a `GEB:`/`ADR:` line. Returns whether it matched.
fn parse_address_line(line: &str, owner: &mut ShareOwner) -> bool {
    if let Some(c) = RE_ADR_WITH_BIRTH.captures(line) {
        owner.birthdate = c[1].to_string();
        owner.address = c[2].trim().trim_end_matches(',').to_string();
        owner.postal = c[3].to_string();
        return true;
    }
    if let Some(c) = RE_ADR_WITH_POSTAL.captures(line) {
        owner.address = c[1].trim().trim_end_matches(',').to_string();
        owner.postal = c[2].to_string();
        if let Some(b) = RE_BIRTH_ONLY.captures(line) {
            owner.birthdate = b[1].to_string();
        }
        return true;
    }
    if let Some(c) = RE_ADR.captures(line) {
        let raw = c[1].trim();
        match RE_TRAILING_POSTAL.captures(raw) {
            Some(p) => {
                let start = p.get(0).map_or(raw.len(), |m| m.start());
                owner.address = raw[..start].trim().trim_end_matches(',').to_string();
                owner.postal = p[1].to_string();
            }
            None => owner.address = raw.to_string(),
        }
        if let Some(b) = RE_BIRTH_ONLY.captures(line) {
            owner.birthdate = b[1].to_string();
        }
        return true;
    }
    false
}

fn parse_encumbrances(section_c: &str) -> (Vec<String>, String) {
    let lines: Vec<&str> = section_c.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut creditors: Vec<String> = Vec::new();

    for line in &lines {
        if let Some(c) = RE_FOR_CREDITOR.captures(line) {
            let name = c[1].trim().trim_end_matches('.').trim().to_string();
            if name.chars().count() > 5 && !creditors.contains(&name) {
                creditors.push(name);
            }
        }
    }

    let claim = [&*RE_CLAIM_RECOVERY, &*RE_CLAIM_MAXIMUM]
        .iter()
        .find_map(|re| lines.iter().find_map(|l| re.captures(l)))
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();

    (creditors, claim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> PatternExtractor {
        PatternExtractor::new(KeywordRules::default())
    }

    const LAND_REGISTRY: &str = "** B ***\n1 ANTEIL: 1/1\n     Maria Muster\n     GEB: 1975-03-02 ADR: Hauptstraße 5, Graz   8010\n** C ***\nfür Bank X AG\nHereinbringung von EUR 150.000,--\n** HINWEIS ***";

    #[test]
    fn land_registry_single_owner() {
        let c = extractor().extract(LAND_REGISTRY);
        assert_eq!(c.owner_name, "Maria Muster");
        assert_eq!(c.owner_address, "Hauptstraße 5, Graz");
        assert_eq!(c.owner_postal_city, "8010");
        assert_eq!(c.owner_birthdate, "1975-03-02");
        assert_eq!(c.creditors.iter().collect::<Vec<_>>(), vec!["Bank X AG"]);
        assert_eq!(c.claim_amount, "EUR 150.000,--");
    }

    #[test]
    fn land_registry_joint_owners_take_first_address() {
        let text = "**** B ****\n\
            1 ANTEIL: 1/2\n     Maria Muster\n     GEB: 1975-03-02 ADR: Hauptstraße 5, Graz   8010\n\
            \x20  a 7321/2006 Kaufvertrag\n\
            2 ANTEIL: 1/2\n     Seite 2 von 4\n     Hans Muster\n     GEB: 1970-01-01 ADR: Bahnhofweg 9, Linz   4020\n\
            3 ANTEIL: 1/4\n     Maria Muster\n\
            **** C ****\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Maria Muster / Hans Muster");
        assert_eq!(c.owner_postal_city, "8010");
        assert_eq!(c.owner_birthdate, "1975-03-02");
    }

    #[test]
    fn land_registry_address_without_birthdate() {
        let text = "** b **\n1 ANTEIL: 1/1\n  Muster Immobilien GmbH\n  ADR: Ringstraße 1   1010\n** c **\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Muster Immobilien GmbH");
        assert_eq!(c.owner_address, "Ringstraße 1");
        assert_eq!(c.owner_postal_city, "1010");
        assert!(c.owner_birthdate.is_empty());
    }

    #[test]
    fn maximum_amount_is_the_fallback_claim() {
        let text = "** C ***\nPFANDRECHT Höchstbetrag EUR 80.000,--\nfür Sparkasse Kärnten AG\n** HINWEIS ***";
        let c = extractor().extract(text);
        assert_eq!(c.claim_amount, "EUR 80.000,--");
        assert_eq!(c.creditors.first(), Some("Sparkasse Kärnten AG"));
    }

    #[test]
    fn short_for_lines_are_not_creditors() {
        let text = "** C ***\nfür FN 1\nfür Bank X AG\nfür Bank X AG\n** HINWEIS ***";
        let c = extractor().extract(text);
        assert_eq!(c.creditors.len(), 1);
    }

    #[test]
    fn appraisal_inline_party() {
        let text = "Gutachten\nVerpflichtete Partei: Franz Beispiel, Lindengasse 3, 1070 Wien\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Franz Beispiel");
        assert_eq!(c.owner_address, "Lindengasse 3");
        assert_eq!(c.owner_postal_city, "1070 Wien");
    }

    #[test]
    fn capitalised_party_labels() {
        let text = "VERPFLICHTETE PARTEI: Franz Beispiel, Lindengasse 3, 1070 Wien\n\
            BETREIBENDE PARTEI: Bank Y AG\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Franz Beispiel");
        assert_eq!(c.owner_postal_city, "1070 Wien");
        assert_eq!(c.creditors.first(), Some("Bank Y AG"));
    }

    #[test]
    fn appraisal_party_one_item_per_line() {
        let text = "Verpflichtete Partei:\n\
            GZ 12 E 345/23\n\
            Dr. Franz Beispiel\n\
            geb. 01.02.1960\n\
            Lindengasse 3/2/7\n\
            DE-80331 München\n\
            Betreibende Partei:\n\
            Bank Y AG\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Dr. Franz Beispiel");
        assert_eq!(c.owner_address, "Lindengasse 3/2/7");
        assert_eq!(c.owner_postal_city, "DE-80331 München");
        assert_eq!(c.creditors.first(), Some("Bank Y AG"));
    }

    #[test]
    fn appraisal_party_rejects_attorney_lines() {
        let text = "Verpflichtete Partei\nvertreten durch Rechtsanwalt Dr. Huber\nMaria Beispiel\nHauptplatz 1, 8010 Graz\n";
        let c = extractor().extract(text);
        assert_eq!(c.owner_name, "Maria Beispiel");
        assert_eq!(c.owner_address, "Hauptplatz 1");
        assert_eq!(c.owner_postal_city, "8010 Graz");
    }

    #[test]
    fn pursuing_party_skips_representative() {
        let text = "Betreibende Partei:\nvertreten durch:\nDr. Hans Huber\nRaiffeisenbank Graz eGen\nVerpflichtete Partei: Franz Beispiel\n";
        let c = extractor().extract(text);
        assert_eq!(c.creditors.first(), Some("Raiffeisenbank Graz eGen"));
        assert_eq!(c.owner_name, "Franz Beispiel");
    }

    #[test]
    fn pursuing_party_before_representative_on_same_line() {
        let text = "Betreibende Partei: Sparkasse Wien AG, vertreten durch Dr. Anwalt\n";
        let c = extractor().extract(text);
        assert_eq!(c.creditors.first(), Some("Sparkasse Wien AG"));
    }

    #[test]
    fn pursuing_party_rejects_officers_and_associations() {
        let text = "Betreibende Partei:\nGerichtsvollzieher Maier\nEigentümergemeinschaft EZ 123 KG Graz\nWohnbau Bank AG\n";
        let c = extractor().extract(text);
        assert_eq!(c.creditors.first(), Some("Wohnbau Bank AG"));
    }

    #[test]
    fn unknown_layout_yields_empty() {
        let c = extractor().extract("Sehr geehrte Damen und Herren,\nanbei das Protokoll.");
        assert!(c.is_empty());
    }

    #[test]
    fn running_text_mention_is_not_a_label() {
        let c = extractor().extract("die verpflichtete Partei hat nicht reagiert.\n");
        assert!(c.owner_name.is_empty());
    }
}

//! Result validation: deterministic cleanup of extraction candidates.
//!
//! Every tier, including the pattern grammar, produces artefacts: a page
//! footer glued to a name, a birthdate the model copied into the owner field,
//! a phone number trailing the street, the notary listed among creditors.
//! The rules here remove them without consulting any tier.
//!
//! Each field is cleaned to a fixed point, so running [`Validator::validate`]
//! on its own output never changes anything.

use crate::config::KeywordRules;
use crate::record::{CreditorList, ExtractionCandidate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Upper bound on cleanup passes per field. Every rule only ever shortens
/// the value, so this is never reached in practice.
const MAX_PASSES: usize = 8;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static RE_COURT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:bezirks|landes|handels|oberlandes|straf|zivil)gerichts?\b|\bgericht\b|\boberster\s+gerichtshof\b|\bexekutionsgericht\b",
    )
    .unwrap()
});
static RE_NAME_BIRTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[,;\s]*\(?\s*\bgeb(?:\.|oren|:)?\s*(?:am\s*)?\d{1,4}[.\-/]\s*\d{1,2}[.\-/]\s*\d{2,4}\s*\)?",
    )
    .unwrap()
});
static RE_TRAILING_ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;\s]+\d{4}-\d{2}-\d{2}\s*$").unwrap());
static RE_PAGE_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\b(?:seite|page)\s+\d+\s+(?:von|of)\s+\d+\b").unwrap());

static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[,;\s]*\b(?:tel(?:efon)?|phone|fax|mobil)\b\.?\s*:?.*$").unwrap()
});
static RE_LEADING_POSTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]{2}[- ]?)?\d{4,5}\s+[^,\d]+,\s*(.+)$").unwrap()
});
static RE_CITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\p{Lu}[\p{L}.\-]+(?:\s+\p{Lu}[\p{L}.\-]+)?$").unwrap()
});
static RE_UNIT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:stiege|stg|top|t(?:ü|ue)r|haus|block|stock|dg|og|eg)\b").unwrap()
});

static RE_LAND_REGISTRY_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:EZ|KG|GB|BLNR|TZ)\s*\d+").unwrap());
static RE_FILE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:gz|az|aktenzeichen|gesch(?:ä|ae)ftszahl)\b[:.\s]|^\d+\s*[a-z]{1,3}\s*\d+/\d+")
        .unwrap()
});
static RE_BIRTH_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bgeb(?:\.|oren|:)?\s*(?:am\s*)?\d").unwrap());

/// Whether `value` is a court's name rather than a person or company.
///
/// Court names ended up in the owner field of older records; the sweep uses
/// this to find and clear them.
pub fn looks_like_court_name(value: &str) -> bool {
    RE_COURT_NAME.is_match(value)
}

/// Pure candidate cleaner.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: KeywordRules,
}

impl Validator {
    pub fn new(rules: KeywordRules) -> Self {
        Self { rules }
    }

    /// Clean every field of `candidate`. Never fails; rejected values become
    /// empty strings.
    pub fn validate(&self, candidate: &ExtractionCandidate) -> ExtractionCandidate {
        let out = ExtractionCandidate {
            owner_name: fixed_point(&candidate.owner_name, |s| self.clean_name_once(s)),
            owner_address: fixed_point(&candidate.owner_address, |s| self.clean_address_once(s)),
            owner_postal_city: self.clean_plain(&candidate.owner_postal_city),
            owner_birthdate: collapse(&candidate.owner_birthdate),
            creditors: self.clean_creditors(&candidate.creditors),
            claim_amount: self.clean_plain(&candidate.claim_amount),
        };
        if out != *candidate {
            debug!(
                "Validator changed candidate (owner: {:?} → {:?}, creditors: {} → {})",
                candidate.owner_name,
                out.owner_name,
                candidate.creditors.len(),
                out.creditors.len()
            );
        }
        out
    }

    fn clean_name_once(&self, name: &str) -> String {
        let s = RE_NAME_BIRTH.replace_all(name, "");
        let s = RE_TRAILING_ISO_DATE.replace(&s, "");
        let s = RE_PAGE_FOOTER.replace_all(&s, "");
        let s = trim_separators(&collapse(&s));

        if s.is_empty()
            || self.rules.is_placeholder(&s)
            || s.starts_with([')', ']'])
            || s.ends_with('-')
            || !has_letter(&s)
            || looks_like_court_name(&s)
            || self.rules.mentions_non_party(&s.to_lowercase())
        {
            return String::new();
        }
        s
    }

    fn clean_address_once(&self, address: &str) -> String {
        let s = RE_PHONE.replace(address, "");
        let mut s = trim_separators(&collapse(&s));

        if let Some(c) = RE_LEADING_POSTAL.captures(&s) {
            s = c[1].trim().to_string();
        }

        // "Hauptstraße 5, Graz": the part after the last comma is a bare city.
        if let Some((head, tail)) = s.rsplit_once(',') {
            if looks_like_city(tail.trim()) && head.chars().any(|c| c.is_ascii_digit()) {
                s = trim_separators(head);
            }
        }

        if self.rules.is_placeholder(&s) || !has_letter(&s) {
            return String::new();
        }
        s
    }

    fn clean_plain(&self, value: &str) -> String {
        let s = trim_separators(&collapse(value));
        if self.rules.is_placeholder(&s) {
            String::new()
        } else {
            s
        }
    }

    fn clean_creditors(&self, creditors: &CreditorList) -> CreditorList {
        let mut out = CreditorList::new();
        for raw in creditors.iter() {
            let name = trim_separators(&collapse(raw));
            if let Some(reason) = self.creditor_rejection(&name) {
                debug!("Dropping creditor {:?}: {}", name, reason);
                continue;
            }
            out.push(&name);
        }
        out
    }

    fn creditor_rejection(&self, name: &str) -> Option<&'static str> {
        let lower = name.to_lowercase();
        if !has_letter(name) {
            Some("no letters")
        } else if self.rules.is_placeholder(name) {
            Some("placeholder")
        } else if self.rules.mentions_non_party(&lower) {
            Some("expert, guardian or attorney")
        } else if self.rules.mentions_owner_association(&lower) && RE_LAND_REGISTRY_REF.is_match(name) {
            Some("owner association with registry reference")
        } else if self.rules.mentions_court_officer(&lower) {
            Some("court officer")
        } else if looks_like_court_name(name) {
            Some("court")
        } else if RE_FILE_REFERENCE.is_match(name) {
            Some("file reference")
        } else if RE_BIRTH_MENTION.is_match(name) {
            Some("co-owner with birthdate")
        } else if self.rules.mentions_hospitality(&lower) {
            Some("hospitality business")
        } else {
            None
        }
    }
}

fn fixed_point(value: &str, step: impl Fn(&str) -> String) -> String {
    let mut current = collapse(value);
    for _ in 0..MAX_PASSES {
        let next = step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn collapse(value: &str) -> String {
    RE_WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

fn trim_separators(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c: char| c == ',' || c == ';' || c == ':')
        .trim()
        .to_string()
}

/// One or two capitalised words that are not a staircase or door token.
fn looks_like_city(value: &str) -> bool {
    RE_CITY.is_match(value) && !RE_UNIT_TOKEN.is_match(value)
}

fn has_letter(value: &str) -> bool {
    value.chars().any(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::patterns::PatternExtractor;

    fn validator() -> Validator {
        Validator::new(KeywordRules::default())
    }

    fn candidate(name: &str, address: &str) -> ExtractionCandidate {
        ExtractionCandidate {
            owner_name: name.into(),
            owner_address: address.into(),
            ..Default::default()
        }
    }

    #[test]
    fn land_registry_excerpt_end_to_end() {
        let text = "** B ***\n1 ANTEIL: 1/1\n     Maria Muster\n     GEB: 1975-03-02 ADR: Hauptstraße 5, Graz   8010\n** C ***\nfür Bank X AG\nHereinbringung von EUR 150.000,--\n** HINWEIS ***";
        let raw = PatternExtractor::new(KeywordRules::default()).extract(text);
        let c = validator().validate(&raw);
        assert_eq!(c.owner_name, "Maria Muster");
        assert_eq!(c.owner_address, "Hauptstraße 5");
        assert_eq!(c.owner_postal_city, "8010");
        assert_eq!(c.creditors.iter().collect::<Vec<_>>(), vec!["Bank X AG"]);
        assert_eq!(c.claim_amount, "EUR 150.000,--");
    }

    #[test]
    fn appraisal_cover_end_to_end() {
        let raw = PatternExtractor::new(KeywordRules::default())
            .extract("Verpflichtete Partei: Franz Beispiel, Lindengasse 3, 1070 Wien");
        let c = validator().validate(&raw);
        assert_eq!(c.owner_name, "Franz Beispiel");
        assert_eq!(c.owner_address, "Lindengasse 3");
        assert_eq!(c.owner_postal_city, "1070 Wien");
    }

    #[test]
    fn placeholder_owner_is_emptied() {
        let c = validator().validate(&candidate("nicht angegeben", ""));
        assert!(c.owner_name.is_empty());
        assert!(!c.has_identity_data());

        let c = validator().validate(&candidate("Nicht angegeben", "Hauptstraße 5"));
        assert!(c.owner_name.is_empty());
        assert!(c.has_identity_data());
    }

    #[test]
    fn name_artifacts_are_rejected() {
        let v = validator();
        for bad in [") Maria Muster", "Muster-", "12345", "Bezirksgericht Graz-Ost", "Sachverständiger Ing. Maier"] {
            assert_eq!(v.validate(&candidate(bad, "")).owner_name, "", "{bad}");
        }
    }

    #[test]
    fn name_birthdate_and_footer_are_stripped() {
        let v = validator();
        assert_eq!(
            v.validate(&candidate("Maria Muster, geb. 02.03.1975", "")).owner_name,
            "Maria Muster"
        );
        assert_eq!(
            v.validate(&candidate("Maria Muster (geb. 1975-03-02) Seite 2 von 5", "")).owner_name,
            "Maria Muster"
        );
    }

    #[test]
    fn address_cleanup() {
        let v = validator();
        assert_eq!(
            v.validate(&candidate("", "Hauptstraße 5, Tel: 0316 123456")).owner_address,
            "Hauptstraße 5"
        );
        assert_eq!(
            v.validate(&candidate("", "8010 Graz, Hauptstraße 5")).owner_address,
            "Hauptstraße 5"
        );
        assert_eq!(
            v.validate(&candidate("", "Hauptstraße 5, Graz")).owner_address,
            "Hauptstraße 5"
        );
        // A comma inside the street part stays.
        assert_eq!(
            v.validate(&candidate("", "Hof 3, Stiege 2")).owner_address,
            "Hof 3, Stiege 2"
        );
        assert_eq!(
            v.validate(&candidate("", "Hauptplatz 1, Stiege A")).owner_address,
            "Hauptplatz 1, Stiege A"
        );
        assert_eq!(
            v.validate(&candidate("", "Lindengasse 3, Top B")).owner_address,
            "Lindengasse 3, Top B"
        );
        assert_eq!(
            v.validate(&candidate("", "Marktplatz 2, St. Pölten")).owner_address,
            "Marktplatz 2"
        );
    }

    #[test]
    fn creditor_filters() {
        let c = ExtractionCandidate {
            creditors: [
                "Raiffeisenbank Graz (FN 1234a)",
                "RAIFFEISENBANK GRAZ",
                "Rechtsanwalt Dr. Huber",
                "Eigentümergemeinschaft EZ 1234 KG 63101",
                "Eigentümergemeinschaft Lindengasse 3",
                "Gerichtsvollzieher Maier",
                "12 E 345/23",
                "Hans Muster geb. 01.01.1960",
                "Gasthof zur Post",
                "1234",
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let out = validator().validate(&c);
        assert_eq!(
            out.creditors.iter().collect::<Vec<_>>(),
            vec!["Raiffeisenbank Graz (FN 1234a)", "Eigentümergemeinschaft Lindengasse 3"]
        );
    }

    #[test]
    fn validate_is_idempotent() {
        let v = validator();
        let inputs = [
            ExtractionCandidate {
                owner_name: "  Maria   Muster , geb. 2.3.1975 Seite 1 von 3 ".into(),
                owner_address: "8010 Graz, Hauptstraße 5, Graz, Tel 0316 1".into(),
                owner_postal_city: " 8010  Graz ".into(),
                creditors: ["Bank X AG;", "bank x ag", "Notar Dr. Y"].into_iter().collect(),
                claim_amount: " unbekannt ".into(),
                ..Default::default()
            },
            candidate("n/a", "keine Angabe"),
            candidate("Franz Beispiel / Maria Beispiel", "Am Platz 1/2/3"),
        ];
        for input in inputs {
            let once = v.validate(&input);
            assert_eq!(v.validate(&once), once);
        }
    }

    #[test]
    fn court_name_detection() {
        assert!(looks_like_court_name("Bezirksgericht Leoben"));
        assert!(looks_like_court_name("LANDESGERICHT für ZRS Graz"));
        assert!(!looks_like_court_name("Gerhard Gerichtshofer"));
    }
}

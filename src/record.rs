//! Typed data model shared by every stage.
//!
//! The record store speaks in loosely-typed property bags; this module is
//! the typed side of that boundary. Mapping to and from the store's property
//! format lives entirely in [`crate::store`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Per-record analysis state. See [`crate::state`] for the allowed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Freshly ingested, or reset by the sweep. Eligible for analysis.
    #[default]
    NotAnalyzed,
    /// Owner name or address was found after validation.
    AnalyzedComplete,
    /// A parseable document existed but yielded no identity data.
    AnalyzedIncomplete,
    /// Terminal: no attachment, or a scanned document the vision tier could not read.
    Unreadable,
}

impl AnalysisStatus {
    /// Label stored in the record store's select property.
    pub fn label(self) -> &'static str {
        match self {
            AnalysisStatus::NotAnalyzed => "Nicht analysiert",
            AnalysisStatus::AnalyzedComplete => "Analysiert",
            AnalysisStatus::AnalyzedIncomplete => "Unvollständig",
            AnalysisStatus::Unreadable => "Nicht lesbar",
        }
    }

    /// Parse a stored label. An empty or unknown label means not analysed.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Analysiert" => AnalysisStatus::AnalyzedComplete,
            "Unvollständig" => AnalysisStatus::AnalyzedIncomplete,
            "Nicht lesbar" => AnalysisStatus::Unreadable,
            _ => AnalysisStatus::NotAnalyzed,
        }
    }
}

/// An auction record as read from the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub id: String,
    pub title: String,
    /// Public notice detail page.
    pub detail_url: Option<String>,
    pub status: AnalysisStatus,
    /// Human workflow phase; some phases are protected from automation.
    pub workflow_phase: Option<String>,
    pub owner_name: String,
    pub owner_address: String,
    pub owner_postal_city: String,
    /// Free-text diagnostic note.
    pub note: String,
}

/// A PDF attachment linked from a notice page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// Owner/creditor identity data extracted from one document.
///
/// Every field may be empty. Absence is always the empty string, never a
/// placeholder such as "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub owner_name: String,
    pub owner_address: String,
    pub owner_postal_city: String,
    /// Birthdate of the primary owner, when the land-registry excerpt has one.
    #[serde(default)]
    pub owner_birthdate: String,
    #[serde(default)]
    pub creditors: CreditorList,
    pub claim_amount: String,
}

impl ExtractionCandidate {
    /// Whether the candidate carries anything a letter could be addressed with.
    pub fn has_identity_data(&self) -> bool {
        !self.owner_name.is_empty() || !self.owner_address.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.owner_name.is_empty()
            && self.owner_address.is_empty()
            && self.owner_postal_city.is_empty()
            && self.owner_birthdate.is_empty()
            && self.creditors.is_empty()
            && self.claim_amount.is_empty()
    }

    /// Fill every empty field from `other`. Creditors are merged, keeping
    /// this candidate's order first.
    pub fn fill_missing_from(&mut self, other: &ExtractionCandidate) {
        // Owner fields travel together so a name from one tier never gets
        // paired with an address from another.
        if self.owner_name.is_empty() && self.owner_address.is_empty() {
            self.owner_name.clone_from(&other.owner_name);
            self.owner_address.clone_from(&other.owner_address);
            self.owner_postal_city.clone_from(&other.owner_postal_city);
            self.owner_birthdate.clone_from(&other.owner_birthdate);
        }
        for creditor in other.creditors.iter() {
            self.creditors.push(creditor);
        }
        if self.claim_amount.is_empty() {
            self.claim_amount.clone_from(&other.claim_amount);
        }
    }
}

static RE_PAREN_WITH_DIGIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\d[^)]*\)").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalised comparison key for a creditor name.
///
/// Parenthetical registry numbers (`(FN 123456a)`) are removed, case is
/// folded and whitespace collapsed, so `"Bank X AG (FN 1a)"` and
/// `"BANK X AG"` compare equal.
pub fn creditor_key(name: &str) -> String {
    let stripped = RE_PAREN_WITH_DIGIT.replace_all(name, " ");
    let collapsed = RE_WHITESPACE.replace_all(stripped.trim(), " ");
    collapsed
        .trim_end_matches(['.', ',', ';'])
        .trim()
        .to_lowercase()
}

/// Creditor names in first-seen order, de-duplicated by [`creditor_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CreditorList {
    entries: Vec<String>,
}

impl CreditorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` unless an entry with the same key exists.
    /// Returns whether it was added.
    pub fn push(&mut self, name: &str) -> bool {
        let name = name.trim();
        let key = creditor_key(name);
        if key.is_empty() || self.entries.iter().any(|e| creditor_key(e) == key) {
            return false;
        }
        self.entries.push(name.to_string());
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    /// Join with `sep` for single-valued store properties.
    pub fn join(&self, sep: &str) -> String {
        self.entries.join(sep)
    }
}

impl From<Vec<String>> for CreditorList {
    fn from(names: Vec<String>) -> Self {
        let mut list = CreditorList::new();
        for name in &names {
            list.push(name);
        }
        list
    }
}

impl From<CreditorList> for Vec<String> {
    fn from(list: CreditorList) -> Self {
        list.entries
    }
}

impl<'a> FromIterator<&'a str> for CreditorList {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut list = CreditorList::new();
        for name in iter {
            list.push(name);
        }
        list
    }
}

/// Partial property set written back to one record. `None` leaves the
/// stored value untouched; `Some("")` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordUpdate {
    pub status: Option<AnalysisStatus>,
    pub owner_name: Option<String>,
    pub owner_address: Option<String>,
    pub owner_postal_city: Option<String>,
    pub creditors: Option<Vec<String>>,
    pub claim_amount: Option<String>,
    pub note: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: AnalysisStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Apply this update to an in-memory record, as the store would.
    pub fn apply_to(&self, record: &mut AuctionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref v) = self.owner_name {
            record.owner_name.clone_from(v);
        }
        if let Some(ref v) = self.owner_address {
            record.owner_address.clone_from(v);
        }
        if let Some(ref v) = self.owner_postal_city {
            record.owner_postal_city.clone_from(v);
        }
        if let Some(ref v) = self.note {
            record.note.clone_from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_roundtrip() {
        for s in [
            AnalysisStatus::NotAnalyzed,
            AnalysisStatus::AnalyzedComplete,
            AnalysisStatus::AnalyzedIncomplete,
            AnalysisStatus::Unreadable,
        ] {
            assert_eq!(AnalysisStatus::from_label(s.label()), s);
        }
        assert_eq!(AnalysisStatus::from_label(""), AnalysisStatus::NotAnalyzed);
    }

    #[test]
    fn creditor_key_strips_registry_numbers() {
        assert_eq!(creditor_key("Bank X AG (FN 123456a)"), "bank x ag");
        assert_eq!(creditor_key("  BANK   X AG. "), "bank x ag");
        // Parentheses without digits are content, not registry numbers.
        assert_eq!(creditor_key("Bank (Austria) AG"), "bank (austria) ag");
    }

    #[test]
    fn creditor_list_dedups_in_first_seen_order() {
        let mut list = CreditorList::new();
        assert!(list.push("Raiffeisenbank Graz (FN 1234a)"));
        assert!(list.push("Sparkasse Wien"));
        assert!(!list.push("RAIFFEISENBANK GRAZ"));
        assert!(!list.push("   "));
        let names: Vec<&str> = list.iter().collect();
        assert_eq!(names, vec!["Raiffeisenbank Graz (FN 1234a)", "Sparkasse Wien"]);
    }

    #[test]
    fn creditor_list_serialises_as_array() {
        let list: CreditorList = ["A-Bank AG", "B-Bank AG"].into_iter().collect();
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["A-Bank AG","B-Bank AG"]"#);
        let back: CreditorList = serde_json::from_str(r#"["x bank","X Bank"]"#).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn identity_data_needs_name_or_address() {
        let mut c = ExtractionCandidate::default();
        assert!(!c.has_identity_data());
        c.owner_postal_city = "8010".into();
        assert!(!c.has_identity_data());
        c.owner_address = "Hauptstraße 5".into();
        assert!(c.has_identity_data());
    }

    #[test]
    fn fill_missing_keeps_owner_fields_together() {
        let mut primary = ExtractionCandidate {
            owner_name: "Maria Muster".into(),
            ..Default::default()
        };
        primary.creditors.push("Bank X AG");
        let secondary = ExtractionCandidate {
            owner_name: "Franz Beispiel".into(),
            owner_address: "Lindengasse 3".into(),
            claim_amount: "EUR 1.000,--".into(),
            creditors: ["Bank X AG", "Bank Y AG"].into_iter().collect(),
            ..Default::default()
        };
        primary.fill_missing_from(&secondary);
        assert_eq!(primary.owner_name, "Maria Muster");
        assert!(primary.owner_address.is_empty());
        assert_eq!(primary.claim_amount, "EUR 1.000,--");
        assert_eq!(primary.creditors.join(" | "), "Bank X AG | Bank Y AG");
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut rec = AuctionRecord {
            owner_name: "old".into(),
            note: "n".into(),
            ..Default::default()
        };
        RecordUpdate::status(AnalysisStatus::Unreadable).apply_to(&mut rec);
        assert_eq!(rec.status, AnalysisStatus::Unreadable);
        assert_eq!(rec.owner_name, "old");
        assert_eq!(rec.note, "n");
    }
}

//! Extraction contracts sent to the language model.
//!
//! Both model tiers share one JSON schema and one list of negative rules;
//! the vision prompt adds guidance for telling the two document layouts
//! apart on a rendered page. Keeping every prompt here means tests can
//! inspect them without a provider.

/// JSON schema the model must answer with. Field names match
/// [`crate::record::ExtractionCandidate`].
pub const EXTRACTION_SCHEMA: &str = r#"{
  "owner_name": "string, full name(s) of the property owner; joint owners separated by \" / \"",
  "owner_address": "string, street and house number of the owner's postal address",
  "owner_postal_city": "string, postal code and city of the owner's address",
  "creditors": ["string, name of each creditor pursuing the auction or holding a lien"],
  "claim_amount": "string, the enforced claim, e.g. \"EUR 150.000,--\""
}"#;

/// Rules shared by the text and vision contracts.
const EXTRACTION_RULES: &str = r#"Rules:
1. Answer with exactly one JSON object matching the schema. No prose, no code fences.
2. If a value is not stated in the document, use an empty string (or an empty list). Never write "unknown", "nicht angegeben", "n/a" or similar.
3. The owner is the "Verpflichtete Partei" of the proceedings, or the person/company listed under an ownership share ("ANTEIL") in section B of a land-registry excerpt.
4. Never report any of these as owner or creditor:
   - court-appointed experts / appraisers (Sachverständige, Gutachter)
   - attorneys, notaries, or anyone introduced with "vertreten durch"
   - owner associations (Eigentümergemeinschaft) that merely appear in the land register
   - court-enforcement officers (Gerichtsvollzieher) and the court itself
   - guardians, curators and assistants (Erwachsenenvertreter, Sachwalter, Kurator)
5. Do not include birthdates, registry numbers or file references in any name.
6. Creditors are the "Betreibende Partei" and the beneficiaries of liens in section C ("für …"). List each creditor once.
7. Copy names and addresses exactly as written; do not translate or abbreviate."#;

/// System prompt for the text tier.
pub fn text_system_prompt() -> String {
    format!(
        "You extract identity data from Austrian foreclosure-auction documents \
         (court appraisals and land-registry excerpts).\n\nSchema:\n{EXTRACTION_SCHEMA}\n\n{EXTRACTION_RULES}"
    )
}

/// User message for the text tier.
pub fn text_user_prompt(excerpt: &str) -> String {
    format!("Document text:\n\n{excerpt}")
}

/// Layout guidance added for the vision tier.
const LAYOUT_GUIDANCE: &str = r#"The pages come from one of two document types:
A) Land-registry excerpt (Grundbuchauszug): monospaced text with sections marked "** A ***", "** B ***", "** C ***". Owners follow "ANTEIL:" lines in section B, with "GEB:" (birthdate) and "ADR:" (address) underneath. Creditors follow "für" in section C; the claim follows "Hereinbringung von" or "Höchstbetrag".
B) Court appraisal (Gutachten / Schätzungsgutachten): a cover page naming the "Verpflichtete Partei" (owner) and the "Betreibende Partei" (creditor). The appraiser's own name and letterhead are NOT parties.
The pages are in document order."#;

/// System prompt for the vision tier.
pub fn vision_system_prompt() -> String {
    format!("{}\n\n{LAYOUT_GUIDANCE}", text_system_prompt())
}

/// User text accompanying the page images.
pub fn vision_user_prompt(page_count: usize) -> String {
    format!("Extract the identity data from these {page_count} scanned page(s).")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_valid_json() {
        let v: serde_json::Value = serde_json::from_str(EXTRACTION_SCHEMA).unwrap();
        for key in ["owner_name", "owner_address", "owner_postal_city", "creditors", "claim_amount"] {
            assert!(v.get(key).is_some(), "{key} missing");
        }
    }

    #[test]
    fn prompts_carry_negative_rules() {
        let text = text_system_prompt();
        assert!(text.contains("Sachverständige"));
        assert!(text.contains("Gerichtsvollzieher"));
        assert!(text.contains("birthdates"));
        let vision = vision_system_prompt();
        assert!(vision.starts_with(&text));
        assert!(vision.contains("ANTEIL"));
        assert!(vision.contains("Verpflichtete Partei"));
    }
}

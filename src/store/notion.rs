//! Notion database as the record store.
//!
//! One database row per auction. Text fields are `rich_text` properties,
//! the analysis status and the workflow phase are `select` properties, the
//! notice link is a `url` property and the row title is the property address.

use super::RecordStore;
use crate::error::EnricherError;
use crate::record::{AnalysisStatus, AuctionRecord, RecordUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
/// Notion rejects rich-text segments longer than this.
const RICH_TEXT_LIMIT: usize = 2000;
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Database property names. Defaults match the production database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyNames {
    pub title: String,
    pub detail_url: String,
    pub status: String,
    pub workflow_phase: String,
    pub owner_name: String,
    pub owner_address: String,
    pub owner_postal_city: String,
    pub note: String,
    /// Separate creditor property. When unset, creditors only appear in the note.
    pub creditors: Option<String>,
    /// Separate claim property. When unset, the claim only appears in the note.
    pub claim_amount: Option<String>,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: "Liegenschaftsadresse".into(),
            detail_url: "Link".into(),
            status: "Gutachten analysiert?".into(),
            workflow_phase: "Workflow-Phase".into(),
            owner_name: "Verpflichtende Partei".into(),
            owner_address: "Zustell Adresse".into(),
            owner_postal_city: "Zustell PLZ/Ort".into(),
            note: "Notizen".into(),
            creditors: None,
            claim_amount: None,
        }
    }
}

/// Normalise a pasted database URL or ID to the dashed UUID form.
///
/// `https://www.notion.so/ws/0123…cdef?v=…` and a bare 32-hex ID both give
/// `01234567-89ab-cdef-0123-456789abcdef`. A last path segment that does
/// not end in 32 hex digits is returned trimmed but otherwise as is.
pub fn clean_database_id(raw: &str) -> String {
    let raw = raw.split('?').next().unwrap_or_default().trim();
    let last = raw.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let compact: Vec<char> = last.chars().filter(|c| *c != '-').collect();
    if compact.len() >= 32 {
        let hex: String = compact[compact.len() - 32..].iter().collect();
        if hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            );
        }
    }
    last.to_string()
}

/// [`RecordStore`] over the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionStore {
    client: reqwest::Client,
    token: String,
    database_id: String,
    names: PropertyNames,
    api_base: String,
}

impl NotionStore {
    pub fn new(token: impl Into<String>, database_id: &str) -> Result<Self, EnricherError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(EnricherError::InvalidConfig("Notion token is empty".into()));
        }
        let database_id = clean_database_id(database_id);
        if database_id.is_empty() {
            return Err(EnricherError::InvalidConfig("Notion database ID is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EnricherError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            token,
            database_id,
            names: PropertyNames::default(),
            api_base: NOTION_API.to_string(),
        })
    }

    pub fn with_property_names(mut self, names: PropertyNames) -> Self {
        self.names = names;
        self
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<Value, EnricherError> {
        let store_err = |detail: String| EnricherError::RecordStore {
            operation: operation.to_string(),
            detail,
        };

        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| store_err(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| store_err(e.to_string()))?;
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(store_err(format!("HTTP {status}: {message}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl RecordStore for NotionStore {
    async fn list_records(&self) -> Result<Vec<AuctionRecord>, EnricherError> {
        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(ref c) = cursor {
                body["start_cursor"] = json!(c);
            }
            let resp = self.send("query", self.client.post(&url).json(&body)).await?;

            if let Some(results) = resp.get("results").and_then(Value::as_array) {
                records.extend(results.iter().filter_map(|p| record_from_page(p, &self.names)));
            }

            let has_more = resp.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = resp
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        debug!("Listed {} record(s) from Notion", records.len());
        Ok(records)
    }

    async fn fetch_record(&self, id: &str) -> Result<AuctionRecord, EnricherError> {
        let url = format!("{}/pages/{}", self.api_base, id);
        let page = self.send("fetch", self.client.get(&url)).await?;
        record_from_page(&page, &self.names).ok_or_else(|| EnricherError::RecordStore {
            operation: "fetch".into(),
            detail: format!("page '{id}' has no id"),
        })
    }

    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), EnricherError> {
        let properties = properties_for_update(update, &self.names);
        if properties.is_empty() {
            return Ok(());
        }
        let url = format!("{}/pages/{}", self.api_base, id);
        let body = json!({ "properties": properties });
        self.send("update", self.client.patch(&url).json(&body)).await?;
        Ok(())
    }
}

// ── Property mapping ─────────────────────────────────────────────────────

fn plain_text(prop: Option<&Value>, kind: &str) -> String {
    prop.and_then(|p| p.get(kind))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn select_name(prop: Option<&Value>) -> Option<String> {
    prop.and_then(|p| p.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn status_from(prop: Option<&Value>) -> AnalysisStatus {
    if let Some(label) = select_name(prop) {
        return AnalysisStatus::from_label(&label);
    }
    // Older databases used a checkbox: ticked meant analysed.
    match prop.and_then(|p| p.get("checkbox")).and_then(Value::as_bool) {
        Some(true) => AnalysisStatus::AnalyzedComplete,
        _ => AnalysisStatus::NotAnalyzed,
    }
}

/// Map a Notion page object to a record. `None` when the page has no id.
pub(crate) fn record_from_page(page: &Value, names: &PropertyNames) -> Option<AuctionRecord> {
    let id = page.get("id")?.as_str()?.to_string();
    let empty = Map::new();
    let props = page.get("properties").and_then(Value::as_object).unwrap_or(&empty);

    Some(AuctionRecord {
        id,
        title: plain_text(props.get(&names.title), "title"),
        detail_url: props
            .get(&names.detail_url)
            .and_then(|p| p.get("url"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        status: status_from(props.get(&names.status)),
        workflow_phase: select_name(props.get(&names.workflow_phase)),
        owner_name: plain_text(props.get(&names.owner_name), "rich_text"),
        owner_address: plain_text(props.get(&names.owner_address), "rich_text"),
        owner_postal_city: plain_text(props.get(&names.owner_postal_city), "rich_text"),
        note: plain_text(props.get(&names.note), "rich_text"),
    })
}

fn rich_text(text: &str) -> Value {
    let truncated: String = text.chars().take(RICH_TEXT_LIMIT).collect();
    if truncated.is_empty() {
        json!({ "rich_text": [] })
    } else {
        json!({ "rich_text": [{ "text": { "content": truncated } }] })
    }
}

/// Build the `properties` object for a PATCH. Only fields set in `update`
/// appear.
pub(crate) fn properties_for_update(update: &RecordUpdate, names: &PropertyNames) -> Map<String, Value> {
    let mut props = Map::new();
    if let Some(status) = update.status {
        props.insert(names.status.clone(), json!({ "select": { "name": status.label() } }));
    }
    let text_fields = [
        (&names.owner_name, &update.owner_name),
        (&names.owner_address, &update.owner_address),
        (&names.owner_postal_city, &update.owner_postal_city),
        (&names.note, &update.note),
    ];
    for (name, value) in text_fields {
        if let Some(v) = value {
            props.insert(name.clone(), rich_text(v));
        }
    }
    if let (Some(name), Some(creditors)) = (&names.creditors, &update.creditors) {
        props.insert(name.clone(), rich_text(&creditors.join(" | ")));
    }
    if let (Some(name), Some(claim)) = (&names.claim_amount, &update.claim_amount) {
        props.insert(name.clone(), rich_text(claim));
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_database_urls() {
        let id = "0123456789abcdef0123456789ABCDEF";
        let want = "01234567-89ab-cdef-0123-456789ABCDEF";
        assert_eq!(clean_database_id(id), want);
        assert_eq!(
            clean_database_id(&format!("https://www.notion.so/team/Edikte-{id}?v=abc123")),
            want
        );
        assert_eq!(clean_database_id(&format!("{id}/")), want);
        assert_eq!(clean_database_id(" not-an-id "), "not-an-id");
    }

    #[test]
    fn maps_page_to_record() {
        let page = json!({
            "id": "page-1",
            "properties": {
                "Liegenschaftsadresse": { "title": [{ "plain_text": "Hauptstraße 5, " }, { "plain_text": "Graz" }] },
                "Link": { "url": "https://edikte.justiz.gv.at/x" },
                "Gutachten analysiert?": { "select": { "name": "Unvollständig" } },
                "Workflow-Phase": { "select": { "name": "🗄 Archiviert" } },
                "Verpflichtende Partei": { "rich_text": [{ "plain_text": "Maria Muster" }] },
                "Notizen": { "rich_text": [] }
            }
        });
        let rec = record_from_page(&page, &PropertyNames::default()).unwrap();
        assert_eq!(rec.title, "Hauptstraße 5, Graz");
        assert_eq!(rec.detail_url.as_deref(), Some("https://edikte.justiz.gv.at/x"));
        assert_eq!(rec.status, AnalysisStatus::AnalyzedIncomplete);
        assert_eq!(rec.workflow_phase.as_deref(), Some("🗄 Archiviert"));
        assert_eq!(rec.owner_name, "Maria Muster");
        assert!(rec.note.is_empty());
    }

    #[test]
    fn legacy_checkbox_status() {
        let page = json!({
            "id": "p",
            "properties": { "Gutachten analysiert?": { "checkbox": true }, "Link": { "url": null } }
        });
        let rec = record_from_page(&page, &PropertyNames::default()).unwrap();
        assert_eq!(rec.status, AnalysisStatus::AnalyzedComplete);
        assert!(rec.detail_url.is_none());
    }

    #[test]
    fn update_sends_only_set_fields() {
        let update = RecordUpdate {
            status: Some(AnalysisStatus::AnalyzedComplete),
            owner_name: Some("Maria Muster".into()),
            note: Some("x".repeat(2500)),
            creditors: Some(vec!["A".into(), "B".into()]),
            ..Default::default()
        };
        let props = properties_for_update(&update, &PropertyNames::default());
        assert_eq!(props.len(), 3);
        assert_eq!(props["Gutachten analysiert?"]["select"]["name"], "Analysiert");
        let note = props["Notizen"]["rich_text"][0]["text"]["content"].as_str().unwrap();
        assert_eq!(note.chars().count(), 2000);

        let names = PropertyNames {
            creditors: Some("Gläubiger".into()),
            ..Default::default()
        };
        let props = properties_for_update(&update, &names);
        assert_eq!(props["Gläubiger"]["rich_text"][0]["text"]["content"], "A | B");
    }

    #[test]
    fn long_note_keeps_retry_marker_after_round_trip() {
        use crate::state::{is_sweepable, with_retry_marker};

        let creditors: Vec<String> = (1..=50)
            .map(|i| format!("Raiffeisenbank Musterregion Nummer {i:02} eGen"))
            .collect();
        let long = format!(
            "no owner data found in the document\nCreditors: {}",
            creditors.join(" | ")
        );
        assert!(long.chars().count() > RICH_TEXT_LIMIT);

        let names = PropertyNames::default();
        let update = RecordUpdate {
            status: Some(AnalysisStatus::NotAnalyzed),
            note: Some(with_retry_marker(&long)),
            ..Default::default()
        };
        let props = properties_for_update(&update, &names);
        let stored = props["Notizen"]["rich_text"][0]["text"]["content"].clone();
        let page = json!({
            "id": "p",
            "properties": {
                "Gutachten analysiert?": { "select": { "name": "Unvollständig" } },
                "Notizen": { "rich_text": [{ "plain_text": stored }] }
            }
        });
        let rec = record_from_page(&page, &names).unwrap();
        assert!(rec.note.chars().count() <= RICH_TEXT_LIMIT);
        assert!(!is_sweepable(&rec, |_| false));
    }

    #[test]
    fn empty_token_rejected() {
        assert!(matches!(
            NotionStore::new("  ", "0123456789abcdef0123456789abcdef"),
            Err(EnricherError::InvalidConfig(_))
        ));
    }
}

//! Configuration types for an enrichment run.
//!
//! All run behaviour is controlled through [`EnricherConfig`], built via its
//! [`EnricherConfigBuilder`]. The keyword tables that steer the pattern
//! grammar and the validator live in [`KeywordRules`], constructed once at
//! startup and handed to each component explicitly.

use crate::error::EnricherError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Hard ceiling for the vision tier. Rendering and sending eight page images
/// per document is the most expensive thing this crate does.
pub const MAX_VISION_CALLS_CEILING: usize = 20;

/// Configuration for one enrichment run.
///
/// # Example
/// ```rust
/// use edikte_enricher::EnricherConfig;
///
/// let config = EnricherConfig::builder()
///     .max_records_per_run(25)
///     .max_vision_calls_per_run(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_vision_calls_per_run, 5);
/// ```
#[derive(Clone)]
pub struct EnricherConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Disable tiers 2 and 3 even when a provider could be resolved.
    pub patterns_only: bool,

    /// Which text tier leads. Default: [`TextStrategy::PatternFirst`].
    pub text_strategy: TextStrategy,

    /// Maximum tokens the model may generate per answer. Default: 1024.
    pub max_tokens: usize,

    /// Characters of page text sent to the text tier. Default: 12 000.
    ///
    /// Cover page and title block sit in the first few thousand characters
    /// of every known layout.
    pub text_char_budget: usize,

    /// Pages rendered for the vision tier. Default: 8.
    pub vision_max_pages: usize,

    /// Upscale factor applied when rasterising pages for the vision tier. Default: 2.0.
    pub render_scale: f32,

    /// Cap on either dimension of a rendered page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Documents whose extracted text has fewer non-whitespace characters
    /// than this are treated as scanned. Default: 50.
    pub scanned_text_threshold: usize,

    /// Records processed per run. Default: 50.
    pub max_records_per_run: usize,

    /// Text-tier model calls per run. Default: 50.
    pub max_text_model_calls_per_run: usize,

    /// Vision-tier model calls per run. Default: 10, never above
    /// [`MAX_VISION_CALLS_CEILING`].
    pub max_vision_calls_per_run: usize,

    /// Run the convergence sweep before enrichment. Default: true.
    pub sweep_enabled: bool,

    /// Writes the sweep may issue per run. Default: 100.
    pub sweep_limit: usize,

    /// Pause between records, in milliseconds. Default: 500.
    pub record_delay_ms: u64,

    /// Maximum retry attempts on a failed model call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Notice page / attachment download timeout in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Per-model-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Workflow phases a human has taken over; records in them are never touched.
    pub protected_phases: Vec<String>,

    /// Keyword tables for the grammar and the validator.
    pub rules: KeywordRules,

    /// Optional run progress observer.
    pub progress_callback: Option<crate::progress::ProgressCallback>,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            patterns_only: false,
            text_strategy: TextStrategy::default(),
            max_tokens: 1024,
            text_char_budget: 12_000,
            vision_max_pages: 8,
            render_scale: 2.0,
            max_rendered_pixels: 2000,
            scanned_text_threshold: 50,
            max_records_per_run: 50,
            max_text_model_calls_per_run: 50,
            max_vision_calls_per_run: 10,
            sweep_enabled: true,
            sweep_limit: 100,
            record_delay_ms: 500,
            max_retries: 2,
            retry_backoff_ms: 500,
            download_timeout_secs: 60,
            api_timeout_secs: 90,
            protected_phases: vec!["🗄 Archiviert".to_string()],
            rules: KeywordRules::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for EnricherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnricherConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("patterns_only", &self.patterns_only)
            .field("text_strategy", &self.text_strategy)
            .field("text_char_budget", &self.text_char_budget)
            .field("vision_max_pages", &self.vision_max_pages)
            .field("max_records_per_run", &self.max_records_per_run)
            .field("max_text_model_calls_per_run", &self.max_text_model_calls_per_run)
            .field("max_vision_calls_per_run", &self.max_vision_calls_per_run)
            .field("sweep_enabled", &self.sweep_enabled)
            .field("sweep_limit", &self.sweep_limit)
            .field("record_delay_ms", &self.record_delay_ms)
            .field("protected_phases", &self.protected_phases)
            .finish()
    }
}

impl EnricherConfig {
    /// Create a new builder for `EnricherConfig`.
    pub fn builder() -> EnricherConfigBuilder {
        EnricherConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether the record's workflow phase is protected from automation.
    pub fn is_protected_phase(&self, phase: Option<&str>) -> bool {
        phase.is_some_and(|p| self.protected_phases.iter().any(|q| q.trim() == p.trim()))
    }
}

/// Builder for [`EnricherConfig`].
#[derive(Debug)]
pub struct EnricherConfigBuilder {
    config: EnricherConfig,
}

impl EnricherConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn patterns_only(mut self, v: bool) -> Self {
        self.config.patterns_only = v;
        self
    }

    pub fn text_strategy(mut self, strategy: TextStrategy) -> Self {
        self.config.text_strategy = strategy;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn text_char_budget(mut self, n: usize) -> Self {
        self.config.text_char_budget = n;
        self
    }

    pub fn vision_max_pages(mut self, n: usize) -> Self {
        self.config.vision_max_pages = n.max(1);
        self
    }

    pub fn scanned_text_threshold(mut self, n: usize) -> Self {
        self.config.scanned_text_threshold = n;
        self
    }

    pub fn max_records_per_run(mut self, n: usize) -> Self {
        self.config.max_records_per_run = n;
        self
    }

    pub fn max_text_model_calls_per_run(mut self, n: usize) -> Self {
        self.config.max_text_model_calls_per_run = n;
        self
    }

    pub fn max_vision_calls_per_run(mut self, n: usize) -> Self {
        self.config.max_vision_calls_per_run = n.min(MAX_VISION_CALLS_CEILING);
        self
    }

    pub fn sweep_enabled(mut self, v: bool) -> Self {
        self.config.sweep_enabled = v;
        self
    }

    pub fn sweep_limit(mut self, n: usize) -> Self {
        self.config.sweep_limit = n;
        self
    }

    pub fn record_delay_ms(mut self, ms: u64) -> Self {
        self.config.record_delay_ms = ms;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn protected_phases(mut self, phases: Vec<String>) -> Self {
        self.config.protected_phases = phases;
        self
    }

    pub fn rules(mut self, rules: KeywordRules) -> Self {
        self.config.rules = rules;
        self
    }

    pub fn progress_callback(mut self, cb: crate::progress::ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EnricherConfig, EnricherError> {
        let c = &self.config;
        if c.text_char_budget < 1000 {
            return Err(EnricherError::InvalidConfig(format!(
                "text_char_budget must be ≥ 1000, got {}",
                c.text_char_budget
            )));
        }
        if !(1.0..=4.0).contains(&c.render_scale) {
            return Err(EnricherError::InvalidConfig(format!(
                "render_scale must be 1.0–4.0, got {}",
                c.render_scale
            )));
        }
        if c.max_vision_calls_per_run > MAX_VISION_CALLS_CEILING {
            return Err(EnricherError::InvalidConfig(format!(
                "max_vision_calls_per_run must be ≤ {MAX_VISION_CALLS_CEILING}"
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which text tier leads for documents with extractable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStrategy {
    /// Pattern grammar first; the model only runs when it found no identity data. (default)
    #[default]
    PatternFirst,
    /// Model first; the pattern grammar fills whatever the model left empty.
    ModelFirst,
}

// ── Keyword rules ────────────────────────────────────────────────────────

/// Keyword tables used by the pattern grammar, the validator and attachment
/// selection. All matching is case-insensitive substring matching against
/// lower-cased input, so every entry must be lower case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordRules {
    /// Values a model or template writes instead of leaving a field empty.
    pub placeholder_values: Vec<String>,
    /// Experts, guardians, attorneys and notaries: never owners or creditors.
    pub non_party_actors: Vec<String>,
    /// Owner associations. Only creditors when no land-registry reference follows.
    pub owner_associations: Vec<String>,
    /// Court-enforcement officers.
    pub court_officers: Vec<String>,
    /// Named hospitality businesses that show up as co-parties.
    pub hospitality: Vec<String>,
    /// Filename fragments that mark the appraisal among a notice's attachments.
    pub appraisal_filename_keywords: Vec<String>,
    /// Filename fragments of annex bundles that are never the appraisal.
    pub annex_filename_keywords: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordRules {
    fn default() -> Self {
        Self {
            placeholder_values: owned(&[
                "nicht angegeben",
                "keine angabe",
                "keine angaben",
                "unbekannt",
                "k.a.",
                "n/a",
                "n.a.",
                "not specified",
                "unknown",
                "none",
                "null",
                "-",
                "--",
            ]),
            non_party_actors: owned(&[
                "sachverständig",
                "sachverstaendig",
                "gutachter",
                "erwachsenenvertret",
                "sachwalter",
                "kurator",
                "rechtsanwalt",
                "rechtsanwält",
                "rechtsanwaelt",
                "notar",
                "vertreten durch",
                "masseverwalter",
                "insolvenzverwalter",
            ]),
            owner_associations: owned(&[
                "eigentümergemeinschaft",
                "eigentuemergemeinschaft",
                "wohnungseigentümergemeinschaft",
                "eigentümergem.",
            ]),
            court_officers: owned(&["gerichtsvollzieher", "vollstreckungsorgan", "vollstrecker"]),
            hospitality: owned(&[
                "gasthof",
                "gasthaus",
                "wirtshaus",
                "hotel",
                "pension ",
                "restaurant",
                "café",
                "cafe ",
                "pizzeria",
            ]),
            appraisal_filename_keywords: owned(&[
                "gutachten",
                "sachverst",
                "schätzung",
                "schaetzung",
                "sv-",
                "/g-",
                " g ",
                "g ",
            ]),
            annex_filename_keywords: owned(&["anlage", "anhang", "beilage"]),
        }
    }
}

impl KeywordRules {
    /// Load rules from a JSON file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, EnricherError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EnricherError::InvalidConfig(format!("cannot read rules '{}': {e}", path.display()))
        })?;
        let rules: KeywordRules = serde_json::from_str(&raw).map_err(|e| {
            EnricherError::InvalidConfig(format!("invalid rules '{}': {e}", path.display()))
        })?;
        Ok(rules.lowercased())
    }

    fn lowercased(mut self) -> Self {
        for list in [
            &mut self.placeholder_values,
            &mut self.non_party_actors,
            &mut self.owner_associations,
            &mut self.court_officers,
            &mut self.hospitality,
            &mut self.appraisal_filename_keywords,
            &mut self.annex_filename_keywords,
        ] {
            for item in list.iter_mut() {
                *item = item.to_lowercase();
            }
        }
        self
    }

    /// Whether the whole value is a placeholder phrase.
    pub fn is_placeholder(&self, value: &str) -> bool {
        let v = value
            .trim()
            .trim_matches(|c: char| c == '(' || c == ')' || c == '"')
            .trim()
            .to_lowercase();
        self.placeholder_values.iter().any(|p| *p == v)
    }

    pub fn mentions_non_party(&self, lower: &str) -> bool {
        contains_any(lower, &self.non_party_actors)
    }

    pub fn mentions_owner_association(&self, lower: &str) -> bool {
        contains_any(lower, &self.owner_associations)
    }

    pub fn mentions_court_officer(&self, lower: &str) -> bool {
        contains_any(lower, &self.court_officers)
    }

    pub fn mentions_hospitality(&self, lower: &str) -> bool {
        contains_any(lower, &self.hospitality)
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = EnricherConfig::builder().build().unwrap();
        assert_eq!(config.text_char_budget, 12_000);
        assert_eq!(config.vision_max_pages, 8);
        assert_eq!(config.text_strategy, TextStrategy::PatternFirst);
    }

    #[test]
    fn vision_cap_is_clamped() {
        let config = EnricherConfig::builder()
            .max_vision_calls_per_run(500)
            .build()
            .unwrap();
        assert_eq!(config.max_vision_calls_per_run, MAX_VISION_CALLS_CEILING);
    }

    #[test]
    fn tiny_text_budget_rejected() {
        let err = EnricherConfig::builder().text_char_budget(10).build();
        assert!(matches!(err, Err(EnricherError::InvalidConfig(_))));
    }

    #[test]
    fn protected_phase_match_is_exact_after_trim() {
        let config = EnricherConfig::default();
        assert!(config.is_protected_phase(Some(" 🗄 Archiviert ")));
        assert!(!config.is_protected_phase(Some("🆕 Neu eingelangt")));
        assert!(!config.is_protected_phase(None));
    }

    #[test]
    fn placeholder_detection_is_case_insensitive() {
        let rules = KeywordRules::default();
        assert!(rules.is_placeholder("Nicht angegeben"));
        assert!(rules.is_placeholder("  N/A "));
        assert!(!rules.is_placeholder("Maria Muster"));
    }

    #[test]
    fn partial_rules_json_keeps_defaults() {
        let rules: KeywordRules =
            serde_json::from_str(r#"{"hospitality": ["Almhütte"]}"#).unwrap();
        let rules = rules.lowercased();
        assert_eq!(rules.hospitality, vec!["almhütte".to_string()]);
        assert!(!rules.placeholder_values.is_empty());
    }
}

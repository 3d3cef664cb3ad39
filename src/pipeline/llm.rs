//! Tiers 2 and 3: language-model extraction over page text or page images.
//!
//! Both tiers send the same JSON contract from [`crate::prompts`] and parse
//! the answer the same way. A tier that fails for any reason (transport,
//! timeout, unparseable answer) returns `None`; the orchestrator treats that
//! exactly like a tier that found nothing.
//!
//! ## Retry Strategy
//!
//! 429/503 answers are common on shared API keys. Failed calls are retried
//! with exponential backoff (`retry_backoff_ms * 2^attempt`); with the
//! defaults that is 500 ms then 1 s. Each attempt is bounded by
//! `api_timeout_secs`.

use crate::config::EnricherConfig;
use crate::error::EnricherError;
use crate::prompts;
use crate::record::{CreditorList, ExtractionCandidate};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Default model when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A model-backed extractor. Implemented by [`LlmExtractor`]; tests use fakes.
#[async_trait]
pub trait ModelExtractor: Send + Sync {
    /// Tier 2: extract from page text. The implementation bounds the excerpt.
    async fn extract_from_text(&self, text: &str) -> Option<ExtractionCandidate>;

    /// Tier 3: extract from rendered pages, in page order.
    async fn extract_from_pages(&self, pages: Vec<ImageData>) -> Option<ExtractionCandidate>;
}

/// [`ModelExtractor`] over an edgequake-llm provider.
pub struct LlmExtractor {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
    text_char_budget: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &EnricherConfig) -> Self {
        Self {
            provider,
            max_tokens: config.max_tokens,
            text_char_budget: config.text_char_budget,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn options(&self) -> CompletionOptions {
        // Deterministic decoding: the same document must give the same answer.
        CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Send `messages`, retrying on failure. Returns the answer text.
    async fn complete(&self, tier: &str, messages: &[ChatMessage]) -> Option<String> {
        let options = self.options();
        let start = Instant::now();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("{}: retry {}/{} after {}ms", tier, attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.api_timeout, self.provider.chat(messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        tier,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Some(response.content);
                }
                Ok(Err(e)) => warn!("{}: attempt {} failed: {}", tier, attempt + 1, e),
                Err(_) => warn!(
                    "{}: attempt {} timed out after {:?}",
                    tier,
                    attempt + 1,
                    self.api_timeout
                ),
            }
        }
        None
    }
}

#[async_trait]
impl ModelExtractor for LlmExtractor {
    async fn extract_from_text(&self, text: &str) -> Option<ExtractionCandidate> {
        let excerpt = truncate_chars(text, self.text_char_budget);
        let messages = vec![
            ChatMessage::system(prompts::text_system_prompt()),
            ChatMessage::user(prompts::text_user_prompt(excerpt)),
        ];
        let answer = self.complete("text tier", &messages).await?;
        let parsed = parse_candidate(&answer);
        if parsed.is_none() {
            warn!("text tier: unparseable answer ({} chars)", answer.len());
        }
        parsed
    }

    async fn extract_from_pages(&self, pages: Vec<ImageData>) -> Option<ExtractionCandidate> {
        if pages.is_empty() {
            return None;
        }
        let messages = vec![
            ChatMessage::system(prompts::vision_system_prompt()),
            ChatMessage::user_with_images(prompts::vision_user_prompt(pages.len()), pages),
        ];
        let answer = self.complete("vision tier", &messages).await?;
        let parsed = parse_candidate(&answer);
        if parsed.is_none() {
            warn!("vision tier: unparseable answer ({} chars)", answer.len());
        }
        parsed
    }
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parse a model answer into a candidate.
///
/// Accepts the bare object, an object wrapped in code fences, or one
/// surrounded by prose. `creditors` may be a list or a single string; null
/// and missing fields become empty.
pub fn parse_candidate(answer: &str) -> Option<ExtractionCandidate> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&answer[start..=end]).ok()?;
    let obj = value.as_object()?;

    let field = |key: &str| obj.get(key).map(value_to_string).unwrap_or_default();

    let mut creditors = CreditorList::new();
    match obj.get("creditors") {
        Some(Value::Array(items)) => {
            for item in items {
                creditors.push(&value_to_string(item));
            }
        }
        Some(other) => {
            creditors.push(&value_to_string(other));
        }
        None => {}
    }

    Some(ExtractionCandidate {
        owner_name: field("owner_name"),
        owner_address: field("owner_address"),
        owner_postal_city: field("owner_postal_city"),
        owner_birthdate: String::new(),
        creditors,
        claim_amount: field("claim_amount"),
    })
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" / "),
        other => other.to_string(),
    }
}

/// Resolve the model provider, from most to least specific:
///
/// 1. `patterns_only` → no provider.
/// 2. A pre-built `config.provider`.
/// 3. A named provider (`config.provider_name`), which must initialise.
/// 4. `EDGEQUAKE_PROVIDER` + `EDGEQUAKE_MODEL` from the environment.
/// 5. Auto-detection via [`ProviderFactory::from_env`]; if nothing is
///    configured the run continues with the pattern tier only.
pub fn resolve_provider(config: &EnricherConfig) -> Result<Option<Arc<dyn LLMProvider>>, EnricherError> {
    if config.patterns_only {
        info!("Pattern tier only (model tiers disabled)");
        return Ok(None);
    }

    if let Some(ref provider) = config.provider {
        return Ok(Some(Arc::clone(provider)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model).map(Some);
    }

    if let (Ok(name), Ok(model)) = (
        std::env::var("EDGEQUAKE_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !model.is_empty() {
            return create_provider(&name, &model).map(Some);
        }
    }

    match ProviderFactory::from_env() {
        Ok((llm, _embedding)) => {
            info!("Model provider auto-detected from environment");
            Ok(Some(llm))
        }
        Err(e) => {
            warn!("No model provider configured ({e}); continuing with the pattern tier only");
            Ok(None)
        }
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, EnricherError> {
    info!("Using model provider '{}' with model '{}'", name, model);
    ProviderFactory::create_llm_provider(name, model).map_err(|e| EnricherError::ProviderNotConfigured {
        provider: name.to_string(),
        hint: format!("{e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let c = parse_candidate(
            r#"{"owner_name":"Maria Muster","owner_address":"Hauptstraße 5","owner_postal_city":"8010 Graz","creditors":["Bank X AG","BANK X AG"],"claim_amount":"EUR 150.000,--"}"#,
        )
        .unwrap();
        assert_eq!(c.owner_name, "Maria Muster");
        assert_eq!(c.owner_postal_city, "8010 Graz");
        assert_eq!(c.creditors.len(), 1);
        assert_eq!(c.claim_amount, "EUR 150.000,--");
    }

    #[test]
    fn parses_fenced_answer_with_prose() {
        let answer = "Here is the data:\n```json\n{\"owner_name\": \"Franz Beispiel\", \"creditors\": \"Bank Y AG\", \"claim_amount\": null}\n```\nHope this helps.";
        let c = parse_candidate(answer).unwrap();
        assert_eq!(c.owner_name, "Franz Beispiel");
        assert_eq!(c.creditors.first(), Some("Bank Y AG"));
        assert!(c.claim_amount.is_empty());
        assert!(c.owner_address.is_empty());
    }

    #[test]
    fn owner_list_is_joined() {
        let c = parse_candidate(r#"{"owner_name":["Maria Muster","Hans Muster"]}"#).unwrap();
        assert_eq!(c.owner_name, "Maria Muster / Hans Muster");
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_candidate("I could not find any owner.").is_none());
        assert!(parse_candidate("} {").is_none());
        assert!(parse_candidate("[1, 2]").is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("Größe", 3), "Grö");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn patterns_only_resolves_to_none() {
        let config = EnricherConfig::builder().patterns_only(true).build().unwrap();
        assert!(resolve_provider(&config).unwrap().is_none());
    }
}

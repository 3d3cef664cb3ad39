//! Orchestration: one run over the eligible records of a store.
//!
//! ## Per-record flow
//!
//! ```text
//! fetch fresh ─▶ eligible? ─▶ attachments ─▶ none ──────────────▶ Unreadable
//!                               │
//!                               ▼
//!                           download ─▶ transport error ─────────▶ (no write)
//!                               │
//!                               ▼
//!                          page text ─▶ text tiers ─▶ identity? ─▶ Complete
//!                               │                      └─ no ────▶ Incomplete
//!                               ▼ (scanned)
//!                       vision budget? ─ no ─────────────────────▶ Deferred
//!                               │
//!                               ▼
//!                          vision tier ─▶ identity? ─▶ Complete
//!                                           └─ no ────────────────▶ Unreadable
//! ```
//!
//! Each record's write happens immediately after its extraction. Records
//! are processed one at a time with a fixed pause in between; a stop
//! request is honoured between records, never inside one.

use crate::config::{EnricherConfig, TextStrategy};
use crate::error::EnricherError;
use crate::pipeline::attachments::{pick_attachment, AttachmentSource, EdikteClient};
use crate::pipeline::encode::encode_pages;
use crate::pipeline::llm::{resolve_provider, LlmExtractor, ModelExtractor};
use crate::pipeline::patterns::PatternExtractor;
use crate::pipeline::render::{meaningful_chars, DocumentRenderer, PdfiumRenderer};
use crate::pipeline::validate::Validator;
use crate::record::{AnalysisStatus, AuctionRecord, ExtractionCandidate, RecordUpdate};
use crate::state::{self, Transition, MARKER_RETRY, NOTE_NO_ATTACHMENT};
use crate::store::RecordStore;
use crate::sweep::{sweep, SweepReport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Note line for a parseable document without identity data.
pub const NOTE_NO_OWNER: &str = "no owner data found in the document";
const NOTE_NO_VISION_MODEL: &str = "scanned document; no vision model configured";
const NOTE_VISION_FAILED: &str = "scanned document, permanently unreadable (vision attempt found no owner)";
const NOTE_RENDER_FAILED: &str = "scanned document, permanently unreadable (pages could not be rendered)";
const NOTE_NOT_A_PDF: &str = "attachment is not a PDF";
const NOTE_CORRUPT: &str = "document could not be opened";

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Written as `AnalyzedComplete`.
    Complete,
    /// Written as `AnalyzedIncomplete`.
    Incomplete,
    /// Written as `Unreadable`.
    Unreadable,
    /// Scanned document left for a later run: the vision budget was spent.
    Deferred,
    /// Not eligible on the fresh read (status, workflow phase, no link).
    Skipped,
    /// Notice page or download failed; nothing written.
    TransportFailed,
}

impl RecordOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RecordOutcome::Complete => "complete",
            RecordOutcome::Incomplete => "incomplete",
            RecordOutcome::Unreadable => "unreadable",
            RecordOutcome::Deferred => "deferred",
            RecordOutcome::Skipped => "skipped",
            RecordOutcome::TransportFailed => "transport failed",
        }
    }

    fn from_status(status: AnalysisStatus) -> Self {
        match status {
            AnalysisStatus::AnalyzedComplete => RecordOutcome::Complete,
            AnalysisStatus::AnalyzedIncomplete => RecordOutcome::Incomplete,
            AnalysisStatus::Unreadable => RecordOutcome::Unreadable,
            AnalysisStatus::NotAnalyzed => RecordOutcome::Skipped,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sweep: SweepReport,
    pub queued: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub unreadable: usize,
    pub deferred: usize,
    pub skipped: usize,
    /// Transport failures and failed record-store writes.
    pub errors: usize,
    pub text_model_calls: usize,
    pub vision_calls: usize,
    pub stopped_early: bool,
}

impl RunSummary {
    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Complete => self.complete += 1,
            RecordOutcome::Incomplete => self.incomplete += 1,
            RecordOutcome::Unreadable => self.unreadable += 1,
            RecordOutcome::Deferred => self.deferred += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::TransportFailed => self.errors += 1,
        }
    }

    /// Records that reached a decision or were looked at this run.
    pub fn processed(&self) -> usize {
        self.complete + self.incomplete + self.unreadable + self.deferred + self.skipped + self.errors
    }
}

/// Drives the sweep and the per-record pipeline against one store.
pub struct Enricher {
    config: EnricherConfig,
    store: Arc<dyn RecordStore>,
    source: Arc<dyn AttachmentSource>,
    renderer: Arc<dyn DocumentRenderer>,
    model: Option<Arc<dyn ModelExtractor>>,
    patterns: PatternExtractor,
    validator: Validator,
    stop: Arc<AtomicBool>,
    text_calls: AtomicUsize,
    vision_calls: AtomicUsize,
}

impl Enricher {
    /// Assemble an enricher from explicit collaborators, without a model.
    pub fn new(
        config: EnricherConfig,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn AttachmentSource>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        let patterns = PatternExtractor::new(config.rules.clone());
        let validator = Validator::new(config.rules.clone());
        Self {
            config,
            store,
            source,
            renderer,
            model: None,
            patterns,
            validator,
            stop: Arc::new(AtomicBool::new(false)),
            text_calls: AtomicUsize::new(0),
            vision_calls: AtomicUsize::new(0),
        }
    }

    /// Enable the model tiers.
    pub fn with_model(mut self, model: Arc<dyn ModelExtractor>) -> Self {
        self.model = Some(model);
        self
    }

    /// Production wiring: registry client, pdfium renderer and whatever model
    /// provider the configuration resolves to.
    pub fn with_defaults(
        config: EnricherConfig,
        store: Arc<dyn RecordStore>,
        pdfium_lib: Option<PathBuf>,
    ) -> Result<Self, EnricherError> {
        let source = Arc::new(EdikteClient::new(config.download_timeout_secs)?);
        let renderer = Arc::new(PdfiumRenderer::new(
            pdfium_lib,
            config.render_scale,
            config.max_rendered_pixels,
        )?);
        let provider = resolve_provider(&config)?;
        let model = provider.map(|p| Arc::new(LlmExtractor::new(p, &config)) as Arc<dyn ModelExtractor>);

        let mut enricher = Self::new(config, store, source, renderer);
        enricher.model = model;
        Ok(enricher)
    }

    /// Setting this flag stops the run before the next record.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    fn is_protected(&self, phase: Option<&str>) -> bool {
        self.config.is_protected_phase(phase)
    }

    /// Sweep (if enabled), then process the bounded queue of eligible records.
    ///
    /// Only fatal errors and a failed record listing end the run early; a
    /// single record's failure is counted and the run moves on.
    pub async fn run(&self) -> Result<RunSummary, EnricherError> {
        let mut summary = RunSummary::default();
        let cb = self.config.progress_callback.clone();

        if self.config.sweep_enabled {
            match sweep(self.store.as_ref(), &self.config).await {
                Ok(report) => {
                    summary.sweep = report;
                    if let Some(ref cb) = cb {
                        cb.on_sweep_complete(&report);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Sweep skipped: {}", e),
            }
        }

        let records = self.store.list_records().await?;
        let queue: Vec<AuctionRecord> = records
            .into_iter()
            .filter(|r| state::is_eligible(r, |p| self.is_protected(p)))
            .take(self.config.max_records_per_run)
            .collect();
        summary.queued = queue.len();
        info!("{} record(s) queued", queue.len());
        if let Some(ref cb) = cb {
            cb.on_run_start(queue.len());
        }

        let total = queue.len();
        for (i, record) in queue.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested; {} record(s) left for the next run", total - i);
                summary.stopped_early = true;
                break;
            }
            if i > 0 && self.config.record_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.record_delay_ms)).await;
            }
            if let Some(ref cb) = cb {
                cb.on_record_start(i + 1, total, &record.title);
            }

            let outcome = match self.enrich_record(&record.id).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("'{}': {}", record.title, e);
                    RecordOutcome::TransportFailed
                }
            };
            info!("[{}/{}] {} → {}", i + 1, total, record.title, outcome.label());
            summary.count(outcome);
            if let Some(ref cb) = cb {
                cb.on_record_done(i + 1, total, &record.id, &outcome);
            }
        }

        summary.text_model_calls = self.text_calls.load(Ordering::SeqCst);
        summary.vision_calls = self.vision_calls.load(Ordering::SeqCst);
        if let Some(ref cb) = cb {
            cb.on_run_complete(summary.processed(), summary.stopped_early);
        }
        Ok(summary)
    }

    /// Process one record, re-reading it first. Returns `Err` only when the
    /// record store fails or the error is fatal.
    pub async fn enrich_record(&self, id: &str) -> Result<RecordOutcome, EnricherError> {
        let record = self.store.fetch_record(id).await?;
        if !state::is_eligible(&record, |p| self.is_protected(p)) {
            debug!("'{}' no longer eligible ({:?})", record.title, record.status);
            return Ok(RecordOutcome::Skipped);
        }
        let Some(detail_url) = record.detail_url.as_deref() else {
            warn!("'{}' has no notice link", record.title);
            return Ok(RecordOutcome::Skipped);
        };

        let attachments = match self.source.list_attachments(detail_url).await {
            Ok(a) => a,
            Err(e) => {
                warn!("'{}': notice page: {}", record.title, e);
                return Ok(RecordOutcome::TransportFailed);
            }
        };
        let Some(attachment) = pick_attachment(&attachments, &self.config.rules) else {
            return self
                .finish(&record, AnalysisStatus::Unreadable, None, None, NOTE_NO_ATTACHMENT)
                .await;
        };
        let document_url = attachment.url.as_str();
        debug!("'{}': using {}", record.title, attachment.filename);

        let pdf = match self.source.download(document_url).await {
            Ok(bytes) => bytes,
            Err(EnricherError::NotAPdf { .. }) => {
                return self
                    .finish(&record, AnalysisStatus::AnalyzedIncomplete, None, Some(document_url), NOTE_NOT_A_PDF)
                    .await;
            }
            Err(e) => {
                warn!("'{}': download: {}", record.title, e);
                return Ok(RecordOutcome::TransportFailed);
            }
        };

        let text = match self.renderer.extract_text(&pdf).await {
            Ok(t) => t,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("'{}': {}", record.title, e);
                return self
                    .finish(&record, AnalysisStatus::AnalyzedIncomplete, None, Some(document_url), NOTE_CORRUPT)
                    .await;
            }
        };

        if meaningful_chars(&text) < self.config.scanned_text_threshold {
            return self.enrich_scanned(&record, &pdf, &text, document_url).await;
        }

        let candidate = self.text_tiers(&text).await;
        if candidate.has_identity_data() {
            self.finish(&record, AnalysisStatus::AnalyzedComplete, Some(&candidate), Some(document_url), "")
                .await
        } else {
            self.finish(
                &record,
                AnalysisStatus::AnalyzedIncomplete,
                Some(&candidate),
                Some(document_url),
                NOTE_NO_OWNER,
            )
            .await
        }
    }

    /// Tiers 1 and 2 over extractable text, merged and validated.
    async fn text_tiers(&self, text: &str) -> ExtractionCandidate {
        let grammar = self.validator.validate(&self.patterns.extract(text));

        match self.config.text_strategy {
            TextStrategy::PatternFirst => {
                if grammar.has_identity_data() {
                    return grammar;
                }
                let mut merged = grammar;
                if let Some(model) = self.text_model(text).await {
                    merged.fill_missing_from(&self.validator.validate(&model));
                }
                merged
            }
            TextStrategy::ModelFirst => match self.text_model(text).await {
                Some(model) => {
                    let mut merged = self.validator.validate(&model);
                    merged.fill_missing_from(&grammar);
                    merged
                }
                None => grammar,
            },
        }
    }

    /// Tier 2, if a model is configured and the per-run budget allows.
    async fn text_model(&self, text: &str) -> Option<ExtractionCandidate> {
        let model = self.model.as_ref()?;
        if !take_budget(&self.text_calls, self.config.max_text_model_calls_per_run) {
            debug!("Text-tier budget spent; pattern result only");
            return None;
        }
        model.extract_from_text(text).await
    }

    /// Tier 3 for documents without a text layer.
    async fn enrich_scanned(
        &self,
        record: &AuctionRecord,
        pdf: &[u8],
        text: &str,
        document_url: &str,
    ) -> Result<RecordOutcome, EnricherError> {
        // A few stray characters of text can still hold a land-registry line.
        let grammar = self.validator.validate(&self.patterns.extract(text));
        if grammar.has_identity_data() {
            return self
                .finish(record, AnalysisStatus::AnalyzedComplete, Some(&grammar), Some(document_url), "")
                .await;
        }

        let Some(model) = self.model.as_ref() else {
            return self
                .finish(
                    record,
                    AnalysisStatus::AnalyzedIncomplete,
                    Some(&grammar),
                    Some(document_url),
                    NOTE_NO_VISION_MODEL,
                )
                .await;
        };
        if !take_budget(&self.vision_calls, self.config.max_vision_calls_per_run) {
            info!("'{}': scanned, vision budget spent; deferred", record.title);
            return Ok(RecordOutcome::Deferred);
        }

        let pages = match self.renderer.render_pages(pdf, self.config.vision_max_pages).await {
            Ok(pages) => pages,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("'{}': {}", record.title, e);
                Vec::new()
            }
        };
        let images = encode_pages(&pages);
        if images.is_empty() {
            return self
                .finish(record, AnalysisStatus::Unreadable, None, Some(document_url), NOTE_RENDER_FAILED)
                .await;
        }

        let mut candidate = model
            .extract_from_pages(images)
            .await
            .map(|c| self.validator.validate(&c))
            .unwrap_or_default();
        candidate.fill_missing_from(&grammar);

        if candidate.has_identity_data() {
            self.finish(record, AnalysisStatus::AnalyzedComplete, Some(&candidate), Some(document_url), "")
                .await
        } else {
            self.finish(
                record,
                AnalysisStatus::Unreadable,
                Some(&candidate),
                Some(document_url),
                NOTE_VISION_FAILED,
            )
            .await
        }
    }

    /// Write the result of one record and map it to an outcome.
    async fn finish(
        &self,
        record: &AuctionRecord,
        status: AnalysisStatus,
        candidate: Option<&ExtractionCandidate>,
        document_url: Option<&str>,
        diagnostic: &str,
    ) -> Result<RecordOutcome, EnricherError> {
        let status = record
            .status
            .apply(Transition::Analyzed(status))
            .map_err(|e| EnricherError::Internal(e.to_string()))?;

        let mut update = RecordUpdate::status(status).with_note(compose_note(
            candidate,
            document_url,
            diagnostic,
            state::note_marks_retried(&record.note),
        ));

        if let Some(c) = candidate {
            if status == AnalysisStatus::AnalyzedComplete {
                update.owner_name = non_empty(&c.owner_name);
                update.owner_address = non_empty(&c.owner_address);
                update.owner_postal_city = non_empty(&c.owner_postal_city);
            }
            if !c.creditors.is_empty() {
                update.creditors = Some(c.creditors.clone().into());
            }
            update.claim_amount = non_empty(&c.claim_amount);
        }

        self.store.update_record(&record.id, &update).await?;
        Ok(RecordOutcome::from_status(status))
    }
}

/// Reserve one call from `counter` if it is below `cap`.
fn take_budget(counter: &AtomicUsize, cap: usize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < cap).then_some(n + 1))
        .is_ok()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Note written with every result, one item per line: the retry marker,
/// the diagnostic, then the document link, creditors and claim. The store
/// truncates long notes from the end, so the markers the sweep depends on
/// come first.
pub fn compose_note(
    candidate: Option<&ExtractionCandidate>,
    document_url: Option<&str>,
    diagnostic: &str,
    keep_retry_marker: bool,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    if keep_retry_marker {
        lines.push(MARKER_RETRY.to_string());
    }
    if !diagnostic.is_empty() {
        lines.push(diagnostic.to_string());
    }
    if let Some(url) = document_url {
        lines.push(format!("Document: {url}"));
    }
    if let Some(c) = candidate {
        if !c.creditors.is_empty() {
            lines.push(format!("Creditors: {}", c.creditors.join(" | ")));
        }
        if !c.claim_amount.is_empty() {
            lines.push(format!("Claim: {}", c.claim_amount));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{note_marks_retried, note_marks_unreadable};

    #[test]
    fn note_lists_parts_in_order() {
        let c = ExtractionCandidate {
            creditors: ["Bank X AG", "Bank Y AG"].into_iter().collect(),
            claim_amount: "EUR 150.000,--".into(),
            ..Default::default()
        };
        let note = compose_note(Some(&c), Some("https://x/$file/G.pdf"), NOTE_NO_OWNER, false);
        assert_eq!(
            note,
            "no owner data found in the document\nDocument: https://x/$file/G.pdf\nCreditors: Bank X AG | Bank Y AG\nClaim: EUR 150.000,--"
        );
    }

    #[test]
    fn note_keeps_retry_marker() {
        let note = compose_note(None, None, NOTE_NO_OWNER, true);
        assert!(note.starts_with(MARKER_RETRY));
        assert!(note_marks_retried(&note));
    }

    #[test]
    fn terminal_notes_carry_markers() {
        assert!(note_marks_unreadable(NOTE_VISION_FAILED));
        assert!(note_marks_unreadable(NOTE_RENDER_FAILED));
        assert!(note_marks_unreadable(NOTE_NO_VISION_MODEL));
        assert!(NOTE_NO_ATTACHMENT.contains("no attachment"));
    }

    #[test]
    fn budget_stops_at_cap() {
        let counter = AtomicUsize::new(0);
        assert!(take_budget(&counter, 2));
        assert!(take_budget(&counter, 2));
        assert!(!take_budget(&counter, 2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!take_budget(&AtomicUsize::new(0), 0));
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut s = RunSummary::default();
        for o in [RecordOutcome::Complete, RecordOutcome::Deferred, RecordOutcome::TransportFailed] {
            s.count(o);
        }
        assert_eq!((s.complete, s.deferred, s.errors, s.processed()), (1, 1, 1, 3));
    }
}

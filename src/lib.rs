//! # edikte-enricher
//!
//! Turn court-auction appraisal and land-registry PDFs into owner and
//! creditor data, and keep a Notion database of auction notices converging
//! towards a final analysis state for every record.
//!
//! ## Why tiers?
//!
//! The documents attached to Austrian foreclosure notices come in at least
//! two layouts, some are scans without a text layer, and naive parsing
//! happily returns the notary or the court instead of the owner. Extraction
//! therefore escalates by cost: a deterministic grammar first, a language
//! model over the page text second, and a vision model over rendered pages
//! only for scans. Every result passes the same validator before it is
//! written.
//!
//! ## Pipeline Overview
//!
//! ```text
//! record store
//!  │
//!  ├─ 0. Sweep      re-queue incomplete records once, repair court-name owners
//!  ├─ 1. Discover   notice page → PDF attachments → pick the appraisal
//!  ├─ 2. Render     page text (pdfium, spawn_blocking)
//!  ├─ 3. Tier 1     pattern grammar (land-registry sections, appraisal cover)
//!  ├─ 4. Tier 2     language model over a bounded text excerpt
//!  ├─ 5. Tier 3     vision model over rendered pages (scanned documents only)
//!  ├─ 6. Validate   strip artefacts, drop non-parties, dedup creditors
//!  └─ 7. Write back status + fields + note, immediately per record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edikte_enricher::{Enricher, EnricherConfig, NotionStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = NotionStore::new(std::env::var("NOTION_TOKEN")?, &std::env::var("NOTION_DATABASE_ID")?)?;
//!     let config = EnricherConfig::builder().max_records_per_run(20).build()?;
//!     let enricher = Enricher::with_defaults(config, Arc::new(store), None)?;
//!     let summary = enricher.run().await?;
//!     eprintln!("{} complete, {} incomplete, {} unreadable",
//!         summary.complete, summary.incomplete, summary.unreadable);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `edikte-enricher` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod enrich;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod state;
pub mod store;
pub mod sweep;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnricherConfig, EnricherConfigBuilder, KeywordRules, TextStrategy};
pub use enrich::{Enricher, RecordOutcome, RunSummary};
pub use error::EnricherError;
pub use pipeline::attachments::{pick_attachment, AttachmentSource, EdikteClient};
pub use pipeline::llm::{LlmExtractor, ModelExtractor};
pub use pipeline::patterns::PatternExtractor;
pub use pipeline::render::{DocumentRenderer, PdfiumRenderer};
pub use pipeline::validate::Validator;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use record::{AnalysisStatus, Attachment, AuctionRecord, CreditorList, ExtractionCandidate, RecordUpdate};
pub use store::{clean_database_id, MemoryStore, NotionStore, PropertyNames, RecordStore};
pub use sweep::{sweep, SweepReport};

//! Pipeline stages for document extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the I/O-bound ones sit behind a trait the orchestrator can fake.
//!
//! ## Data Flow
//!
//! ```text
//! attachments ──▶ render ──▶ patterns ──▶ llm (text) ──▶ validate
//!  (notice page)   (pdfium)   (tier 1)     (tier 2)
//!                     │
//!                     └──▶ encode ──▶ llm (vision) ──▶ validate
//!                                      (tier 3, scanned documents only)
//! ```
//!
//! 1. [`attachments`]: list a notice's PDFs, pick the appraisal, download it
//! 2. [`render`]: page text, or page images for scanned documents;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`patterns`]: deterministic grammar for the two known layouts
//! 4. [`encode`]: PNG + base64 for the vision request
//! 5. [`llm`]: model tiers with retry/backoff; the only stage that
//!    talks to a model
//! 6. [`validate`]: field cleanup shared by every tier

pub mod attachments;
pub mod encode;
pub mod llm;
pub mod patterns;
pub mod render;
pub mod validate;

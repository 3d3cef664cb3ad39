//! Progress-callback trait for per-record run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::EnricherConfigBuilder::progress_callback`] to receive
//! events as the enricher works through its queue. The CLI uses this to
//! drive its progress bar; the library itself only logs.
//!
//! # Example
//!
//! ```rust
//! use edikte_enricher::{EnricherConfig, RecordOutcome, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     complete: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_record_done(&self, _index: usize, _total: usize, _id: &str, outcome: &RecordOutcome) {
//!         if matches!(outcome, RecordOutcome::Complete) {
//!             self.complete.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { complete: AtomicUsize::new(0) });
//! let config = EnricherConfig::builder()
//!     .progress_callback(cb as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::enrich::RecordOutcome;
use crate::sweep::SweepReport;
use std::sync::Arc;

/// Called by the enricher as it processes each record.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after the convergence sweep, if it ran.
    fn on_sweep_complete(&self, report: &SweepReport) {
        let _ = report;
    }

    /// Called once the queue of eligible records is known.
    fn on_run_start(&self, queued: usize) {
        let _ = queued;
    }

    /// Called before a record is re-read and processed.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in the queue
    /// * `total`: queue length
    /// * `title`: record title for display
    fn on_record_start(&self, index: usize, total: usize, title: &str) {
        let _ = (index, total, title);
    }

    /// Called after the record's write-back (if any) finished.
    fn on_record_done(&self, index: usize, total: usize, id: &str, outcome: &RecordOutcome) {
        let _ = (index, total, id, outcome);
    }

    /// Called once after the last record, or after a stop request.
    fn on_run_complete(&self, processed: usize, stopped_early: bool) {
        let _ = (processed, stopped_early);
    }
}

/// A no-op implementation, handy as a default.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Shorthand for an optional, shared progress callback.
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

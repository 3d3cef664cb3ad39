//! Analysis state machine and diagnostic-note conventions.
//!
//! Markers always lead the note. The store cuts long notes from the end,
//! so a marker written first is still there when the record is read back.
//!
//! ```text
//!                ┌──────────────► AnalyzedComplete ──┐ (court-name repair)
//!                │                                    │
//!  NotAnalyzed ──┼──────────────► AnalyzedIncomplete ─┤ (sweep, once)
//!       ▲        │                                    │
//!       │        └──────────────► Unreadable          │
//!       └─────────────────────────────────────────────┘
//! ```
//!
//! `Unreadable` has no outgoing edge. The sweep may reset an incomplete
//! record only while its note carries neither the scanned/unreadable marker
//! nor the retry marker, which bounds every record to one sweep reset
//! without new evidence.

use crate::record::{AnalysisStatus, AuctionRecord};
use std::fmt;

/// Note text for a notice without any PDF attachment.
pub const NOTE_NO_ATTACHMENT: &str = "no attachment found on the notice page";
/// Marker for documents without extractable text.
pub const MARKER_SCANNED: &str = "scanned document";
/// Terminal marker written when the vision tier gave up.
pub const MARKER_UNREADABLE: &str = "permanently unreadable";
/// Marker the sweep appends when it resets a record.
pub const MARKER_RETRY: &str = "[retry scheduled]";

/// A requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The pipeline finished analysing a record with this result.
    Analyzed(AnalysisStatus),
    /// The convergence sweep re-queues an incomplete record.
    SweepReset,
    /// The court-name repair clears a wrongly populated owner.
    RepairReset,
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: AnalysisStatus,
    pub transition: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {:?} to a record in {:?}", self.transition, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl AnalysisStatus {
    /// Apply `transition`, returning the new status.
    pub fn apply(self, transition: Transition) -> Result<AnalysisStatus, InvalidTransition> {
        use AnalysisStatus::*;
        let next = match (self, transition) {
            (NotAnalyzed, Transition::Analyzed(to)) if to != NotAnalyzed => Some(to),
            (AnalyzedIncomplete, Transition::SweepReset) => Some(NotAnalyzed),
            (AnalyzedComplete | AnalyzedIncomplete, Transition::RepairReset) => Some(NotAnalyzed),
            _ => None,
        };
        next.ok_or(InvalidTransition {
            from: self,
            transition,
        })
    }

    /// Whether no automatic transition ever leaves this status.
    pub fn is_terminal(self) -> bool {
        self == AnalysisStatus::Unreadable
    }
}

/// Whether the note marks the record as scanned or unreadable.
pub fn note_marks_unreadable(note: &str) -> bool {
    let lower = note.to_lowercase();
    lower.contains(MARKER_SCANNED) || lower.contains(MARKER_UNREADABLE)
}

/// Whether the sweep already reset this record once.
pub fn note_marks_retried(note: &str) -> bool {
    note.contains(MARKER_RETRY)
}

/// Put the retry marker on the first line of the note, once.
pub fn with_retry_marker(note: &str) -> String {
    if note_marks_retried(note) {
        return note.to_string();
    }
    let note = note.trim();
    if note.is_empty() {
        MARKER_RETRY.to_string()
    } else {
        format!("{MARKER_RETRY}\n{note}")
    }
}

/// Whether the pipeline may analyse this record now.
pub fn is_eligible(record: &AuctionRecord, protected: impl Fn(Option<&str>) -> bool) -> bool {
    record.status == AnalysisStatus::NotAnalyzed && !protected(record.workflow_phase.as_deref())
}

/// Whether the sweep may reset this record.
pub fn is_sweepable(record: &AuctionRecord, protected: impl Fn(Option<&str>) -> bool) -> bool {
    record.status == AnalysisStatus::AnalyzedIncomplete
        && !note_marks_unreadable(&record.note)
        && !note_marks_retried(&record.note)
        && !protected(record.workflow_phase.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnalysisStatus::*;

    #[test]
    fn analysis_leaves_not_analyzed_only() {
        assert_eq!(
            NotAnalyzed.apply(Transition::Analyzed(AnalyzedComplete)),
            Ok(AnalyzedComplete)
        );
        assert!(AnalyzedComplete
            .apply(Transition::Analyzed(AnalyzedIncomplete))
            .is_err());
        assert!(NotAnalyzed.apply(Transition::Analyzed(NotAnalyzed)).is_err());
    }

    #[test]
    fn unreadable_is_terminal() {
        assert!(Unreadable.is_terminal());
        for t in [
            Transition::SweepReset,
            Transition::RepairReset,
            Transition::Analyzed(AnalyzedComplete),
        ] {
            assert!(Unreadable.apply(t).is_err(), "{t:?} must be rejected");
        }
    }

    #[test]
    fn sweep_only_resets_incomplete() {
        assert_eq!(AnalyzedIncomplete.apply(Transition::SweepReset), Ok(NotAnalyzed));
        assert!(AnalyzedComplete.apply(Transition::SweepReset).is_err());
        assert_eq!(AnalyzedComplete.apply(Transition::RepairReset), Ok(NotAnalyzed));
    }

    #[test]
    fn retry_marker_is_added_once() {
        let once = with_retry_marker("no owner data found");
        assert!(note_marks_retried(&once));
        assert!(once.starts_with(MARKER_RETRY));
        assert_eq!(with_retry_marker(&once), once);
        assert_eq!(with_retry_marker(""), MARKER_RETRY);
    }

    #[test]
    fn sweepable_excludes_scanned_and_retried() {
        let mut rec = AuctionRecord {
            status: AnalyzedIncomplete,
            note: "no owner data found".into(),
            ..Default::default()
        };
        assert!(is_sweepable(&rec, |_| false));
        assert!(!is_sweepable(&rec, |_| true));
        rec.note = "Scanned document; no vision model configured".into();
        assert!(!is_sweepable(&rec, |_| false));
        rec.note = with_retry_marker("no owner data found");
        assert!(!is_sweepable(&rec, |_| false));
    }
}

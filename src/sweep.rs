//! Convergence sweep: re-queue incomplete records, repair court-name owners.
//!
//! Runs before enrichment. Two passes over one fresh listing:
//!
//! 1. **Repair**: a complete or incomplete record whose owner field holds a
//!    court's name has its owner fields cleared and goes back to
//!    `NotAnalyzed`. Once cleared it no longer matches, so the pass is safe
//!    to run every time.
//! 2. **Re-queue**: an incomplete record that is neither marked scanned /
//!    unreadable nor already retried goes back to `NotAnalyzed` with the
//!    retry marker appended to its note. The marker makes this a one-shot
//!    per record.
//!
//! Both passes share one write budget (`sweep_limit`). A single failed
//! write is logged and counted; only a failed listing aborts the sweep.

use crate::config::EnricherConfig;
use crate::error::EnricherError;
use crate::pipeline::validate::looks_like_court_name;
use crate::record::{AnalysisStatus, AuctionRecord, RecordUpdate};
use crate::state::{self, Transition};
use crate::store::RecordStore;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Court-name owners cleared and reset.
    pub repaired: usize,
    /// Incomplete records reset for another attempt.
    pub requeued: usize,
    /// Eligible records left for a later sweep because the budget ran out.
    pub over_limit: usize,
    /// Writes that failed.
    pub errors: usize,
}

impl SweepReport {
    pub fn writes(&self) -> usize {
        self.repaired + self.requeued
    }
}

/// Whether the repair pass applies to this record.
fn needs_court_name_repair(record: &AuctionRecord, config: &EnricherConfig) -> bool {
    !record.owner_name.is_empty()
        && looks_like_court_name(&record.owner_name)
        && record.status.apply(Transition::RepairReset).is_ok()
        && !config.is_protected_phase(record.workflow_phase.as_deref())
}

/// Run both sweep passes against `store`.
pub async fn sweep(store: &dyn RecordStore, config: &EnricherConfig) -> Result<SweepReport, EnricherError> {
    let records = store.list_records().await?;
    let mut report = SweepReport::default();
    let limit = config.sweep_limit;
    let mut repaired_ids: Vec<&str> = Vec::new();

    for record in records.iter().filter(|r| needs_court_name_repair(r, config)) {
        if report.writes() + report.errors >= limit {
            report.over_limit += 1;
            continue;
        }
        let update = RecordUpdate {
            status: Some(AnalysisStatus::NotAnalyzed),
            owner_name: Some(String::new()),
            owner_address: Some(String::new()),
            owner_postal_city: Some(String::new()),
            ..Default::default()
        };
        match store.update_record(&record.id, &update).await {
            Ok(()) => {
                info!("Repaired '{}': cleared court name {:?}", record.title, record.owner_name);
                report.repaired += 1;
                repaired_ids.push(&record.id);
            }
            Err(e) => {
                warn!("Repair of '{}' failed: {}", record.id, e);
                report.errors += 1;
            }
        }
    }

    let protected = |phase: Option<&str>| config.is_protected_phase(phase);
    for record in records
        .iter()
        .filter(|r| !repaired_ids.contains(&r.id.as_str()))
        .filter(|r| state::is_sweepable(r, protected))
    {
        if report.writes() + report.errors >= limit {
            report.over_limit += 1;
            continue;
        }
        let status = match record.status.apply(Transition::SweepReset) {
            Ok(s) => s,
            Err(e) => {
                debug!("Not re-queueing '{}': {}", record.id, e);
                continue;
            }
        };
        let update = RecordUpdate::status(status).with_note(state::with_retry_marker(&record.note));
        match store.update_record(&record.id, &update).await {
            Ok(()) => {
                debug!("Re-queued '{}'", record.title);
                report.requeued += 1;
            }
            Err(e) => {
                warn!("Re-queue of '{}' failed: {}", record.id, e);
                report.errors += 1;
            }
        }
    }

    info!(
        "Sweep: {} repaired, {} re-queued, {} over limit, {} error(s)",
        report.repaired, report.requeued, report.over_limit, report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{note_marks_retried, MARKER_UNREADABLE};
    use crate::store::MemoryStore;

    fn rec(id: &str, status: AnalysisStatus, owner: &str, note: &str) -> AuctionRecord {
        AuctionRecord {
            id: id.into(),
            title: format!("Objekt {id}"),
            status,
            owner_name: owner.into(),
            note: note.into(),
            ..Default::default()
        }
    }

    fn config() -> EnricherConfig {
        EnricherConfig::builder().build().unwrap()
    }

    #[tokio::test]
    async fn requeues_incomplete_once() {
        let store = MemoryStore::new(vec![rec("a", AnalysisStatus::AnalyzedIncomplete, "", "no owner data found")]);
        let first = sweep(&store, &config()).await.unwrap();
        assert_eq!(first.requeued, 1);
        let a = store.record("a").unwrap();
        assert_eq!(a.status, AnalysisStatus::NotAnalyzed);
        assert!(note_marks_retried(&a.note));

        // Another pipeline pass leaves it incomplete again, note unchanged.
        store.replace(AuctionRecord {
            status: AnalysisStatus::AnalyzedIncomplete,
            ..a
        });
        let second = sweep(&store, &config()).await.unwrap();
        assert_eq!(second.requeued, 0);
        assert_eq!(store.writes_for("a").len(), 1);
    }

    #[tokio::test]
    async fn never_touches_unreadable_or_scanned() {
        let store = MemoryStore::new(vec![
            rec("u", AnalysisStatus::Unreadable, "Bezirksgericht Graz", MARKER_UNREADABLE),
            rec("s", AnalysisStatus::AnalyzedIncomplete, "", "Scanned document; no vision model configured"),
        ]);
        let report = sweep(&store, &config()).await.unwrap();
        assert_eq!(report.writes(), 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn repairs_court_names() {
        let store = MemoryStore::new(vec![
            rec("c", AnalysisStatus::AnalyzedComplete, "Bezirksgericht Leoben", ""),
            rec("ok", AnalysisStatus::AnalyzedComplete, "Maria Muster", ""),
        ]);
        let report = sweep(&store, &config()).await.unwrap();
        assert_eq!(report.repaired, 1);
        let c = store.record("c").unwrap();
        assert_eq!(c.status, AnalysisStatus::NotAnalyzed);
        assert!(c.owner_name.is_empty());
        assert_eq!(store.record("ok").unwrap().status, AnalysisStatus::AnalyzedComplete);

        let again = sweep(&store, &config()).await.unwrap();
        assert_eq!(again.repaired, 0);
    }

    #[tokio::test]
    async fn respects_limit_and_protected_phases() {
        let mut archived = rec("p", AnalysisStatus::AnalyzedIncomplete, "", "");
        archived.workflow_phase = Some("🗄 Archiviert".into());
        let store = MemoryStore::new(vec![
            archived,
            rec("a", AnalysisStatus::AnalyzedIncomplete, "", ""),
            rec("b", AnalysisStatus::AnalyzedIncomplete, "", ""),
            rec("c", AnalysisStatus::AnalyzedIncomplete, "", ""),
        ]);
        let cfg = EnricherConfig::builder().sweep_limit(2).build().unwrap();
        let report = sweep(&store, &cfg).await.unwrap();
        assert_eq!(report.requeued, 2);
        assert_eq!(report.over_limit, 1);
        assert!(store.writes_for("p").is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_counted_not_fatal() {
        let store = MemoryStore::new(vec![
            rec("a", AnalysisStatus::AnalyzedIncomplete, "", ""),
            rec("b", AnalysisStatus::AnalyzedIncomplete, "", ""),
        ]);
        store.fail_updates_for("a");
        let report = sweep(&store, &config()).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.requeued, 1);
    }
}

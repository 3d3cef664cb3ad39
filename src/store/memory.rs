use super::RecordStore;
use crate::error::EnricherError;
use crate::record::{AuctionRecord, RecordUpdate};
use async_trait::async_trait;
use std::sync::Mutex;

/// In-memory [`RecordStore`]. Updates are applied to the stored records and
/// kept in a write log, in order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AuctionRecord>>,
    writes: Mutex<Vec<(String, RecordUpdate)>>,
    failing_ids: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(records: Vec<AuctionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Current copy of one record.
    pub fn record(&self, id: &str) -> Option<AuctionRecord> {
        lock(&self.records).iter().find(|r| r.id == id).cloned()
    }

    /// Every update written so far.
    pub fn writes(&self) -> Vec<(String, RecordUpdate)> {
        lock(&self.writes).clone()
    }

    /// Updates written for one record.
    pub fn writes_for(&self, id: &str) -> Vec<RecordUpdate> {
        lock(&self.writes)
            .iter()
            .filter(|(w, _)| w == id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Make every update for `id` fail with a store error.
    pub fn fail_updates_for(&self, id: &str) {
        lock(&self.failing_ids).push(id.to_string());
    }

    /// Replace a record, as a concurrent human edit would.
    pub fn replace(&self, record: AuctionRecord) {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(&self) -> Result<Vec<AuctionRecord>, EnricherError> {
        Ok(lock(&self.records).clone())
    }

    async fn fetch_record(&self, id: &str) -> Result<AuctionRecord, EnricherError> {
        self.record(id).ok_or_else(|| EnricherError::RecordStore {
            operation: "fetch".into(),
            detail: format!("no record '{id}'"),
        })
    }

    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), EnricherError> {
        if lock(&self.failing_ids).iter().any(|f| f == id) {
            return Err(EnricherError::RecordStore {
                operation: "update".into(),
                detail: format!("update rejected for '{id}'"),
            });
        }
        let mut records = lock(&self.records);
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EnricherError::RecordStore {
                operation: "update".into(),
                detail: format!("no record '{id}'"),
            })?;
        update.apply_to(record);
        lock(&self.writes).push((id.to_string(), update.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AnalysisStatus;

    #[tokio::test]
    async fn updates_are_applied_and_logged() {
        let store = MemoryStore::new(vec![AuctionRecord {
            id: "a".into(),
            ..Default::default()
        }]);
        store
            .update_record("a", &RecordUpdate::status(AnalysisStatus::Unreadable))
            .await
            .unwrap();
        assert_eq!(store.record("a").unwrap().status, AnalysisStatus::Unreadable);
        assert_eq!(store.writes_for("a").len(), 1);
        assert!(store.update_record("zz", &RecordUpdate::default()).await.is_err());
    }
}

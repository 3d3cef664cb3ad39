//! Record-store boundary.
//!
//! The pipeline only ever sees typed [`AuctionRecord`]s and writes
//! [`RecordUpdate`]s; property names, payload shapes and pagination belong
//! to the implementation. [`NotionStore`] is the production store,
//! [`MemoryStore`] keeps records in memory and records every write.

mod memory;
mod notion;

pub use memory::MemoryStore;
pub use notion::{clean_database_id, NotionStore, PropertyNames};

use crate::error::EnricherError;
use crate::record::{AuctionRecord, RecordUpdate};
use async_trait::async_trait;

/// Paginated listing, fresh single-record reads and partial updates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record in the store, all pages.
    async fn list_records(&self) -> Result<Vec<AuctionRecord>, EnricherError>;

    /// Re-read one record. Eligibility is always decided on this fresh copy.
    async fn fetch_record(&self, id: &str) -> Result<AuctionRecord, EnricherError>;

    /// Write a partial property set. Fields left `None` are not sent.
    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), EnricherError>;
}

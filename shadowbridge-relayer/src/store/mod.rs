//! Transfer persistence.
//!
//! Records are created once by intake and advanced by the processor. The
//! only deletion is intake withdrawing a record it failed to queue. Callers only see [`TransferStore`], so the backing engine can be
//! swapped without touching intake or the processor.

use async_trait::async_trait;
use shadowbridge_common::{TransferRecord, TransferStats, TransferUpdate};
use uuid::Uuid;

use crate::error::StoreError;

pub mod mem;
pub mod sled;

pub use self::mem::InMemoryTransferStore;
pub use self::sled::SledTransferStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record. Ids are unique.
    async fn create(&self, record: TransferRecord) -> StoreResult<TransferRecord>;

    /// Apply `update` and refresh `updated_at`. `Ok(None)` if `id` is unknown.
    async fn update(&self, id: Uuid, update: TransferUpdate) -> StoreResult<Option<TransferRecord>>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<TransferRecord>>;

    /// All records, newest first.
    async fn list(&self) -> StoreResult<Vec<TransferRecord>>;

    async fn stats(&self) -> StoreResult<TransferStats>;

    /// Delete a record. Returns whether it existed.
    async fn remove(&self, id: Uuid) -> StoreResult<bool>;
}

/// Newest first; ties broken by id so the order is stable.
fn sort_newest_first(records: &mut [TransferRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

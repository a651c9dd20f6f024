use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shadowbridge_common::{TransferRecord, TransferStats, TransferUpdate};
use ::sled::{Db, Tree};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{sort_newest_first, StoreResult, TransferStore};
use crate::error::StoreError;

const TRANSFERS_TREE: &str = "transfers";

/// Transfer records persisted as JSON in a sled tree keyed by id.
#[derive(Clone)]
pub struct SledTransferStore {
    db: Arc<Db>,
    transfers: Tree,
    /// Serializes read-modify-write cycles so two updates never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl SledTransferStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!(
                        "failed to create directory for transfer db at {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }
        Self::from_db(::sled::open(path)?)
    }

    /// Temporary database removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(::sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let transfers = db.open_tree(TRANSFERS_TREE)?;
        Ok(Self {
            db: Arc::new(db),
            transfers,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, id: Uuid) -> StoreResult<Option<TransferRecord>> {
        match self.transfers.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &TransferRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(record)?;
        self.transfers.insert(record.id.as_bytes(), value)?;
        Ok(())
    }

    fn all(&self) -> StoreResult<Vec<TransferRecord>> {
        self.transfers
            .iter()
            .values()
            .map(|value| -> StoreResult<TransferRecord> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }
}

impl std::fmt::Debug for SledTransferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledTransferStore")
            .field("records", &self.transfers.len())
            .finish()
    }
}

#[async_trait]
impl TransferStore for SledTransferStore {
    async fn create(&self, record: TransferRecord) -> StoreResult<TransferRecord> {
        let _guard = self.write_lock.lock().await;
        if self.transfers.contains_key(record.id.as_bytes())? {
            return Err(StoreError::Duplicate(record.id));
        }
        self.write(&record)?;
        self.db.flush_async().await?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: TransferUpdate) -> StoreResult<Option<TransferRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.read(id)? else {
            return Ok(None);
        };
        record.apply(update, Utc::now())?;
        self.write(&record)?;
        self.db.flush_async().await?;
        Ok(Some(record))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<TransferRecord>> {
        self.read(id)
    }

    async fn list(&self) -> StoreResult<Vec<TransferRecord>> {
        let mut records = self.all()?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn stats(&self) -> StoreResult<TransferStats> {
        let records = self.all()?;
        Ok(TransferStats::from_records(&records))
    }

    async fn remove(&self, id: Uuid) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let existed = self.transfers.remove(id.as_bytes())?.is_some();
        self.db.flush_async().await?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::tests::record_at;
    use ethers::types::H256;
    use shadowbridge_common::TransferStatus;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.db");

        let record = record_at(0);
        let tx_hash = H256::repeat_byte(0xab);
        {
            let store = SledTransferStore::open(&path).unwrap();
            store.create(record.clone()).await.unwrap();
            for status in [
                TransferStatus::ProofVerifying,
                TransferStatus::ProofVerified,
                TransferStatus::Submitting,
            ] {
                store
                    .update(record.id, TransferUpdate::status(status))
                    .await
                    .unwrap();
            }
            store
                .update(record.id, TransferUpdate::settled(Some(tx_hash), Utc::now()))
                .await
                .unwrap();
        }

        let reopened = SledTransferStore::open(&path).unwrap();
        let stored = reopened.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Settled);
        assert_eq!(stored.tx_hash, Some(tx_hash));
        assert_eq!(stored.amount_base_units, record.amount_base_units);
        assert_eq!(stored.message_hash, record.message_hash);
        assert!(stored.settled_at.is_some());
    }

    #[tokio::test]
    async fn terminal_records_reject_updates() {
        let store = SledTransferStore::temporary().unwrap();
        let record = store.create(record_at(0)).await.unwrap();
        store
            .update(record.id, TransferUpdate::failed("boom"))
            .await
            .unwrap();

        let err = store
            .update(record.id, TransferUpdate::failed("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));
        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn list_and_stats_cover_all_records() {
        let store = SledTransferStore::temporary().unwrap();
        let older = store.create(record_at(-30)).await.unwrap();
        let newer = store.create(record_at(0)).await.unwrap();
        store
            .update(older.id, TransferUpdate::failed("rejected"))
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_transfers, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = SledTransferStore::temporary().unwrap();
        let record = record_at(0);
        store.create(record.clone()).await.unwrap();
        assert!(matches!(
            store.create(record).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn removed_record_stays_gone_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.db");
        let record = record_at(0);
        {
            let store = SledTransferStore::open(&path).unwrap();
            store.create(record.clone()).await.unwrap();
            assert!(store.remove(record.id).await.unwrap());
        }
        let store = SledTransferStore::open(&path).unwrap();
        assert!(store.get(record.id).await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().total_transfers, 0);
    }
}

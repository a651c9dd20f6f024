use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shadowbridge_common::{TransferRecord, TransferStats, TransferUpdate};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sort_newest_first, StoreResult, TransferStore};
use crate::error::StoreError;

/// Keeps every record in a map. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryTransferStore {
    transfers: Arc<RwLock<HashMap<Uuid, TransferRecord>>>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryTransferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransferStore").finish()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn create(&self, record: TransferRecord) -> StoreResult<TransferRecord> {
        let mut guard = self.transfers.write().await;
        if guard.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        guard.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: TransferUpdate) -> StoreResult<Option<TransferRecord>> {
        let mut guard = self.transfers.write().await;
        let Some(existing) = guard.get_mut(&id) else {
            return Ok(None);
        };
        // Apply to a copy so a rejected transition leaves the stored record intact.
        let mut updated = existing.clone();
        updated.apply(update, Utc::now())?;
        *existing = updated.clone();
        Ok(Some(updated))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<TransferRecord>> {
        Ok(self.transfers.read().await.get(&id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<TransferRecord>> {
        let mut records: Vec<_> = self.transfers.read().await.values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn stats(&self) -> StoreResult<TransferStats> {
        let guard = self.transfers.read().await;
        Ok(TransferStats::from_records(guard.values()))
    }

    async fn remove(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.transfers.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use ethers::types::{H256, U256};
    use shadowbridge_common::{ProofBundle, TransferSource, TransferStatus};

    pub(crate) fn record_at(offset_secs: i64) -> TransferRecord {
        let created = Utc::now() + Duration::seconds(offset_secs);
        TransferRecord {
            id: Uuid::new_v4(),
            sender: "0xsender".into(),
            recipient: "0xrecipient".into(),
            destination_chain: "ethereum-sepolia".into(),
            amount_usd: 250.0,
            amount_base_units: U256::from(250u64) * U256::exp10(18),
            fee_usd: 3.75,
            proofs: ProofBundle::new("0x11111111", "0x22222222", "0x33333333"),
            source_tx_hash: None,
            message_hash: H256::random(),
            status: TransferStatus::Queued,
            created_at: created,
            updated_at: created,
            settled_at: None,
            tx_hash: None,
            error: None,
            already_processed: false,
            metadata: None,
            source: TransferSource::Api,
        }
    }

    #[tokio::test]
    async fn update_unknown_id_returns_none() {
        let store = InMemoryTransferStore::new();
        let result = store
            .update(Uuid::new_v4(), TransferUpdate::status(TransferStatus::ProofVerifying))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_refreshes_updated_at() {
        let store = InMemoryTransferStore::new();
        let record = store.create(record_at(-60)).await.unwrap();

        let updated = store
            .update(record.id, TransferUpdate::status(TransferStatus::ProofVerifying))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, TransferStatus::ProofVerifying);
        assert!(updated.updated_at > record.updated_at);
        assert_eq!(updated.created_at, record.created_at);
    }

    #[tokio::test]
    async fn rejected_transition_keeps_stored_record() {
        let store = InMemoryTransferStore::new();
        let record = store.create(record_at(0)).await.unwrap();
        store
            .update(record.id, TransferUpdate::failed("verifier offline"))
            .await
            .unwrap();

        let err = store
            .update(record.id, TransferUpdate::status(TransferStatus::ProofVerifying))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("verifier offline"));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemoryTransferStore::new();
        let record = record_at(0);
        store.create(record.clone()).await.unwrap();
        assert!(matches!(
            store.create(record).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn remove_deletes_only_the_given_record() {
        let store = InMemoryTransferStore::new();
        let kept = store.create(record_at(-10)).await.unwrap();
        let dropped = store.create(record_at(0)).await.unwrap();

        assert!(store.remove(dropped.id).await.unwrap());
        assert!(!store.remove(dropped.id).await.unwrap());
        assert!(store.get(dropped.id).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.get(kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryTransferStore::new();
        let oldest = store.create(record_at(-20)).await.unwrap();
        let newest = store.create(record_at(0)).await.unwrap();
        let middle = store.create(record_at(-10)).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);
    }

    #[tokio::test]
    async fn concurrent_creates_are_all_kept() {
        let store = InMemoryTransferStore::new();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.create(record_at(i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.stats().await.unwrap().total_transfers, 32);
    }
}

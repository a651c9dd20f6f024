//! Transfer intake.
//!
//! Validates a request, derives the fee, base units and message hash,
//! persists the record as `QUEUED` and hands its id to the processor.
//! Nothing is stored when validation fails, and a record the processor
//! refuses is removed again.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use shadowbridge_common::{
    fee_usd, message_hash, to_base_units, ProofBundle, TransferRecord, TransferSource,
    TransferStats, TransferStatus, DEFAULT_DESTINATION_CHAIN,
};
use uuid::Uuid;

use crate::config::IntakeOptions;
use crate::error::IntakeError;
use crate::processor::ProcessorHandle;
use crate::store::TransferStore;

/// A transfer request as received from the API or a source-chain event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateTransferInput {
    pub sender: String,
    pub recipient: String,
    pub destination_chain: Option<String>,
    pub amount_usd: f64,
    pub proofs: ProofBundle,
    pub source_tx_hash: Option<String>,
    pub metadata: Option<Value>,
    pub source: TransferSource,
}

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn TransferStore>,
    processor: ProcessorHandle,
    options: IntakeOptions,
}

impl TransferService {
    pub fn new(
        store: Arc<dyn TransferStore>,
        processor: ProcessorHandle,
        options: IntakeOptions,
    ) -> Self {
        Self {
            store,
            processor,
            options,
        }
    }

    pub fn options(&self) -> &IntakeOptions {
        &self.options
    }

    pub fn processor(&self) -> &ProcessorHandle {
        &self.processor
    }

    #[tracing::instrument(skip_all, fields(source = ?input.source))]
    pub async fn create_transfer(
        &self,
        input: CreateTransferInput,
    ) -> Result<TransferRecord, IntakeError> {
        let sender = input.sender.trim();
        let recipient = input.recipient.trim();
        if sender.is_empty() || recipient.is_empty() {
            return Err(IntakeError::Validation(
                "Sender and recipient are required".into(),
            ));
        }

        let amount = input.amount_usd;
        if !amount.is_finite() {
            return Err(IntakeError::Validation("Amount must be a valid number".into()));
        }
        let IntakeOptions {
            min_amount,
            max_amount,
            fee_bps,
            decimals,
        } = self.options;
        if amount < min_amount || amount > max_amount {
            return Err(IntakeError::Validation(format!(
                "Amount must be between {min_amount} and {max_amount}"
            )));
        }

        if let Some(kind) = input.proofs.first_missing() {
            return Err(IntakeError::MissingProof(kind));
        }
        if !self.processor.is_running() {
            return Err(IntakeError::ProcessorStopped);
        }

        let amount_base_units = to_base_units(amount, decimals)?;
        let fee = fee_usd(amount, fee_bps)?;

        let destination_chain = input
            .destination_chain
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_DESTINATION_CHAIN)
            .to_string();

        let source_tx_hash = input
            .source_tx_hash
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let reference = match &source_tx_hash {
            Some(hash) => hash.clone(),
            None => {
                let nonce = Uuid::new_v4().to_string();
                tracing::warn!(
                    %nonce,
                    "no sourceTxHash supplied; message hash uses a one-off nonce and cannot deduplicate resubmissions"
                );
                nonce
            }
        };
        let hash = message_hash(sender, recipient, amount, &destination_chain, &reference);

        let now = Utc::now();
        let record = TransferRecord {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            destination_chain,
            amount_usd: amount,
            amount_base_units,
            fee_usd: fee,
            proofs: input.proofs,
            source_tx_hash,
            message_hash: hash,
            status: TransferStatus::Queued,
            created_at: now,
            updated_at: now,
            settled_at: None,
            tx_hash: None,
            error: None,
            already_processed: false,
            metadata: input.metadata,
            source: input.source,
        };

        let record = self.store.create(record).await?;
        if let Err(e) = self.processor.enqueue(record.id) {
            self.withdraw(record.id).await;
            return Err(e);
        }

        tracing::info!(
            transfer_id = %record.id,
            amount_usd = record.amount_usd,
            fee_usd = record.fee_usd,
            message_hash = ?record.message_hash,
            destination = %record.destination_chain,
            "transfer queued"
        );
        Ok(record)
    }

    /// Remove a record the processor never received.
    async fn withdraw(&self, id: Uuid) {
        match self.store.remove(id).await {
            Ok(_) => tracing::warn!(transfer_id = %id, "processor stopped; withdrew unqueued transfer"),
            Err(e) => tracing::error!(
                transfer_id = %id,
                error = %e,
                "processor stopped and the unqueued transfer could not be removed"
            ),
        }
    }

    pub async fn list_transfers(&self) -> Result<Vec<TransferRecord>, IntakeError> {
        Ok(self.store.list().await?)
    }

    pub async fn get_transfer(&self, id: Uuid) -> Result<Option<TransferRecord>, IntakeError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn stats(&self) -> Result<TransferStats, IntakeError> {
        Ok(self.store.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::config::AlreadyProcessedPolicy;
    use crate::processor::TransferProcessor;
    use crate::store::{InMemoryTransferStore, StoreResult};
    use crate::verifier::StructuralVerifier;
    use ethers::types::U256;
    use shadowbridge_common::ProofKind;
    use tokio_util::sync::CancellationToken;

    /// Service whose processor is never started, so records stay `QUEUED`.
    fn service() -> (TransferService, Arc<InMemoryTransferStore>, TransferProcessor) {
        let store = Arc::new(InMemoryTransferStore::new());
        let (processor, handle) = TransferProcessor::new(
            store.clone(),
            Arc::new(StructuralVerifier),
            ChainClient::unconfigured(),
            AlreadyProcessedPolicy::Settled,
            CancellationToken::new(),
        );
        let service = TransferService::new(store.clone(), handle, IntakeOptions::default());
        (service, store, processor)
    }

    fn input(amount: f64) -> CreateTransferInput {
        CreateTransferInput {
            sender: "mn_shield-addr_test1sender".into(),
            recipient: "0x00000000000000000000000000000000000000aa".into(),
            amount_usd: amount,
            proofs: ProofBundle::new("0xaaaaaaaa", "0xbbbbbbbb", "0xcccccccc"),
            ..CreateTransferInput::default()
        }
    }

    #[tokio::test]
    async fn accepted_transfer_is_queued_with_fee_and_base_units() {
        let (service, store, _processor) = service();

        let record = service.create_transfer(input(100.0)).await.unwrap();
        assert_eq!(record.status, TransferStatus::Queued);
        assert_eq!(record.fee_usd, 1.5);
        assert_eq!(record.amount_base_units, U256::from(100u64) * U256::exp10(18));
        assert_eq!(record.destination_chain, DEFAULT_DESTINATION_CHAIN);
        assert_eq!(record.source, TransferSource::Api);
        assert!(store.get(record.id).await.unwrap().is_some());
        assert_eq!(service.processor().pending_jobs(), 1);

        let record = service.create_transfer(input(1000.0)).await.unwrap();
        assert_eq!(record.fee_usd, 15.0);
    }

    #[tokio::test]
    async fn out_of_range_amount_is_rejected_without_state() {
        let (service, store, _processor) = service();

        let err = service.create_transfer(input(0.5)).await.unwrap_err();
        assert_eq!(err.to_string(), "Amount must be between 1 and 10000");
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = service.create_transfer(input(10_000.01)).await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));

        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(service.processor().pending_jobs(), 0);
    }

    #[tokio::test]
    async fn bounds_are_inclusive() {
        let (service, _store, _processor) = service();
        assert!(service.create_transfer(input(1.0)).await.is_ok());
        assert!(service.create_transfer(input(10_000.0)).await.is_ok());
    }

    #[tokio::test]
    async fn non_finite_amount_is_rejected() {
        let (service, _store, _processor) = service();
        let err = service.create_transfer(input(f64::NAN)).await.unwrap_err();
        assert_eq!(err.to_string(), "Amount must be a valid number");
    }

    #[tokio::test]
    async fn blank_parties_are_rejected() {
        let (service, _store, _processor) = service();
        let mut request = input(50.0);
        request.recipient = "   ".into();
        let err = service.create_transfer(request).await.unwrap_err();
        assert_eq!(err.to_string(), "Sender and recipient are required");
    }

    #[tokio::test]
    async fn missing_proof_names_the_first_absent_field() {
        let (service, store, _processor) = service();
        let mut request = input(50.0);
        request.proofs.amount_proof.clear();
        request.proofs.sanctions_proof.clear();

        let err = service.create_transfer(request).await.unwrap_err();
        assert!(matches!(err, IntakeError::MissingProof(ProofKind::Amount)));
        assert_eq!(err.to_string(), "Missing amountProof");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn too_precise_amount_is_a_validation_error() {
        let (service, _store, _processor) = service();
        let mut options = IntakeOptions::default();
        options.decimals = 6;
        let service = TransferService::new(service.store.clone(), service.processor.clone(), options);

        let err = service.create_transfer(input(1.1234567)).await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
        assert!(service.create_transfer(input(1.123456)).await.is_ok());
    }

    #[tokio::test]
    async fn source_tx_hash_makes_hash_deterministic() {
        let (service, _store, _processor) = service();
        let mut request = input(42.0);
        request.source_tx_hash = Some("0xfeed".into());

        let a = service.create_transfer(request.clone()).await.unwrap();
        let b = service.create_transfer(request).await.unwrap();
        assert_eq!(a.message_hash, b.message_hash);
        assert_ne!(a.id, b.id);

        let c = service.create_transfer(input(42.0)).await.unwrap();
        let d = service.create_transfer(input(42.0)).await.unwrap();
        assert_ne!(c.message_hash, d.message_hash);
    }

    #[tokio::test]
    async fn stopped_processor_is_reported() {
        let (service, _store, processor) = service();
        drop(processor);
        let err = service.create_transfer(input(10.0)).await.unwrap_err();
        assert_eq!(err.error_code(), "PROCESSOR_STOPPED");
        assert!(service.list_transfers().await.unwrap().is_empty());
    }

    /// Store that drops the processor while a record is being created, so
    /// the liveness check passes but the enqueue that follows fails.
    struct StoppingStore {
        inner: InMemoryTransferStore,
        processor: std::sync::Mutex<Option<TransferProcessor>>,
    }

    #[async_trait::async_trait]
    impl TransferStore for StoppingStore {
        async fn create(&self, record: TransferRecord) -> StoreResult<TransferRecord> {
            let processor = self.processor.lock().unwrap().take();
            drop(processor);
            self.inner.create(record).await
        }

        async fn update(
            &self,
            id: Uuid,
            update: shadowbridge_common::TransferUpdate,
        ) -> StoreResult<Option<TransferRecord>> {
            self.inner.update(id, update).await
        }

        async fn get(&self, id: Uuid) -> StoreResult<Option<TransferRecord>> {
            self.inner.get(id).await
        }

        async fn list(&self) -> StoreResult<Vec<TransferRecord>> {
            self.inner.list().await
        }

        async fn stats(&self) -> StoreResult<TransferStats> {
            self.inner.stats().await
        }

        async fn remove(&self, id: Uuid) -> StoreResult<bool> {
            self.inner.remove(id).await
        }
    }

    #[tokio::test]
    async fn processor_stopping_during_create_leaves_no_record() {
        let store = Arc::new(StoppingStore {
            inner: InMemoryTransferStore::new(),
            processor: std::sync::Mutex::new(None),
        });
        let (processor, handle) = TransferProcessor::new(
            store.clone(),
            Arc::new(StructuralVerifier),
            ChainClient::unconfigured(),
            AlreadyProcessedPolicy::Settled,
            CancellationToken::new(),
        );
        *store.processor.lock().unwrap() = Some(processor);
        let service = TransferService::new(store.clone(), handle, IntakeOptions::default());

        let err = service.create_transfer(input(10.0)).await.unwrap_err();
        assert!(matches!(err, IntakeError::ProcessorStopped));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(service.processor().pending_jobs(), 0);
    }
}

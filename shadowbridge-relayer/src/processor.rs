//! Transfer processor.
//!
//! A single worker drains a FIFO of transfer ids. Each transfer runs its whole
//! pipeline (verification, then settlement) before the next one starts, so
//! transfers settle in intake order and the relayer key signs one
//! transaction at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shadowbridge_common::{TransferRecord, TransferStatus, TransferUpdate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::ChainClient;
use crate::config::AlreadyProcessedPolicy;
use crate::error::{ChainError, IntakeError, StoreError};
use crate::store::TransferStore;
use crate::verifier::ProofVerifier;

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Cloneable producer side of the processor queue.
#[derive(Clone, Debug)]
pub struct ProcessorHandle {
    sender: mpsc::UnboundedSender<Uuid>,
    pending: Arc<AtomicUsize>,
}

impl ProcessorHandle {
    /// Append `id` to the queue.
    pub fn enqueue(&self, id: Uuid) -> Result<(), IntakeError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(id).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(IntakeError::ProcessorStopped);
        }
        Ok(())
    }

    /// False once the worker has gone away.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queued transfers plus the one in flight, if any.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Attempts at writing a transfer's terminal status.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// Outcome of one pipeline stage that can end the transfer.
enum StageError {
    Failed(String),
    Cancelled,
    /// A progress write failed, so the pipeline stopped before going further.
    Store(StoreError),
}

pub struct TransferProcessor {
    store: Arc<dyn TransferStore>,
    verifier: Arc<dyn ProofVerifier>,
    chain: ChainClient,
    already_processed: AlreadyProcessedPolicy,
    receiver: mpsc::UnboundedReceiver<Uuid>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl TransferProcessor {
    pub fn new(
        store: Arc<dyn TransferStore>,
        verifier: Arc<dyn ProofVerifier>,
        chain: ChainClient,
        already_processed: AlreadyProcessedPolicy,
        cancel: CancellationToken,
    ) -> (Self, ProcessorHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = ProcessorHandle {
            sender,
            pending: pending.clone(),
        };
        let processor = Self {
            store,
            verifier,
            chain,
            already_processed,
            receiver,
            pending,
            cancel,
        };
        (processor, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("transfer processor started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.receiver.recv() => next,
            };
            let Some(id) = next else { break };

            self.process(id).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::info!(pending = self.pending.load(Ordering::SeqCst), "transfer processor stopped");
    }

    async fn process(&self, id: Uuid) {
        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(transfer_id = %id, "queued transfer not found");
                return;
            }
            Err(e) => {
                tracing::error!(transfer_id = %id, error = %e, "failed to load queued transfer");
                return;
            }
        };
        if record.status != TransferStatus::Queued {
            tracing::warn!(transfer_id = %id, status = %record.status, "skipping transfer that is not queued");
            return;
        }

        let update = match self.run_pipeline(&record).await {
            Ok(update) => update,
            Err(StageError::Failed(message)) => {
                tracing::warn!(transfer_id = %id, error = %message, "transfer failed");
                TransferUpdate::failed(message)
            }
            Err(StageError::Cancelled) => {
                tracing::warn!(transfer_id = %id, "transfer interrupted by shutdown");
                TransferUpdate::failed(ChainError::Cancelled.to_string())
            }
            Err(StageError::Store(e)) => {
                tracing::error!(transfer_id = %id, error = %e, "failed to record transfer progress");
                TransferUpdate::failed(format!("Failed to record transfer progress: {e}"))
            }
        };
        self.finish(id, update).await;
    }

    /// Runs every stage and returns the terminal update to apply.
    async fn run_pipeline(&self, record: &TransferRecord) -> Result<TransferUpdate, StageError> {
        let id = record.id;

        self.advance(id, TransferUpdate::status(TransferStatus::ProofVerifying))
            .await?;
        let verified = tokio::select! {
            _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
            result = self.verifier.verify(&record.proofs) => result,
        };
        verified.map_err(|e| StageError::Failed(e.to_string()))?;
        self.advance(id, TransferUpdate::status(TransferStatus::ProofVerified))
            .await?;
        tracing::debug!(transfer_id = %id, "proofs verified");

        self.advance(id, TransferUpdate::status(TransferStatus::Submitting))
            .await?;
        let submitted = tokio::select! {
            _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
            result = self.chain.submit_transfer(record) => result,
        };

        match submitted {
            Ok(receipt) => {
                tracing::info!(
                    transfer_id = %id,
                    tx_hash = ?receipt.tx_hash,
                    block_number = ?receipt.block_number,
                    "transfer settled"
                );
                Ok(TransferUpdate::settled(Some(receipt.tx_hash), Utc::now()))
            }
            Err(e) if e.is_already_processed() => Ok(self.already_processed_outcome(record, &e)),
            Err(e) => Err(StageError::Failed(e.to_string())),
        }
    }

    fn already_processed_outcome(
        &self,
        record: &TransferRecord,
        err: &ChainError,
    ) -> TransferUpdate {
        tracing::warn!(
            transfer_id = %record.id,
            message_hash = ?record.message_hash,
            policy = ?self.already_processed,
            "message hash already processed on destination"
        );
        match self.already_processed {
            AlreadyProcessedPolicy::Settled => TransferUpdate {
                already_processed: Some(true),
                ..TransferUpdate::settled(None, Utc::now())
            },
            AlreadyProcessedPolicy::Failed => TransferUpdate {
                already_processed: Some(true),
                ..TransferUpdate::failed(err.to_string())
            },
        }
    }

    /// Write an intermediate status. Any failure stops the pipeline.
    async fn advance(&self, id: Uuid, update: TransferUpdate) -> Result<(), StageError> {
        match self.store.update(id, update).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(StageError::Store(StoreError::NotFound(id))),
            Err(e) => Err(StageError::Store(e)),
        }
    }

    /// Write the terminal status, retrying a few times. A settlement that
    /// cannot be recorded is logged with its tx hash.
    async fn finish(&self, id: Uuid, update: TransferUpdate) {
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self.store.update(id, update.clone()).await {
                Ok(Some(_)) => return,
                Ok(None) => {
                    tracing::error!(transfer_id = %id, "transfer disappeared before its outcome was recorded");
                    return;
                }
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    tracing::warn!(transfer_id = %id, attempt, error = %e, "retrying terminal status write");
                    tokio::time::sleep(TERMINAL_WRITE_BACKOFF * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        transfer_id = %id,
                        status = ?update.status,
                        tx_hash = ?update.tx_hash,
                        error = ?update.error,
                        store_error = %e,
                        "failed to record transfer outcome"
                    );
                }
            }
        }
    }
}

/// Re-queue transfers left `QUEUED` by a previous run, oldest first, and fail
/// the ones a previous run left mid-pipeline.
pub async fn resume_pending(
    store: &dyn TransferStore,
    handle: &ProcessorHandle,
) -> Result<usize, IntakeError> {
    let mut records = store.list().await?;
    records.reverse();

    let mut resumed = 0;
    for record in records {
        match record.status {
            TransferStatus::Queued => {
                handle.enqueue(record.id)?;
                resumed += 1;
            }
            status if status.is_in_flight() => {
                tracing::warn!(transfer_id = %record.id, %status, "transfer interrupted by restart");
                store
                    .update(record.id, TransferUpdate::failed("Interrupted by relayer restart"))
                    .await?;
            }
            _ => {}
        }
    }
    if resumed > 0 {
        tracing::info!(resumed, "re-queued transfers from previous run");
    }
    Ok(resumed)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

//! Destination chain submission.
//!
//! [`ChainClient`] turns a transfer record into a settlement call and bounds
//! the wait for confirmation. The settlement itself goes through a
//! [`SettlementBackend`]: a deployed receiver contract or the in-process
//! ledger.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use shadowbridge_common::TransferRecord;
use shadowbridge_receiver::LedgerStats;

use crate::config::{ChainConfig, ChainMode};
use crate::error::ChainError;

pub mod evm;
pub mod local;

pub use evm::EvmSettlement;
pub use local::LocalSettlement;

/// Arguments of one settlement call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementRequest {
    pub recipient: Address,
    pub amount: U256,
    pub message_hash: H256,
    pub proof: Bytes,
}

/// Confirmed settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait SettlementBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Submit and wait for confirmation.
    async fn settle(&self, request: SettlementRequest) -> Result<SubmissionReceipt, ChainError>;

    async fn is_processed(&self, message_hash: H256) -> Result<bool, ChainError>;

    async fn stats(&self) -> Result<LedgerStats, ChainError>;
}

/// Submits settled transfers to the destination ledger.
#[derive(Clone)]
pub struct ChainClient {
    backend: Option<Arc<dyn SettlementBackend>>,
    timeout: Duration,
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ChainClient {
    pub fn with_backend(backend: Arc<dyn SettlementBackend>, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            timeout,
        }
    }

    /// A client that fails every submission with `NotConfigured`.
    pub fn unconfigured() -> Self {
        Self {
            backend: None,
            timeout: Duration::from_secs(0),
        }
    }

    /// Build the backend selected by `config.mode`. `token_decimals` scales
    /// the local ledger's starting liquidity.
    ///
    /// EVM mode without an RPC url, bridge address or private key yields an
    /// unconfigured client rather than an error, so intake keeps working.
    pub fn from_config(config: &ChainConfig, token_decimals: u32) -> anyhow::Result<Self> {
        match config.mode {
            ChainMode::Local => {
                let backend = LocalSettlement::from_config(config, token_decimals)?;
                tracing::info!(relayer = ?backend.relayer(), "using in-process receiver ledger");
                Ok(Self::with_backend(Arc::new(backend), config.submission_timeout))
            }
            ChainMode::Evm => match (&config.rpc_url, &config.bridge_address, &config.private_key) {
                (Some(rpc_url), Some(bridge), Some(key)) => {
                    let backend = EvmSettlement::connect(
                        rpc_url,
                        bridge,
                        key,
                        config.chain_id,
                        config.confirmations,
                    )?;
                    tracing::info!(%rpc_url, %bridge, chain_id = config.chain_id, "bridge client configured");
                    Ok(Self::with_backend(Arc::new(backend), config.submission_timeout))
                }
                _ => {
                    tracing::warn!("ethereum bridge not configured; transfers will fail at submission");
                    Ok(Self::unconfigured())
                }
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn SettlementBackend>, ChainError> {
        self.backend.as_ref().ok_or(ChainError::NotConfigured)
    }

    /// Settle `record` on the destination ledger.
    ///
    /// Only the amount proof is forwarded on-chain.
    pub async fn submit_transfer(
        &self,
        record: &TransferRecord,
    ) -> Result<SubmissionReceipt, ChainError> {
        let backend = self.backend()?;
        let request = settlement_request(record)?;

        tracing::info!(
            transfer_id = %record.id,
            recipient = ?request.recipient,
            amount = %request.amount,
            message_hash = ?request.message_hash,
            backend = backend.name(),
            "submitting settlement"
        );

        match tokio::time::timeout(self.timeout, backend.settle(request)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(self.timeout)),
        }
    }

    pub async fn is_processed(&self, message_hash: H256) -> Result<bool, ChainError> {
        self.backend()?.is_processed(message_hash).await
    }

    pub async fn stats(&self) -> Result<LedgerStats, ChainError> {
        self.backend()?.stats().await
    }
}

fn settlement_request(record: &TransferRecord) -> Result<SettlementRequest, ChainError> {
    let recipient = Address::from_str(record.recipient.trim()).map_err(|_| {
        ChainError::InvalidInput(format!("recipient is not an address: {}", record.recipient))
    })?;
    let proof_hex = record.proofs.amount_proof.trim_start_matches("0x");
    let proof = hex::decode(proof_hex)
        .map_err(|e| ChainError::InvalidInput(format!("amountProof is not valid hex: {e}")))?;

    Ok(SettlementRequest {
        recipient,
        amount: record.amount_base_units,
        message_hash: record.message_hash,
        proof: Bytes::from(proof),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::mem::tests::record_at;
    use tokio::sync::Mutex;

    /// Backend that records calls and answers with a fixed outcome.
    pub(crate) struct ScriptedBackend {
        pub calls: Mutex<Vec<SettlementRequest>>,
        pub delay: Duration,
        pub outcome: fn(&SettlementRequest) -> Result<SubmissionReceipt, ChainError>,
    }

    impl ScriptedBackend {
        pub fn succeeding() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                outcome: |req| {
                    Ok(SubmissionReceipt {
                        tx_hash: req.message_hash,
                        block_number: Some(1),
                    })
                },
            }
        }
    }

    #[async_trait]
    impl SettlementBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn settle(&self, request: SettlementRequest) -> Result<SubmissionReceipt, ChainError> {
            self.calls.lock().await.push(request.clone());
            tokio::time::sleep(self.delay).await;
            (self.outcome)(&request)
        }

        async fn is_processed(&self, _message_hash: H256) -> Result<bool, ChainError> {
            Ok(false)
        }

        async fn stats(&self) -> Result<LedgerStats, ChainError> {
            Ok(LedgerStats::default())
        }
    }

    fn settleable_record() -> TransferRecord {
        let mut record = record_at(0);
        record.recipient = "0x00000000000000000000000000000000000000aa".into();
        record
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_submission() {
        let client = ChainClient::unconfigured();
        assert!(!client.is_ready());
        let err = client.submit_transfer(&settleable_record()).await.unwrap_err();
        assert!(matches!(err, ChainError::NotConfigured));
        assert_eq!(err.to_string(), "Bridge client not configured");
    }

    #[tokio::test]
    async fn forwards_amount_proof_only() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let client = ChainClient::with_backend(backend.clone(), Duration::from_secs(5));
        let record = settleable_record();

        let receipt = client.submit_transfer(&record).await.unwrap();
        assert_eq!(receipt.tx_hash, record.message_hash);

        let calls = backend.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].proof, Bytes::from(vec![0x22; 4]));
        assert_eq!(calls[0].amount, record.amount_base_units);
        assert_eq!(calls[0].recipient, Address::from_low_u64_be(0xaa));
    }

    #[tokio::test]
    async fn non_address_recipient_is_invalid_input() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let client = ChainClient::with_backend(backend.clone(), Duration::from_secs(5));
        let err = client.submit_transfer(&record_at(0)).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput(_)));
        assert!(backend.calls.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_settlement_times_out() {
        let backend = Arc::new(ScriptedBackend {
            delay: Duration::from_secs(600),
            ..ScriptedBackend::succeeding()
        });
        let client = ChainClient::with_backend(backend, Duration::from_secs(120));
        let err = client.submit_transfer(&settleable_record()).await.unwrap_err();
        assert!(matches!(err, ChainError::Timeout(d) if d == Duration::from_secs(120)));
    }

    #[test]
    fn evm_mode_without_credentials_is_unconfigured() {
        let client = ChainClient::from_config(&ChainConfig::default(), 18).unwrap();
        assert!(!client.is_ready());
    }
}

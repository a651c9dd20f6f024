//! In-process settlement against a [`ReceiverLedger`].

use std::sync::Arc;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use shadowbridge_receiver::{LedgerStats, ReceiverConfig, ReceiverLedger};
use tokio::sync::Mutex;

use super::{SettlementBackend, SettlementRequest, SubmissionReceipt};
use crate::config::ChainConfig;
use crate::error::ChainError;

/// Settles into a ledger held in memory. One transaction at a time.
#[derive(Clone)]
pub struct LocalSettlement {
    ledger: Arc<Mutex<ReceiverLedger>>,
    relayer: Address,
}

impl LocalSettlement {
    /// Settle as `relayer` into `ledger`.
    pub fn new(ledger: Arc<Mutex<ReceiverLedger>>, relayer: Address) -> Self {
        Self { ledger, relayer }
    }

    /// Fresh ledger owned by the relayer identity and funded with
    /// `local_liquidity` whole tokens.
    ///
    /// The identity comes from the configured private key, or a random
    /// wallet when none is set.
    pub fn from_config(config: &ChainConfig, token_decimals: u32) -> anyhow::Result<Self> {
        let wallet = match &config.private_key {
            Some(key) => key.parse::<LocalWallet>()?,
            None => LocalWallet::new(&mut rand::thread_rng()),
        };
        let relayer = wallet.address();
        let liquidity = U256::from(config.local_liquidity) * U256::exp10(token_decimals as usize);
        let ledger = ReceiverLedger::with_liquidity(
            ReceiverConfig {
                owner: relayer,
                relayer,
            },
            liquidity,
        );
        Ok(Self::new(Arc::new(Mutex::new(ledger)), relayer))
    }

    pub fn relayer(&self) -> Address {
        self.relayer
    }

    /// Shared handle to the underlying ledger.
    pub fn ledger(&self) -> Arc<Mutex<ReceiverLedger>> {
        self.ledger.clone()
    }
}

#[async_trait]
impl SettlementBackend for LocalSettlement {
    fn name(&self) -> &str {
        "local"
    }

    async fn settle(&self, request: SettlementRequest) -> Result<SubmissionReceipt, ChainError> {
        let mut ledger = self.ledger.lock().await;
        let receipt = ledger.execute(
            self.relayer,
            request.recipient,
            request.amount,
            request.message_hash,
            &request.proof,
        )?;
        Ok(SubmissionReceipt {
            tx_hash: receipt.tx_hash,
            block_number: Some(receipt.block_number),
        })
    }

    async fn is_processed(&self, message_hash: H256) -> Result<bool, ChainError> {
        Ok(self.ledger.lock().await.is_processed(&message_hash))
    }

    async fn stats(&self) -> Result<LedgerStats, ChainError> {
        Ok(self.ledger.lock().await.stats())
    }
}

//! Settlement through a deployed `BridgeReceiver` contract.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use shadowbridge_receiver::{LedgerError, LedgerStats};

use super::{SettlementBackend, SettlementRequest, SubmissionReceipt};
use crate::error::ChainError;

abigen!(
    BridgeReceiver,
    r#"[
        function processCrossChainTransfer(address recipient, uint256 amount, bytes32 messageHash, bytes proof)
        function processedMessages(bytes32 messageHash) view returns (bool)
        function getStats() view returns (uint256 totalTransactions, uint256 totalVolume)
        event TokensMinted(address indexed recipient, uint256 amount)
    ]"#
);

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Signs and sends `processCrossChainTransfer` as the relayer.
pub struct EvmSettlement {
    contract: BridgeReceiver<Client>,
    relayer: Address,
    confirmations: usize,
}

impl EvmSettlement {
    pub fn connect(
        rpc_url: &str,
        bridge_address: &str,
        private_key: &str,
        chain_id: u64,
        confirmations: usize,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("invalid ETHEREUM_RPC_URL: {rpc_url}"))?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("invalid ETHEREUM_PRIVATE_KEY")?
            .with_chain_id(chain_id);
        let address: Address = bridge_address
            .parse()
            .with_context(|| format!("invalid ETHEREUM_BRIDGE_ADDRESS: {bridge_address}"))?;

        let relayer = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self {
            contract: BridgeReceiver::new(address, client),
            relayer,
            confirmations: confirmations.max(1),
        })
    }

    fn map_contract_error(&self, err: ContractError<Client>, message_hash: H256) -> ChainError {
        let reason = err.decode_revert::<String>();
        classify_failure(reason.as_deref(), &err.to_string(), self.relayer, message_hash)
    }
}

/// Ledger rejections keep their taxonomy. Unknown reverts and failures
/// without a revert string are transient.
fn classify_failure(
    revert_reason: Option<&str>,
    detail: &str,
    relayer: Address,
    message_hash: H256,
) -> ChainError {
    match revert_reason {
        Some(reason) => match LedgerError::from_revert_reason(reason, relayer, message_hash) {
            Some(ledger) => ChainError::Rejected(ledger),
            None => ChainError::Transient(format!("execution reverted: {reason}")),
        },
        None => ChainError::Transient(detail.to_string()),
    }
}

#[async_trait]
impl SettlementBackend for EvmSettlement {
    fn name(&self) -> &str {
        "evm"
    }

    async fn settle(&self, request: SettlementRequest) -> Result<SubmissionReceipt, ChainError> {
        let call = self.contract.process_cross_chain_transfer(
            request.recipient,
            request.amount,
            request.message_hash.to_fixed_bytes(),
            request.proof,
        );

        let pending = call
            .send()
            .await
            .map_err(|e| self.map_contract_error(e, request.message_hash))?;
        let tx_hash = *pending;
        tracing::debug!(?tx_hash, "settlement transaction sent");

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))?
            .ok_or_else(|| ChainError::Transient(format!("transaction {tx_hash:?} dropped")))?;

        if receipt.status.map(|s| s.is_zero()).unwrap_or(false) {
            return Err(ChainError::Transient(format!("transaction {tx_hash:?} reverted")));
        }

        Ok(SubmissionReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn is_processed(&self, message_hash: H256) -> Result<bool, ChainError> {
        self.contract
            .processed_messages(message_hash.to_fixed_bytes())
            .call()
            .await
            .map_err(|e| self.map_contract_error(e, message_hash))
    }

    async fn stats(&self) -> Result<LedgerStats, ChainError> {
        let (total_transactions, total_volume) = self
            .contract
            .get_stats()
            .call()
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))?;
        Ok(LedgerStats {
            total_transactions,
            total_volume,
        })
    }
}

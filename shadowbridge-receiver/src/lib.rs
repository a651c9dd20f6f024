//! shadowbridge-receiver
//!
//! Settlement logic of the destination-chain `BridgeReceiver`. The ledger
//! credits recipients out of the liquidity it holds, and consumes each message
//! hash at most once. It is the last line of defence against a duplicated or
//! replayed relay message.
//!
//! The relayer runs this state machine in-process for local deployments and
//! tests; on a live network the same rules are enforced by the contract and
//! its revert reasons map back onto [`LedgerError`].

use std::collections::{HashMap, HashSet};

use ethers_core::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Not relayer: {0:?}")]
    NotRelayer(Address),

    #[error("Not owner: {0:?}")]
    NotOwner(Address),

    #[error("Already processed: {0:?}")]
    AlreadyProcessed(H256),

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid recipient")]
    InvalidRecipient,

    #[error("Insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: U256, available: U256 },
}

impl LedgerError {
    /// Revert string the contract uses for this condition.
    pub fn revert_reason(&self) -> &'static str {
        match self {
            LedgerError::NotRelayer(_) => "Not relayer",
            LedgerError::NotOwner(_) => "Not owner",
            LedgerError::AlreadyProcessed(_) => "Already processed",
            LedgerError::InvalidAmount => "Invalid amount",
            LedgerError::InvalidRecipient => "Invalid recipient",
            LedgerError::InsufficientLiquidity { .. } => "Insufficient liquidity",
        }
    }

    /// Recover a ledger error from a contract revert string.
    ///
    /// `caller` and `message_hash` fill in the context the revert string does
    /// not carry.
    pub fn from_revert_reason(reason: &str, caller: Address, message_hash: H256) -> Option<Self> {
        let reason = reason.trim();
        if reason.starts_with("Not relayer") {
            Some(LedgerError::NotRelayer(caller))
        } else if reason.starts_with("Not owner") {
            Some(LedgerError::NotOwner(caller))
        } else if reason.starts_with("Already processed") {
            Some(LedgerError::AlreadyProcessed(message_hash))
        } else if reason.starts_with("Invalid amount") {
            Some(LedgerError::InvalidAmount)
        } else if reason.starts_with("Invalid recipient") {
            Some(LedgerError::InvalidRecipient)
        } else if reason.starts_with("Insufficient liquidity") {
            Some(LedgerError::InsufficientLiquidity {
                requested: U256::zero(),
                available: U256::zero(),
            })
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Ledger authorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// May rotate the relayer.
    pub owner: Address,
    /// The only identity allowed to settle.
    pub relayer: Address,
}

/// Events emitted by ledger state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    TokensMinted {
        recipient: Address,
        amount: U256,
        message_hash: H256,
        proof_hash: H256,
        tx_hash: H256,
        block_number: u64,
    },
    RelayerUpdated {
        previous: Address,
        current: Address,
    },
    LiquidityAdded {
        amount: U256,
    },
}

/// Outcome of a successful settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub recipient: Address,
    pub amount: U256,
    pub message_hash: H256,
}

/// Counters reported by `getStats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_transactions: U256,
    pub total_volume: U256,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ReceiverLedger {
    config: ReceiverConfig,
    liquidity: U256,
    balances: HashMap<Address, U256>,
    processed_messages: HashSet<H256>,
    stats: LedgerStats,
    block_number: u64,
    events: Vec<LedgerEvent>,
}

impl ReceiverLedger {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            liquidity: U256::zero(),
            balances: HashMap::new(),
            processed_messages: HashSet::new(),
            stats: LedgerStats::default(),
            block_number: 0,
            events: Vec::new(),
        }
    }

    /// Ledger pre-funded with `liquidity` of the settlement asset.
    pub fn with_liquidity(config: ReceiverConfig, liquidity: U256) -> Self {
        let mut ledger = Self::new(config);
        ledger.fund(liquidity);
        ledger
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Settle one cross-chain transfer.
    ///
    /// Every check runs before any state is touched, so a rejected call leaves
    /// the ledger exactly as it was. On success the liquidity debit, the
    /// recipient credit, the processed-hash insert, both counters and the
    /// event are committed together.
    pub fn execute(
        &mut self,
        caller: Address,
        recipient: Address,
        amount: U256,
        message_hash: H256,
        proof: &[u8],
    ) -> Result<SettlementReceipt, LedgerError> {
        if caller != self.config.relayer {
            return Err(LedgerError::NotRelayer(caller));
        }
        if self.processed_messages.contains(&message_hash) {
            return Err(LedgerError::AlreadyProcessed(message_hash));
        }
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        if recipient.is_zero() {
            return Err(LedgerError::InvalidRecipient);
        }
        if amount > self.liquidity {
            return Err(LedgerError::InsufficientLiquidity {
                requested: amount,
                available: self.liquidity,
            });
        }

        let block_number = self.block_number + 1;
        let tx_hash = settlement_tx_hash(message_hash, block_number);

        self.liquidity -= amount;
        *self.balances.entry(recipient).or_default() += amount;
        self.processed_messages.insert(message_hash);
        self.stats.total_transactions += U256::one();
        self.stats.total_volume += amount;
        self.block_number = block_number;
        self.events.push(LedgerEvent::TokensMinted {
            recipient,
            amount,
            message_hash,
            proof_hash: H256::from(keccak256(proof)),
            tx_hash,
            block_number,
        });

        tracing::debug!(
            ?recipient,
            %amount,
            ?message_hash,
            block_number,
            "settled cross-chain transfer"
        );

        Ok(SettlementReceipt {
            tx_hash,
            block_number,
            recipient,
            amount,
            message_hash,
        })
    }

    /// Hand the relayer role to `relayer`. Owner only.
    pub fn set_relayer(&mut self, caller: Address, relayer: Address) -> Result<(), LedgerError> {
        if caller != self.config.owner {
            return Err(LedgerError::NotOwner(caller));
        }
        let previous = std::mem::replace(&mut self.config.relayer, relayer);
        self.events.push(LedgerEvent::RelayerUpdated {
            previous,
            current: relayer,
        });
        Ok(())
    }

    /// Deposit settlement liquidity into the ledger.
    pub fn fund(&mut self, amount: U256) {
        self.liquidity += amount;
        self.events.push(LedgerEvent::LiquidityAdded { amount });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn is_processed(&self, message_hash: &H256) -> bool {
        self.processed_messages.contains(message_hash)
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn liquidity(&self) -> U256 {
        self.liquidity
    }

    pub fn relayer(&self) -> Address {
        self.config.relayer
    }

    pub fn owner(&self) -> Address {
        self.config.owner
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }
}

/// Deterministic transaction id for a settlement in `block_number`.
fn settlement_tx_hash(message_hash: H256, block_number: u64) -> H256 {
    let mut preimage = [0u8; 40];
    preimage[..32].copy_from_slice(message_hash.as_bytes());
    preimage[32..].copy_from_slice(&block_number.to_be_bytes());
    H256::from(keccak256(preimage))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::repeat_byte(0x01)
    }

    fn relayer() -> Address {
        Address::repeat_byte(0x02)
    }

    fn recipient() -> Address {
        Address::repeat_byte(0x03)
    }

    fn tokens(whole: u64) -> U256 {
        U256::from(whole) * U256::exp10(18)
    }

    fn ledger() -> ReceiverLedger {
        ReceiverLedger::with_liquidity(
            ReceiverConfig {
                owner: owner(),
                relayer: relayer(),
            },
            tokens(1_000),
        )
    }

    fn hash(label: &str) -> H256 {
        H256::from(keccak256(label.as_bytes()))
    }

    #[test]
    fn relayer_settles_fresh_message() {
        let mut ledger = ledger();
        let amount = tokens(100);

        let receipt = ledger
            .execute(relayer(), recipient(), amount, hash("message-1"), b"proof")
            .unwrap();

        assert_eq!(receipt.block_number, 1);
        assert_eq!(ledger.balance_of(&recipient()), amount);
        assert_eq!(ledger.liquidity(), tokens(900));
        assert!(ledger.is_processed(&hash("message-1")));
        assert_eq!(
            ledger.stats(),
            LedgerStats {
                total_transactions: U256::one(),
                total_volume: amount,
            }
        );
        assert!(matches!(
            ledger.events().last(),
            Some(LedgerEvent::TokensMinted { recipient: r, amount: a, .. })
                if *r == recipient() && *a == amount
        ));
    }

    #[test]
    fn replayed_message_is_rejected_without_mutation() {
        let mut ledger = ledger();
        ledger
            .execute(relayer(), recipient(), tokens(75), hash("message-3"), b"")
            .unwrap();
        let stats_after_first = ledger.stats();
        let balance_after_first = ledger.balance_of(&recipient());
        let events_after_first = ledger.events().len();

        let err = ledger
            .execute(relayer(), recipient(), tokens(75), hash("message-3"), b"")
            .unwrap_err();

        assert_eq!(err, LedgerError::AlreadyProcessed(hash("message-3")));
        assert_eq!(ledger.stats(), stats_after_first);
        assert_eq!(ledger.balance_of(&recipient()), balance_after_first);
        assert_eq!(ledger.events().len(), events_after_first);
        assert_eq!(ledger.block_number(), 1);
    }

    #[test]
    fn non_relayer_is_rejected() {
        let mut ledger = ledger();
        let other = Address::repeat_byte(0x09);

        let err = ledger
            .execute(other, recipient(), tokens(50), hash("message-2"), b"")
            .unwrap_err();

        assert_eq!(err, LedgerError::NotRelayer(other));
        assert_eq!(err.revert_reason(), "Not relayer");
        assert!(!ledger.is_processed(&hash("message-2")));
    }

    #[test]
    fn owner_is_not_implicitly_a_relayer() {
        let mut ledger = ledger();
        let err = ledger
            .execute(owner(), recipient(), tokens(1), hash("owner"), b"")
            .unwrap_err();
        assert_eq!(err, LedgerError::NotRelayer(owner()));
    }

    #[test]
    fn zero_amount_and_zero_recipient_are_rejected() {
        let mut ledger = ledger();

        let err = ledger
            .execute(relayer(), recipient(), U256::zero(), hash("zero-amount"), b"")
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount);

        let err = ledger
            .execute(relayer(), Address::zero(), tokens(100), hash("zero-recipient"), b"")
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidRecipient);

        assert_eq!(ledger.stats(), LedgerStats::default());
        assert!(!ledger.is_processed(&hash("zero-amount")));
        assert!(!ledger.is_processed(&hash("zero-recipient")));
        assert_eq!(ledger.liquidity(), tokens(1_000));
    }

    #[test]
    fn insufficient_liquidity_leaves_hash_unconsumed() {
        let mut ledger = ledger();
        let err = ledger
            .execute(relayer(), recipient(), tokens(1_001), hash("too-big"), b"")
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientLiquidity { .. }));
        assert!(!ledger.is_processed(&hash("too-big")));

        ledger.fund(tokens(1));
        ledger
            .execute(relayer(), recipient(), tokens(1_001), hash("too-big"), b"")
            .unwrap();
        assert_eq!(ledger.liquidity(), U256::zero());
    }

    #[test]
    fn stats_accumulate_across_settlements() {
        let mut ledger = ledger();
        ledger
            .execute(relayer(), recipient(), tokens(100), hash("tx-1"), b"")
            .unwrap();
        ledger
            .execute(relayer(), recipient(), tokens(200), hash("tx-2"), b"")
            .unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.total_transactions, U256::from(2));
        assert_eq!(stats.total_volume, tokens(300));
    }

    #[test]
    fn only_owner_rotates_relayer() {
        let mut ledger = ledger();
        let next = Address::repeat_byte(0x07);

        assert_eq!(
            ledger.set_relayer(relayer(), next),
            Err(LedgerError::NotOwner(relayer()))
        );

        ledger.set_relayer(owner(), next).unwrap();
        assert_eq!(ledger.relayer(), next);
        assert!(ledger
            .execute(relayer(), recipient(), tokens(1), hash("old"), b"")
            .is_err());
        ledger
            .execute(next, recipient(), tokens(1), hash("new"), b"")
            .unwrap();
    }

    #[test]
    fn tx_hashes_differ_per_settlement() {
        let mut ledger = ledger();
        let a = ledger
            .execute(relayer(), recipient(), tokens(1), hash("a"), b"")
            .unwrap();
        let b = ledger
            .execute(relayer(), recipient(), tokens(1), hash("b"), b"")
            .unwrap();
        assert_ne!(a.tx_hash, b.tx_hash);
    }

    #[test]
    fn revert_reasons_round_trip() {
        let caller = relayer();
        let message = hash("m");
        for err in [
            LedgerError::NotRelayer(caller),
            LedgerError::AlreadyProcessed(message),
            LedgerError::InvalidAmount,
            LedgerError::InvalidRecipient,
        ] {
            assert_eq!(
                LedgerError::from_revert_reason(err.revert_reason(), caller, message),
                Some(err)
            );
        }
        assert_eq!(LedgerError::from_revert_reason("out of gas", caller, message), None);
    }
}

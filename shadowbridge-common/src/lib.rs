//! shadowbridge-common
//!
//! Shared data model for the ShadowBridge relay: transfer records, their
//! status machine, proof bundles, fee and base-unit arithmetic, and the
//! message hash that keys settlement on the destination ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use ethers_core::types::{H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod amount;
pub mod message;

pub use amount::{fee_usd, to_base_units, AmountError, BPS_DIVISOR};
pub use message::{canonical_amount, message_hash};

/// Destination chain assumed when a request does not name one.
pub const DEFAULT_DESTINATION_CHAIN: &str = "ethereum-sepolia";

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transfer is already {0} and can no longer change")]
    Terminal(TransferStatus),

    #[error("invalid status transition {from} -> {to}")]
    Regression {
        from: TransferStatus,
        to: TransferStatus,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a transfer.
///
/// The happy path is strictly linear; `Failed` can be entered from any
/// non-terminal state. `Settled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Queued,
    ProofVerifying,
    ProofVerified,
    Submitting,
    Settled,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::ProofVerifying | Self::ProofVerified | Self::Submitting
        )
    }

    /// The next stage on the happy path, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::ProofVerifying),
            Self::ProofVerifying => Some(Self::ProofVerified),
            Self::ProofVerified => Some(Self::Submitting),
            Self::Submitting => Some(Self::Settled),
            Self::Settled | Self::Failed => None,
        }
    }

    /// Whether a record in this state may move to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::ProofVerifying => "PROOF_VERIFYING",
            Self::ProofVerified => "PROOF_VERIFIED",
            Self::Submitting => "SUBMITTING",
            Self::Settled => "SETTLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transfer request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferSource {
    #[default]
    Api,
    ChainEvent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROOFS
// ═══════════════════════════════════════════════════════════════════════════════

/// The three compliance attestations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    Kyc,
    Amount,
    Sanctions,
}

impl ProofKind {
    pub const ALL: [ProofKind; 3] = [ProofKind::Kyc, ProofKind::Amount, ProofKind::Sanctions];

    /// Request field carrying this proof.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Kyc => "kycProof",
            Self::Amount => "amountProof",
            Self::Sanctions => "sanctionsProof",
        }
    }

    /// Circuit identifier used by the external prover/verifier service.
    pub fn circuit(self) -> &'static str {
        match self {
            Self::Kyc => "kyc",
            Self::Amount => "amount",
            Self::Sanctions => "sanctions",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Opaque, hex-encoded proof payloads accompanying a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProofBundle {
    pub kyc_proof: String,
    pub amount_proof: String,
    pub sanctions_proof: String,
}

impl ProofBundle {
    pub fn new(
        kyc_proof: impl Into<String>,
        amount_proof: impl Into<String>,
        sanctions_proof: impl Into<String>,
    ) -> Self {
        Self {
            kyc_proof: kyc_proof.into(),
            amount_proof: amount_proof.into(),
            sanctions_proof: sanctions_proof.into(),
        }
    }

    pub fn get(&self, kind: ProofKind) -> &str {
        match kind {
            ProofKind::Kyc => &self.kyc_proof,
            ProofKind::Amount => &self.amount_proof,
            ProofKind::Sanctions => &self.sanctions_proof,
        }
    }

    /// First proof field that is empty, in canonical order.
    pub fn first_missing(&self) -> Option<ProofKind> {
        ProofKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind).trim().is_empty())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// A relayed transfer and its audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub destination_chain: String,
    pub amount_usd: f64,
    /// `amount_usd` scaled to the settlement token's decimals.
    #[serde(with = "u256_dec")]
    pub amount_base_units: U256,
    pub fee_usd: f64,
    pub proofs: ProofBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx_hash: Option<String>,
    pub message_hash: H256,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the destination ledger had already consumed the message hash.
    #[serde(default)]
    pub already_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub source: TransferSource,
}

/// Partial update applied by the store. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferUpdate {
    pub status: Option<TransferStatus>,
    pub tx_hash: Option<H256>,
    pub settled_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub already_processed: Option<bool>,
}

impl TransferUpdate {
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TransferStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn settled(tx_hash: Option<H256>, settled_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TransferStatus::Settled),
            tx_hash,
            settled_at: Some(settled_at),
            ..Self::default()
        }
    }
}

impl TransferRecord {
    /// Apply `update` in place, refreshing `updated_at`.
    ///
    /// Terminal records are immutable and the status may only move forward.
    pub fn apply(&mut self, update: TransferUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if let Some(next) = update.status {
            if !self.status.can_advance_to(next) {
                return Err(TransitionError::Regression {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
        }
        if let Some(tx_hash) = update.tx_hash {
            self.tx_hash = Some(tx_hash);
        }
        if let Some(settled_at) = update.settled_at {
            self.settled_at = Some(settled_at);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(flag) = update.already_processed {
            self.already_processed = flag;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Aggregate counts over all stored transfers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub total_transfers: u64,
    pub queued: u64,
    pub in_flight: u64,
    pub settled: u64,
    pub failed: u64,
    pub total_volume_usd: f64,
}

impl TransferStats {
    /// Bucket records by status.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TransferRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_transfers += 1;
            match record.status {
                TransferStatus::Queued => stats.queued += 1,
                TransferStatus::Failed => stats.failed += 1,
                TransferStatus::Settled => {
                    stats.settled += 1;
                    stats.total_volume_usd += record.amount_usd;
                }
                status if status.is_in_flight() => stats.in_flight += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Serialize a `U256` as a base-10 string so JSON consumers never lose precision.
pub mod u256_dec {
    use ethers_core::types::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_dec_str(&raw).map_err(D::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

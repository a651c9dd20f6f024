//! Error types for the relayer.
//!
//! Intake errors are returned to the caller before a record exists. Everything
//! after enqueue is captured on the record instead of being propagated.

use std::time::Duration;

use shadowbridge_common::{AmountError, ProofKind, TransitionError};
use shadowbridge_receiver::LedgerError;
use thiserror::Error;
use uuid::Uuid;

/// Rejections raised while validating a transfer request.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),

    #[error("Missing {0}")]
    MissingProof(ProofKind),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transfer processor is not running")]
    ProcessorStopped,
}

impl IntakeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            IntakeError::Validation(_) => "VALIDATION_ERROR",
            IntakeError::MissingProof(_) => "MISSING_PROOF",
            IntakeError::Store(_) => "STORE_ERROR",
            IntakeError::ProcessorStopped => "PROCESSOR_STOPPED",
        }
    }
}

impl From<AmountError> for IntakeError {
    fn from(err: AmountError) -> Self {
        IntakeError::Validation(err.to_string())
    }
}

/// Proof bundle rejected by the verifier stage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Invalid {0} payload")]
    Malformed(ProofKind),

    #[error("{0} must be a hex string")]
    NotHex(ProofKind),

    #[error("{0} rejected by verifier")]
    Rejected(ProofKind),

    #[error("verifier unavailable for {kind}: {reason}")]
    Unavailable { kind: ProofKind, reason: String },
}

/// Failures of the chain submission stage.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Bridge client not configured")]
    NotConfigured,

    #[error("invalid submission: {0}")]
    InvalidInput(String),

    #[error("settlement rejected: {0}")]
    Rejected(#[from] LedgerError),

    #[error("transient chain error: {0}")]
    Transient(String),

    #[error("no confirmation within {0:?}")]
    Timeout(Duration),

    #[error("submission cancelled")]
    Cancelled,
}

impl ChainError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ChainError::NotConfigured => "NOT_CONFIGURED",
            ChainError::InvalidInput(_) => "INVALID_SUBMISSION",
            ChainError::Rejected(LedgerError::NotRelayer(_))
            | ChainError::Rejected(LedgerError::NotOwner(_)) => "AUTHORIZATION_ERROR",
            ChainError::Rejected(LedgerError::AlreadyProcessed(_)) => "ALREADY_PROCESSED",
            ChainError::Rejected(LedgerError::InvalidAmount) => "INVALID_AMOUNT",
            ChainError::Rejected(LedgerError::InvalidRecipient) => "INVALID_RECIPIENT",
            ChainError::Rejected(LedgerError::InsufficientLiquidity { .. }) => {
                "INSUFFICIENT_LIQUIDITY"
            }
            ChainError::Transient(_) => "TRANSIENT_CHAIN_ERROR",
            ChainError::Timeout(_) => "TIMEOUT",
            ChainError::Cancelled => "CANCELLED",
        }
    }

    /// The destination ledger already consumed this message hash.
    pub fn is_already_processed(&self) -> bool {
        matches!(self, ChainError::Rejected(LedgerError::AlreadyProcessed(_)))
    }
}

/// Transfer store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transfer {0} already exists")]
    Duplicate(Uuid),

    #[error("transfer {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};

    #[test]
    fn missing_proof_names_the_field() {
        let err = IntakeError::MissingProof(ProofKind::Sanctions);
        assert_eq!(err.to_string(), "Missing sanctionsProof");
        assert_eq!(err.error_code(), "MISSING_PROOF");
    }

    #[test]
    fn ledger_rejections_keep_their_taxonomy() {
        let err = ChainError::from(LedgerError::AlreadyProcessed(H256::zero()));
        assert!(err.is_already_processed());
        assert_eq!(err.error_code(), "ALREADY_PROCESSED");

        let err = ChainError::from(LedgerError::NotRelayer(Address::zero()));
        assert!(!err.is_already_processed());
        assert_eq!(err.error_code(), "AUTHORIZATION_ERROR");
    }
}

//! shadowbridge-relayer
//!
//! Relays privacy-preserving cross-chain transfers to the destination chain.
//!
//! Architecture:
//! 1. Accept transfer requests over HTTP or from a source-chain listener
//! 2. Validate, derive the message hash and queue the transfer
//! 3. Verify the proof bundle
//! 4. Settle on the destination ledger and record the outcome

pub mod chain;
pub mod config;
pub mod error;
pub mod listener;
pub mod processor;
pub mod server;
pub mod service;
pub mod store;
pub mod verifier;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::config::RelayerConfig;
use crate::processor::{ProcessorHandle, TransferProcessor};
use crate::server::AppState;
use crate::service::TransferService;
use crate::store::{InMemoryTransferStore, SledTransferStore, TransferStore};
use crate::verifier::ProofVerifier;

/// Wired components, ready to be spawned.
pub struct Relayer {
    pub store: Arc<dyn TransferStore>,
    pub processor: TransferProcessor,
    pub handle: ProcessorHandle,
    pub service: TransferService,
    pub state: AppState,
}

impl Relayer {
    /// Build every component from `config`. Long-running parts stop when
    /// `shutdown` is cancelled.
    pub fn build(config: &RelayerConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let store: Arc<dyn TransferStore> = match &config.db_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "using sled transfer store");
                Arc::new(SledTransferStore::open(path)?)
            }
            None => {
                tracing::info!("using in-memory transfer store");
                Arc::new(InMemoryTransferStore::new())
            }
        };
        let proof_verifier: Arc<dyn ProofVerifier> = Arc::from(verifier::from_config(&config.verifier)?);
        let chain = ChainClient::from_config(&config.chain, config.intake.decimals)?;
        Ok(Self::from_parts(config, store, proof_verifier, chain, shutdown))
    }

    /// Build around caller-supplied store, verifier and chain client.
    pub fn from_parts(
        config: &RelayerConfig,
        store: Arc<dyn TransferStore>,
        verifier: Arc<dyn ProofVerifier>,
        chain: ChainClient,
        shutdown: CancellationToken,
    ) -> Self {
        let (processor, handle) = TransferProcessor::new(
            store.clone(),
            verifier,
            chain.clone(),
            config.already_processed,
            shutdown,
        );
        let service = TransferService::new(store.clone(), handle.clone(), config.intake.clone());
        let state = AppState::new(service.clone(), chain);
        Self {
            store,
            processor,
            handle,
            service,
            state,
        }
    }
}

//! Source-chain listener.
//!
//! Polls a [`SourceEventFeed`] for registered transfers and submits each one
//! through intake, keyed by its source transaction id so a replayed event
//! produces the same message hash.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use shadowbridge_common::{ProofBundle, TransferSource};
use tokio_util::sync::CancellationToken;

use crate::error::IntakeError;
use crate::service::{CreateTransferInput, TransferService};

/// A transfer registered on the source chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceChainEvent {
    pub tx_id: String,
    pub block_height: u64,
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub destination_chain: Option<String>,
    pub amount_usd: f64,
    #[serde(default)]
    pub proofs: ProofBundle,
}

#[async_trait]
pub trait SourceEventFeed: Send + Sync {
    /// Events in blocks strictly after `after_block`, in chain order.
    async fn fetch_events(&self, after_block: u64) -> Result<Vec<SourceChainEvent>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER FEED
// ═══════════════════════════════════════════════════════════════════════════════

const TRANSFER_EVENTS_QUERY: &str = r#"
    query($address: String!, $afterBlock: Int!) {
        transferEvents(contractAddress: $address, afterBlock: $afterBlock) {
            txId
            blockHeight
            sender
            recipient
            destinationChain
            amountUsd
            proofs {
                kycProof
                amountProof
                sanctionsProof
            }
        }
    }
"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<TransferEventsData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferEventsData {
    transfer_events: Vec<SourceChainEvent>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Reads transfer events from a GraphQL indexer.
pub struct IndexerFeed {
    client: reqwest::Client,
    graphql_url: String,
    contract_address: String,
}

impl IndexerFeed {
    pub fn new(graphql_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            graphql_url: graphql_url.into(),
            contract_address: contract_address.into(),
        }
    }
}

#[async_trait]
impl SourceEventFeed for IndexerFeed {
    async fn fetch_events(&self, after_block: u64) -> Result<Vec<SourceChainEvent>> {
        let body = serde_json::json!({
            "query": TRANSFER_EVENTS_QUERY,
            "variables": {
                "address": self.contract_address,
                "afterBlock": after_block,
            }
        });

        let response = self
            .client
            .post(&self.graphql_url)
            .json(&body)
            .send()
            .await
            .context("indexer request failed")?
            .error_for_status()
            .context("indexer returned an error status")?;

        let parsed: GraphqlResponse = response
            .json()
            .await
            .context("unreadable indexer response")?;

        if let Some(first) = parsed.errors.first() {
            return Err(anyhow!("indexer error: {}", first.message));
        }
        let mut events = parsed.data.map(|d| d.transfer_events).unwrap_or_default();
        events.sort_by_key(|e| e.block_height);
        Ok(events)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTENER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SourceListener<F> {
    feed: F,
    service: TransferService,
    contract_address: String,
    poll_interval: Duration,
    last_processed_block: u64,
    /// Events above the cursor already handled, by tx id. Covers a block the
    /// cursor could not pass because a later event in it must be retried.
    handled: HashMap<String, u64>,
}

impl<F: SourceEventFeed> SourceListener<F> {
    pub fn new(
        feed: F,
        service: TransferService,
        contract_address: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            feed,
            service,
            contract_address: contract_address.into(),
            poll_interval,
            last_processed_block: 0,
            handled: HashMap::new(),
        }
    }

    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block
    }

    /// Poll until `cancel` fires. Fetch failures are logged and retried on
    /// the next tick.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            contract = %self.contract_address,
            interval = ?self.poll_interval,
            "source listener started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "failed to fetch source events");
                    }
                }
            }
        }
        tracing::info!("source listener stopped");
    }

    /// Fetch and submit one batch. Returns how many transfers were queued.
    ///
    /// The cursor moves past an event once it is queued or permanently
    /// rejected. A transient intake failure ends the batch and leaves the
    /// cursor below that event's block so the next poll retries it.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let cursor = self.last_processed_block;
        let mut events = self.feed.fetch_events(cursor).await?;
        events.sort_by_key(|e| e.block_height);
        let mut queued = 0;
        let mut retry_from = None;

        for event in events {
            if event.block_height <= cursor || self.handled.contains_key(&event.tx_id) {
                continue;
            }
            let block_height = event.block_height;
            let tx_id = event.tx_id.clone();

            match self.service.create_transfer(self.to_input(event)).await {
                Ok(record) => {
                    queued += 1;
                    tracing::info!(transfer_id = %record.id, %tx_id, block_height, "queued transfer from source event");
                }
                Err(e @ (IntakeError::Validation(_) | IntakeError::MissingProof(_))) => {
                    tracing::error!(%tx_id, block_height, error = %e, "rejected source event");
                }
                Err(e) => {
                    tracing::warn!(%tx_id, block_height, error = %e, "source event deferred to next poll");
                    retry_from = Some(block_height);
                    break;
                }
            }
            self.handled.insert(tx_id, block_height);
        }

        let completed = self
            .handled
            .values()
            .copied()
            .filter(|block| retry_from.map_or(true, |retry| *block < retry))
            .max();
        if let Some(block) = completed {
            self.last_processed_block = self.last_processed_block.max(block);
        }
        let done = self.last_processed_block;
        self.handled.retain(|_, block| *block > done);
        Ok(queued)
    }

    fn to_input(&self, event: SourceChainEvent) -> CreateTransferInput {
        CreateTransferInput {
            sender: event.sender,
            recipient: event.recipient,
            destination_chain: event.destination_chain,
            amount_usd: event.amount_usd,
            proofs: event.proofs,
            source_tx_hash: Some(event.tx_id),
            metadata: Some(serde_json::json!({
                "sourceBlockHeight": event.block_height,
                "sourceContractAddress": self.contract_address,
            })),
            source: TransferSource::ChainEvent,
        }
    }
}

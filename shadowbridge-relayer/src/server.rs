//! HTTP surface of the relayer.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shadowbridge_common::{ProofBundle, TransferRecord, TransferSource, TransferStats, TransferStatus};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::chain::ChainClient;
use crate::error::IntakeError;
use crate::service::{CreateTransferInput, TransferService};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AppState {
    pub service: TransferService,
    pub chain: ChainClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: TransferService, chain: ChainClient) -> Self {
        Self {
            service,
            chain,
            started_at: Instant::now(),
        }
    }
}

pub fn app_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/transfers", post(create_transfer).get(list_transfers))
        .route("/transfers/:id", get(get_transfer))
        .route("/simulate/chain-event", post(simulate_chain_event))
        .with_state(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Serve `router` on `port` until `shutdown` is cancelled.
pub async fn run_server(router: Router, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("relayer listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// `amountUsd` as sent by clients: a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(f64),
    Text(String),
}

impl AmountField {
    /// NaN when the value is not numeric, so intake rejects it.
    fn value(&self) -> f64 {
        match self {
            AmountField::Number(n) => *n,
            AmountField::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTransferRequest {
    pub sender: String,
    pub recipient: String,
    pub destination_chain: Option<String>,
    pub amount_usd: Option<AmountField>,
    pub proofs: ProofBundle,
    pub source_tx_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateTransferRequest {
    fn into_input(self, source: TransferSource) -> CreateTransferInput {
        CreateTransferInput {
            sender: self.sender,
            recipient: self.recipient,
            destination_chain: self.destination_chain,
            amount_usd: self.amount_usd.map(|a| a.value()).unwrap_or(f64::NAN),
            proofs: self.proofs,
            source_tx_hash: self.source_tx_hash,
            metadata: self.metadata,
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferResponse {
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    pub message_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub total_transfers: u64,
    pub pending_jobs: usize,
    pub chain_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: TransferStats,
    pub fee_bps: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferListResponse {
    pub transfers: Vec<TransferRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub transfer: TransferRecord,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.service.stats().await?;
    Ok(Json(HealthResponse {
        status: "healthy".into(),
        timestamp: Utc::now().to_rfc3339(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        total_transfers: stats.total_transfers,
        pending_jobs: state.service.processor().pending_jobs(),
        chain_ready: state.chain.is_ready(),
    }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.service.stats().await?;
    Ok(Json(StatsResponse {
        stats,
        fee_bps: state.service.options().fee_bps,
    }))
}

async fn create_transfer(
    State(state): State<AppState>,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    accept(&state, body, TransferSource::Api).await
}

/// Same as `POST /transfers`, tagged as if observed on the source chain.
async fn simulate_chain_event(
    State(state): State<AppState>,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    accept(&state, body, TransferSource::ChainEvent).await
}

async fn accept(
    state: &AppState,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
    source: TransferSource,
) -> Result<(StatusCode, Json<CreateTransferResponse>), ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError {
        status: StatusCode::BAD_REQUEST,
        message: rejection.body_text(),
        code: "INVALID_JSON".into(),
    })?;

    let record = state
        .service
        .create_transfer(request.into_input(source))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTransferResponse {
            transfer_id: record.id,
            status: record.status,
            message_hash: format!("{:?}", record.message_hash),
        }),
    ))
}

async fn list_transfers(
    State(state): State<AppState>,
) -> Result<Json<TransferListResponse>, ApiError> {
    let transfers = state.service.list_transfers().await?;
    Ok(Json(TransferListResponse { transfers }))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransferResponse>, ApiError> {
    let not_found = || ApiError {
        status: StatusCode::NOT_FOUND,
        message: "Transfer not found".into(),
        code: "NOT_FOUND".into(),
    };
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let transfer = state.service.get_transfer(id).await?.ok_or_else(not_found)?;
    Ok(Json(TransferResponse { transfer }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: String,
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        let status = match &err {
            IntakeError::Validation(_) | IntakeError::MissingProof(_) => StatusCode::BAD_REQUEST,
            IntakeError::ProcessorStopped => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::Store(e) => {
                tracing::error!(error = %e, "transfer store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
            code: err.error_code().into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "errorCode": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

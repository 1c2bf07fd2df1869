//! HTTP API for signing, submission and confirmation follow-ups
//!
//! Every response is wrapped in `{status, payload}`. Failures are reported as
//! HTTP 400 with `payload.message` set to the error text.

use crate::config::{ApiConfig, ConfirmationConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::tx::{ConfirmationOutcome, ConfirmationTracker, TransactionExecutor, TransactionRequest};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::H256;
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<TransactionExecutor>,
    pub tracker: Arc<ConfirmationTracker>,
    pub confirmation: ConfirmationConfig,
}

/// Build the router without binding it
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sign-and-send", post(sign_and_send))
        .route("/sign", post(sign))
        .route("/sign-hash", post(sign_hash))
        .route("/address", get(address))
        .route("/public-key", get(public_key))
        .route("/wait-for-receipt", post(wait_for_receipt))
        .route("/wait-for-blocks", post(wait_for_blocks))
        .route("/transactions/:hash/status", get(transaction_status))
        .route("/nonce", get(nonce))
        .route("/nonce/resync", post(resync_nonce))
        .route("/balance", get(balance))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` resolves
pub async fn run_server(
    config: ApiConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> GatewayResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// Envelope

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    payload: T,
}

#[derive(Serialize)]
struct ErrorPayload {
    message: String,
    #[serde(flatten)]
    outcome: Option<ConfirmationOutcome>,
}

fn ok<T: Serialize>(payload: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status: "ok",
            payload,
        }),
    )
        .into_response()
}

/// Error wrapper rendering the error envelope
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(GatewayError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(
            kind = self.0.kind(),
            retryable = self.0.is_retryable(),
            "{}",
            self.0
        );
        (
            StatusCode::BAD_REQUEST,
            Json(Envelope {
                status: "error",
                payload: ErrorPayload {
                    message: self.0.to_string(),
                    outcome: ConfirmationOutcome::from_error(&self.0),
                },
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// Request types

#[derive(Deserialize)]
struct TransactionBody {
    /// JSON-encoded transaction, or the transaction object itself
    transaction_dict: serde_json::Value,
}

impl TransactionBody {
    fn parse(self) -> GatewayResult<TransactionRequest> {
        let parsed = match self.transaction_dict {
            serde_json::Value::String(encoded) => serde_json::from_str(&encoded),
            other => serde_json::from_value(other),
        };
        parsed.map_err(|e| GatewayError::InvalidRequest(format!("transaction_dict: {}", e)))
    }
}

#[derive(Deserialize)]
struct SignHashBody {
    unsigned_hash: String,
}

#[derive(Deserialize)]
struct WaitForReceiptBody {
    transaction_hash: String,
    max_wait_secs: Option<u64>,
}

#[derive(Deserialize)]
struct WaitForBlocksBody {
    blocks: Option<u64>,
    max_wait_secs: Option<u64>,
}

fn parse_hash(field: &str, raw: &str) -> GatewayResult<H256> {
    let trimmed = raw.trim().trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|e| GatewayError::InvalidRequest(format!("{}: {}", field, e)))?;
    if bytes.len() != 32 {
        return Err(GatewayError::InvalidRequest(format!(
            "{}: expected 32 bytes, got {}",
            field,
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

impl AppState {
    fn max_wait(&self, requested: Option<u64>) -> Duration {
        requested
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.confirmation.max_waiting_time())
    }
}

// Handlers

async fn sign_and_send(
    State(state): State<AppState>,
    body: Result<Json<TransactionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let request = body.parse()?;
    debug!("sign-and-send request: {:?}", request);

    let submission = state.executor.submit(&request).await?;
    Ok(ok(SignAndSendResponse {
        transaction_hash: format!("{:?}", submission.hash),
    }))
}

async fn sign(
    State(state): State<AppState>,
    body: Result<Json<TransactionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let request = body.parse()?;

    let signed = state.executor.sign(&request).await?;
    info!("Transaction signed - {:?}", signed.hash);
    Ok(ok(SignResponse {
        raw_transaction: format!("0x{}", hex::encode(&signed.raw)),
        hash: format!("{:?}", signed.hash),
        r: signed.r.to_string(),
        s: signed.s.to_string(),
        v: signed.v,
    }))
}

async fn sign_hash(
    State(state): State<AppState>,
    body: Result<Json<SignHashBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let hash = parse_hash("unsigned_hash", &body.unsigned_hash)?;

    let signed = state.executor.sign_hash(hash).await?;
    info!("Hash signed - message hash: {:?}", signed.message_hash);
    Ok(ok(SignHashResponse {
        message_hash: format!("{:?}", signed.message_hash),
        r: signed.r.to_string(),
        s: signed.s.to_string(),
        v: signed.v,
        signature: format!("0x{}", hex::encode(&signed.signature)),
    }))
}

async fn address(State(state): State<AppState>) -> Response {
    ok(AddressResponse {
        address: to_checksum(&state.executor.address(), None),
    })
}

async fn public_key(State(state): State<AppState>) -> Response {
    ok(PublicKeyResponse {
        public_key: state.executor.public_key(),
    })
}

async fn wait_for_receipt(
    State(state): State<AppState>,
    body: Result<Json<WaitForReceiptBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let hash = parse_hash("transaction_hash", &body.transaction_hash)?;
    let max_wait = state.max_wait(body.max_wait_secs);

    let outcome = state.tracker.outcome(hash, max_wait).await?;
    Ok(ok(ReceiptResponse {
        transaction_hash: format!("{:?}", hash),
        outcome,
    }))
}

async fn transaction_status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult {
    let hash = parse_hash("hash", &hash)?;
    let status = state.tracker.status(hash).await?;
    Ok(ok(StatusResponse {
        transaction_hash: format!("{:?}", hash),
        status,
    }))
}

async fn wait_for_blocks(
    State(state): State<AppState>,
    body: Result<Json<WaitForBlocksBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let blocks = body.blocks.unwrap_or(state.confirmation.blocks);
    let max_wait = state.max_wait(body.max_wait_secs);

    let block_number = state.tracker.wait_for_blocks(blocks, max_wait).await?;
    Ok(ok(BlocksResponse { block_number }))
}

async fn nonce(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.executor.nonce_state().await?))
}

async fn resync_nonce(State(state): State<AppState>) -> ApiResult {
    let snapshot = state.executor.resync_nonce().await?;
    info!(
        "Nonce resynced on request - assigned: {}, confirmed: {}",
        snapshot.assigned, snapshot.confirmed
    );
    Ok(ok(snapshot))
}

async fn balance(State(state): State<AppState>) -> ApiResult {
    let balance = state.executor.balance().await?;
    Ok(ok(BalanceResponse {
        address: to_checksum(&state.executor.address(), None),
        balance: balance.to_string(),
    }))
}

/// Health check endpoint - basic liveness
async fn health_check() -> Response {
    ok(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// Response types

#[derive(Serialize)]
struct SignAndSendResponse {
    transaction_hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    raw_transaction: String,
    hash: String,
    r: String,
    s: String,
    v: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignHashResponse {
    message_hash: String,
    r: String,
    s: String,
    v: u64,
    signature: String,
}

#[derive(Serialize)]
struct AddressResponse {
    address: String,
}

#[derive(Serialize)]
struct PublicKeyResponse {
    public_key: String,
}

#[derive(Serialize)]
struct ReceiptResponse {
    transaction_hash: String,
    #[serde(flatten)]
    outcome: ConfirmationOutcome,
}

#[derive(Serialize)]
struct StatusResponse {
    transaction_hash: String,
    /// `None` while the transaction is unmined
    status: Option<crate::chain::ReceiptStatus>,
}

#[derive(Serialize)]
struct BlocksResponse {
    block_number: u64,
}

#[derive(Serialize)]
struct BalanceResponse {
    address: String,
    balance: String,
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
}

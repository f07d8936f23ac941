//! HTTP API for health checks, registry management and order admission

mod auth;

use crate::account::{AccountConfig, ValidatorAccount};
use crate::chain::ChainProvider;
use crate::config::ApiConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::metrics;
use crate::order::{BalanceSnapshot, Order};
use crate::registry::DepositId;
use crate::state::StateManager;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use auth::{authenticate, OwnerSignature, RegistryAction};

/// Dependency checks backing `/ready`
#[async_trait]
pub trait Readiness: Send + Sync {
    async fn check(&self) -> Vec<ComponentHealth>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub component: &'static str,
    pub healthy: bool,
}

/// Database and RPC reachability
pub struct ServiceReadiness {
    state_manager: Arc<StateManager>,
    provider: Arc<ChainProvider>,
}

impl ServiceReadiness {
    pub fn new(state_manager: Arc<StateManager>, provider: Arc<ChainProvider>) -> Self {
        Self {
            state_manager,
            provider,
        }
    }
}

#[async_trait]
impl Readiness for ServiceReadiness {
    async fn check(&self) -> Vec<ComponentHealth> {
        let database = match self.state_manager.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Database health check failed: {}", e);
                false
            }
        };
        let chain = self.provider.health_check().await;

        metrics::record_health_check("database", database);
        metrics::record_health_check("chain", chain);

        vec![
            ComponentHealth {
                component: "database",
                healthy: database,
            },
            ComponentHealth {
                component: "chain",
                healthy: chain,
            },
        ]
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub account: Arc<ValidatorAccount>,
    pub readiness: Arc<dyn Readiness>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/account", get(get_account))
        .route(
            "/validators",
            get(list_validators)
                .post(add_validators)
                .delete(remove_validators),
        )
        .route("/validators/:id", get(get_validator))
        .route("/deposit", post(deposit_validator))
        .route("/wrap", post(wrap_all))
        .route("/claim", post(claim_all))
        .route("/order/proposal", get(propose_order))
        .route("/order/validate", post(validate_order))
        .route("/order/signature", post(check_signature))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> KeeperResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KeeperError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| KeeperError::Internal(e.to_string()))?;

    Ok(())
}

/// Error wrapper rendering `KeeperError` as JSON
pub struct ApiError(KeeperError);

impl From<KeeperError> for ApiError {
    fn from(e: KeeperError) -> Self {
        ApiError(e)
    }
}

fn status_for(error: &KeeperError) -> StatusCode {
    match error {
        KeeperError::Unauthorized => StatusCode::FORBIDDEN,
        KeeperError::AlreadyInitialized
        | KeeperError::NotInitialized
        | KeeperError::ValidatorAlreadyExists(_)
        | KeeperError::EmptyRegistry => StatusCode::CONFLICT,
        KeeperError::ValidatorDoesNotExist(_) => StatusCode::NOT_FOUND,
        KeeperError::LengthMismatch { .. } | KeeperError::InvalidSignaturePayload(_) => {
            StatusCode::BAD_REQUEST
        }
        KeeperError::OrderNotValid(_) | KeeperError::InvalidHash => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        KeeperError::PollTryAtEpoch { .. } => StatusCode::SERVICE_UNAVAILABLE,
        KeeperError::FailedToDeposit(_) | KeeperError::Chain(_) => StatusCode::BAD_GATEWAY,
        KeeperError::Database(_) | KeeperError::Config(_) | KeeperError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            kind: self.0.kind(),
            message: self.0.to_string(),
            retry_at: self.0.retry_at(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify all dependencies
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let details = state.readiness.check().await;
    let ready = details.iter().all(|c| c.healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready, details }))
}

async fn get_account(State(state): State<AppState>) -> impl IntoResponse {
    let balances = match state.account.balances().await {
        Ok(balances) => Some(balances),
        Err(e) => {
            warn!("Could not read balances: {}", e);
            None
        }
    };

    Json(AccountResponse {
        address: state.account.address(),
        config: state.account.config().await,
        pending_validators: state.account.pending_validators().await,
        balances,
    })
}

async fn list_validators(State(state): State<AppState>) -> impl IntoResponse {
    let (ids, records) = state.account.get_validators().await;
    let validators = ids
        .into_iter()
        .zip(records)
        .map(|(id, record)| ValidatorEntry {
            id,
            pubkey: record.pubkey,
            signature: record.signature,
        })
        .collect();
    Json(ValidatorsResponse { validators })
}

async fn get_validator(
    State(state): State<AppState>,
    Path(id): Path<DepositId>,
) -> impl IntoResponse {
    Json(state.account.get_validator(&id).await)
}

async fn add_validators(
    State(state): State<AppState>,
    Json(request): Json<AddValidatorsRequest>,
) -> ApiResult<CountResponse> {
    let count = request.validators.len();
    let mut ids = Vec::with_capacity(count);
    let mut pubkeys = Vec::with_capacity(count);
    let mut signatures = Vec::with_capacity(count);
    for entry in request.validators {
        ids.push(entry.id);
        pubkeys.push(entry.pubkey);
        signatures.push(entry.signature);
    }

    let action = RegistryAction::Add {
        ids: &ids,
        pubkeys: &pubkeys,
        signatures: &signatures,
    };
    let caller = authenticate(
        &action,
        state.account.address(),
        &request.auth,
        state.account.now(),
    )?;

    state
        .account
        .add_validators(caller, ids, pubkeys, signatures)
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn remove_validators(
    State(state): State<AppState>,
    Json(request): Json<RemoveValidatorsRequest>,
) -> ApiResult<CountResponse> {
    let count = request.ids.len();
    let caller = authenticate(
        &RegistryAction::Remove { ids: &request.ids },
        state.account.address(),
        &request.auth,
        state.account.now(),
    )?;

    state
        .account
        .remove_validators(caller, request.ids)
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn deposit_validator(State(state): State<AppState>) -> ApiResult<DepositResponse> {
    let deposit_id = state.account.deposit_validator().await?;
    Ok(Json(DepositResponse { deposit_id }))
}

async fn wrap_all(State(state): State<AppState>) -> ApiResult<AmountResponse> {
    let amount = state.account.wrap_all().await?;
    Ok(Json(AmountResponse { amount }))
}

async fn claim_all(State(state): State<AppState>) -> ApiResult<AmountResponse> {
    let amount = state.account.claim_all().await?;
    Ok(Json(AmountResponse { amount }))
}

async fn propose_order(State(state): State<AppState>) -> ApiResult<ProposalResponse> {
    let order = state.account.propose_order().await?;
    let uid = state.account.order_uid(&order).await?;
    Ok(Json(ProposalResponse { uid, order }))
}

async fn validate_order(
    State(state): State<AppState>,
    Json(order): Json<Order>,
) -> ApiResult<ValidationResponse> {
    state.account.validate(&order).await?;
    Ok(Json(ValidationResponse { valid: true }))
}

async fn check_signature(
    State(state): State<AppState>,
    Json(request): Json<SignatureRequest>,
) -> ApiResult<SignatureResponse> {
    let magic = state
        .account
        .check_signature(request.hash, &request.signature)
        .await?;
    Ok(Json(SignatureResponse {
        magic_value: format!("0x{}", hex::encode(magic)),
    }))
}

// Request types

#[derive(Debug, Deserialize)]
struct AddValidatorsRequest {
    validators: Vec<ValidatorEntry>,
    #[serde(default)]
    auth: OwnerSignature,
}

#[derive(Debug, Deserialize)]
struct RemoveValidatorsRequest {
    ids: Vec<DepositId>,
    #[serde(default)]
    auth: OwnerSignature,
}

#[derive(Debug, Deserialize)]
struct SignatureRequest {
    hash: H256,
    /// ABI-encoded order
    signature: Bytes,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ComponentHealth>,
}

#[derive(Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_at: Option<u64>,
}

#[derive(Serialize)]
struct AccountResponse {
    address: Address,
    config: Option<AccountConfig>,
    pending_validators: usize,
    balances: Option<BalanceSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidatorEntry {
    id: DepositId,
    pubkey: Bytes,
    signature: Bytes,
}

#[derive(Serialize)]
struct ValidatorsResponse {
    validators: Vec<ValidatorEntry>,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Serialize)]
struct DepositResponse {
    deposit_id: DepositId,
}

#[derive(Serialize)]
struct AmountResponse {
    amount: U256,
}

#[derive(Serialize)]
struct ProposalResponse {
    uid: Bytes,
    order: Order,
}

#[derive(Serialize)]
struct ValidationResponse {
    valid: bool,
}

#[derive(Serialize)]
struct SignatureResponse {
    magic_value: String,
}

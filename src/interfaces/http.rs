//! HTTP surface: the payment webhook plus the order, wallet, reward and
//! meter endpoints.

use crate::application::dispatch::{CardFunding, PaymentDispatcher, TopupOutcome};
use crate::application::ledger::Ledger;
use crate::application::meter::{GasMeterTransfer, MeterTransferReceipt};
use crate::application::reconcile::{PaymentWebhook, ReconcileOutcome, SettlementReconciler};
use crate::application::rewards::RewardLedger;
use crate::application::settlement::{OrderRequest, OrderSettlement, SettlementReceipt};
use crate::config::Settings;
use crate::domain::meter::GasMeter;
use crate::domain::money::{Amount, Balance, Units};
use crate::domain::order::Sale;
use crate::domain::ports::{AuthorizationHandle, GatewayHandle, StoreHandle};
use crate::domain::reward::RewardEntry;
use crate::domain::wallet::{Wallet, WalletType};
use crate::error::PaymentError;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub rewards: RewardLedger,
    pub dispatcher: PaymentDispatcher,
    pub settlement: Arc<OrderSettlement>,
    pub meters: GasMeterTransfer,
    pub reconciler: Arc<SettlementReconciler>,
}

impl AppState {
    pub fn new(
        store: StoreHandle,
        gateway: GatewayHandle,
        authorization: AuthorizationHandle,
        settings: &Settings,
    ) -> Self {
        let rewards = RewardLedger::new(store.clone(), settings.rates.clone());
        let dispatcher = PaymentDispatcher::new(
            store.clone(),
            gateway,
            settings.gateway.timeout(),
            settings.funding,
        );
        Self {
            ledger: Ledger::new(store.clone()),
            settlement: Arc::new(OrderSettlement::new(
                store.clone(),
                rewards.clone(),
                dispatcher.clone(),
                authorization,
            )),
            meters: GasMeterTransfer::new(store.clone(), settings.rates.clone()),
            reconciler: Arc::new(SettlementReconciler::new(store, rewards.clone())),
            rewards,
            dispatcher,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = match &self {
            PaymentError::ValidationError(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InsufficientFunds { .. }
            | PaymentError::InsufficientRewardBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            PaymentError::AuthorizationRequired => StatusCode::FORBIDDEN,
            PaymentError::ExternalGatewayError(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
            error_code: self.code().to_string(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, PaymentError>;

/// Unwraps a JSON body, reporting malformed input as a validation error.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PaymentError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| PaymentError::ValidationError(rejection.body_text()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/orders", post(create_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/wallets/topup", post(topup_wallet))
        .route("/wallets/card/fund", post(fund_card))
        .route("/wallets/:owner_id", get(owner_wallets))
        .route("/rewards/:consumer_id", get(reward_pool))
        .route("/meters", post(register_meter))
        .route("/meters/:id/transfer", post(transfer_to_meter))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(%bind_address, "server listening");
    axum::serve(listener, app).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: ReconcileOutcome,
}

/// Always answers 200 so the gateway stops redelivering; problems are only
/// logged.
async fn payment_webhook(State(state): State<AppState>, raw: Bytes) -> (StatusCode, Json<WebhookAck>) {
    let outcome = match serde_json::from_slice::<PaymentWebhook>(&raw) {
        Ok(webhook) => state.reconciler.handle(&webhook).await,
        Err(e) => {
            warn!(error = %e, "unreadable webhook payload");
            ReconcileOutcome::Ignored
        }
    };
    (
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    )
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SettlementReceipt>), PaymentError> {
    let receipt = state.settlement.settle(body(payload)?).await?;
    let status = if receipt.pending_charge.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt)))
}

async fn cancel_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Sale> {
    Ok(Json(state.settlement.cancel(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub owner_id: Uuid,
    #[serde(default = "default_topup_wallet")]
    pub wallet_type: WalletType,
    pub amount: Amount,
    pub phone: String,
}

fn default_topup_wallet() -> WalletType {
    WalletType::Dashboard
}

async fn topup_wallet(
    State(state): State<AppState>,
    payload: Result<Json<TopupRequest>, JsonRejection>,
) -> ApiResult<TopupOutcome> {
    let request = body(payload)?;
    let outcome = state
        .dispatcher
        .topup(request.owner_id, request.wallet_type, request.amount, &request.phone)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CardFundingRequest {
    pub owner_id: Uuid,
    pub amount: Amount,
}

async fn fund_card(
    State(state): State<AppState>,
    payload: Result<Json<CardFundingRequest>, JsonRejection>,
) -> ApiResult<CardFunding> {
    let request = body(payload)?;
    Ok(Json(state.dispatcher.fund_card(request.owner_id, request.amount).await?))
}

#[derive(Debug, Serialize)]
pub struct WalletSummary {
    pub owner_id: Uuid,
    pub wallets: Vec<Wallet>,
    pub total: Balance,
}

async fn owner_wallets(State(state): State<AppState>, Path(owner_id): Path<Uuid>) -> ApiResult<WalletSummary> {
    let mut wallets = Vec::new();
    for wallet_type in [
        WalletType::Dashboard,
        WalletType::Credit,
        WalletType::Card,
        WalletType::Food,
    ] {
        if let Some(wallet) = state.ledger.find(owner_id, wallet_type).await? {
            wallets.push(wallet);
        }
    }
    let total = wallets
        .iter()
        .fold(Balance::ZERO, |sum, wallet| sum + wallet.balance);
    Ok(Json(WalletSummary {
        owner_id,
        wallets,
        total,
    }))
}

#[derive(Debug, Serialize)]
pub struct RewardPool {
    pub consumer_id: Uuid,
    pub balance: Units,
    pub value_rwf: Decimal,
    pub entries: Vec<RewardEntry>,
}

async fn reward_pool(State(state): State<AppState>, Path(consumer_id): Path<Uuid>) -> ApiResult<RewardPool> {
    let entries = state.rewards.history(consumer_id).await?;
    let balance = crate::domain::reward::pool_balance(&entries);
    Ok(Json(RewardPool {
        consumer_id,
        balance,
        value_rwf: state.rewards.rates().redemption_value(balance),
        entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MeterRegistration {
    pub owner_id: Uuid,
    pub meter_number: String,
}

async fn register_meter(
    State(state): State<AppState>,
    payload: Result<Json<MeterRegistration>, JsonRejection>,
) -> ApiResult<GasMeter> {
    let request = body(payload)?;
    Ok(Json(
        state
            .meters
            .register(request.owner_id, &request.meter_number)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct MeterTransferRequest {
    pub consumer_id: Uuid,
    pub units: Decimal,
}

async fn transfer_to_meter(
    State(state): State<AppState>,
    Path(meter_id): Path<Uuid>,
    payload: Result<Json<MeterTransferRequest>, JsonRejection>,
) -> ApiResult<MeterTransferReceipt> {
    let request = body(payload)?;
    Ok(Json(
        state
            .meters
            .transfer(request.consumer_id, meter_id, request.units)
            .await?,
    ))
}

//! HTTP surface over the settlement engine.
//!
//! Thin handlers: parse, delegate to the registry/issuer, map rejections to
//! status codes. Staker identity is taken at face value at this boundary.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::EventBus;
use crate::settlement::{
    claim_id, InMemoryBank, PoolSnapshot, Registry, SettlementSummary, StakeRecord, ValueLedger,
    OUTCOME_COUNT,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub bank: Arc<InMemoryBank>,
    pub events: EventBus,
}

type ApiError = (StatusCode, String);

fn reject(err: anyhow::Error) -> ApiError {
    let msg = err.to_string();
    let status = if msg.contains("unauthorized caller") || msg.contains("not the owner") {
        StatusCode::FORBIDDEN
    } else if msg.contains("unknown pool") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, msg)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(ws_events))
        .route("/api/events", post(create_event).get(list_events))
        .route("/api/events/:id", get(get_event))
        .route("/api/events/:id/stakes", post(place_stake))
        .route("/api/events/:id/stakes/:staker", get(get_stakes))
        .route("/api/events/:id/settle", post(settle_event))
        .route("/api/events/:id/sweep", post(sweep_event))
        .route("/api/treasury", post(set_treasury))
        .route("/api/owner/propose", post(propose_owner))
        .route("/api/owner/accept", post(accept_owner))
        .route("/api/minting/pause", post(pause_minting))
        .route("/api/minting/unpause", post(unpause_minting))
        .route("/api/claims/transfer", post(transfer_claims))
        .route("/api/claims/id/:pool_id/:outcome", get(derive_claim_id))
        .route("/api/claims/:holder", get(get_claims))
        .route("/api/bank/deposit", post(bank_deposit))
        .route("/api/bank/:account", get(bank_balance))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateEventRequest {
    caller: String,
    description: String,
    outcome_labels: [String; OUTCOME_COUNT],
    close_time: DateTime<Utc>,
}

async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    let pool = state
        .registry
        .create_event(
            &req.caller,
            req.description,
            req.outcome_labels,
            req.close_time,
            Utc::now(),
        )
        .map_err(reject)?;
    Ok(Json(pool.snapshot()))
}

async fn list_events(State(state): State<AppState>) -> Json<Vec<PoolSnapshot>> {
    Json(state.registry.pools().iter().map(|p| p.snapshot()).collect())
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    state
        .registry
        .pool(&id)
        .map(|p| Json(p.snapshot()))
        .ok_or((StatusCode::NOT_FOUND, "unknown pool".to_string()))
}

#[derive(Debug, Deserialize)]
struct PlaceStakeRequest {
    staker: String,
    outcome: usize,
    amount: u64,
}

async fn place_stake(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlaceStakeRequest>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    let pool = state
        .registry
        .pool(&id)
        .ok_or((StatusCode::NOT_FOUND, "unknown pool".to_string()))?;
    pool.place_stake(&req.staker, req.outcome, req.amount, Utc::now())
        .map_err(reject)?;
    Ok(Json(pool.snapshot()))
}

async fn get_stakes(
    State(state): State<AppState>,
    Path((id, staker)): Path<(String, String)>,
) -> Result<Json<Vec<StakeRecord>>, ApiError> {
    let pool = state
        .registry
        .pool(&id)
        .ok_or((StatusCode::NOT_FOUND, "unknown pool".to_string()))?;
    Ok(Json(pool.stakes_of(&staker)))
}

#[derive(Debug, Deserialize)]
struct SettleRequest {
    caller: String,
    winning_outcome: usize,
}

async fn settle_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<SettlementSummary>, ApiError> {
    let summary = state
        .registry
        .settle(&req.caller, &id, req.winning_outcome, Utc::now())
        .map_err(reject)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct CallerRequest {
    caller: String,
}

async fn sweep_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Value>, ApiError> {
    let swept = state
        .registry
        .withdraw_remaining(&req.caller, &id)
        .map_err(reject)?;
    Ok(Json(json!({ "swept": swept })))
}

#[derive(Debug, Deserialize)]
struct SetTreasuryRequest {
    caller: String,
    treasury: String,
}

async fn set_treasury(
    State(state): State<AppState>,
    Json(req): Json<SetTreasuryRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .registry
        .set_treasury(&req.caller, &req.treasury)
        .map_err(reject)?;
    Ok(Json(json!({ "treasury": req.treasury })))
}

#[derive(Debug, Deserialize)]
struct ProposeOwnerRequest {
    caller: String,
    new_owner: String,
}

async fn propose_owner(
    State(state): State<AppState>,
    Json(req): Json<ProposeOwnerRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .registry
        .propose_owner(&req.caller, &req.new_owner)
        .map_err(reject)?;
    Ok(Json(json!({ "pending_owner": req.new_owner })))
}

async fn accept_owner(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Value>, ApiError> {
    state.registry.accept_owner(&req.caller).map_err(reject)?;
    Ok(Json(json!({ "owner": req.caller })))
}

async fn pause_minting(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Value>, ApiError> {
    state.registry.pause_minting(&req.caller).map_err(reject)?;
    Ok(Json(json!({ "paused": true })))
}

async fn unpause_minting(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .registry
        .unpause_minting(&req.caller)
        .map_err(reject)?;
    Ok(Json(json!({ "paused": false })))
}

async fn get_claims(
    State(state): State<AppState>,
    Path(holder): Path<String>,
) -> Json<HashMap<String, u64>> {
    Json(state.registry.issuer().balances_of(&holder))
}

async fn derive_claim_id(Path((pool_id, outcome)): Path<(String, usize)>) -> Json<Value> {
    Json(json!({ "claim_id": claim_id(&pool_id, outcome) }))
}

#[derive(Debug, Deserialize)]
struct TransferClaimsRequest {
    from: String,
    to: String,
    claim_id: String,
    amount: u64,
}

async fn transfer_claims(
    State(state): State<AppState>,
    Json(req): Json<TransferClaimsRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .registry
        .issuer()
        .transfer(&req.from, &req.to, &req.claim_id, req.amount)
        .map_err(reject)?;
    Ok(Json(json!({ "transferred": req.amount })))
}

#[derive(Debug, Deserialize, Serialize)]
struct BankDepositRequest {
    account: String,
    amount: u64,
}

async fn bank_deposit(
    State(state): State<AppState>,
    Json(req): Json<BankDepositRequest>,
) -> Result<Json<Value>, ApiError> {
    state.bank.deposit(&req.account, req.amount).map_err(reject)?;
    Ok(Json(json!({
        "account": req.account,
        "balance": state.bank.balance_of(&req.account),
    })))
}

async fn bank_balance(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<Value> {
    Json(json!({
        "account": account,
        "balance": state.bank.balance_of(&account),
    }))
}

/// Stream engine events to a WebSocket client as JSON lines.
async fn ws_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward_events(socket, state.events))
}

async fn forward_events(mut socket: WebSocket, events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            // Dropped messages on a slow client are acceptable; closed bus ends the stream.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

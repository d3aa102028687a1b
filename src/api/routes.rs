//! API Routes
//!
//! HTTP endpoint definitions for the write-side commands and the
//! read-side balance query.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::aggregate::AccountSnapshot;
use crate::error::AppError;
use crate::projection::ViewStore;
use crate::service::{AccountService, CommandReceipt};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AccountService>,
    pub views: Arc<dyn ViewStore>,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAccountRequest {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AmountRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub id: String,
    pub funds: i64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:id", get(fetch_account))
        .route("/accounts/:id/deposits", post(deposit))
        .route("/accounts/:id/withdrawals", post(withdraw))
        .route("/accounts/:id/balance", get(get_balance))
}

/// Create a new account
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), AppError> {
    state.service.create(&request.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse { id: request.id }),
    ))
}

/// Write-side snapshot of an account, rehydrated from the log
async fn fetch_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccountSnapshot>, AppError> {
    let snapshot = state.service.fetch(&id).await?;
    Ok(Json(snapshot))
}

/// Deposit into an account
async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<CommandReceipt>, AppError> {
    let receipt = state.service.deposit(&id, request.amount).await?;
    Ok(Json(receipt))
}

/// Withdraw from an account
async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<CommandReceipt>, AppError> {
    let receipt = state.service.withdraw(&id, request.amount).await?;
    Ok(Json(receipt))
}

/// Read-side balance from the materialized view
async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    let view = state
        .views
        .fetch(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(id.clone()))?;

    Ok(Json(BalanceResponse {
        id: view.account_id,
        funds: view.funds,
    }))
}

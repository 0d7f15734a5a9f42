use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::{dispatch, AppState, AuthenticatedUser};
use crate::models::{
    payments::StatusEnvelope,
    transactions::{Transaction, TransactionStatusReport, TransferRequest},
};
use crate::services::{transactions::TransactionServiceRequest, ServiceError};

pub async fn deposit(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<Transaction>), ServiceError> {
    let transaction = dispatch(&state.transaction_channel, |response| {
        TransactionServiceRequest::Deposit {
            user_id,
            request,
            response,
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<Transaction>), ServiceError> {
    let transaction = dispatch(&state.transaction_channel, |response| {
        TransactionServiceRequest::Withdraw {
            user_id,
            request,
            response,
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<Transaction>>, ServiceError> {
    let transactions = dispatch(&state.transaction_channel, |response| {
        TransactionServiceRequest::ListTransactions { user_id, response }
    })
    .await?;

    Ok(Json(transactions))
}

pub async fn check_status(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(reference): Path<String>,
) -> Result<Json<TransactionStatusReport>, ServiceError> {
    let report = dispatch(&state.transaction_channel, |response| {
        TransactionServiceRequest::CheckStatus {
            user_id,
            reference,
            response,
        }
    })
    .await?;

    Ok(Json(report))
}

/// Provider webhook. Takes either envelope layout. Anyone can reach it, so
/// the service confirms terminal claims with the provider before applying them.
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    let envelope: StatusEnvelope = serde_json::from_value(body).map_err(|e| {
        log::warn!("Unreadable payment callback: {}", e);
        ServiceError::InvalidRequest("unrecognized callback payload".to_string())
    })?;
    let notice = envelope.normalize();

    log::info!(
        "Payment callback for {:?}: {:?}",
        notice.reference,
        notice.status.status
    );

    let transaction = dispatch(&state.transaction_channel, |response| {
        TransactionServiceRequest::Resolve { notice, response }
    })
    .await?;

    Ok(Json(json!({
        "reference": transaction.reference,
        "status": transaction.status,
    })))
}

use axum::{extract::State, http::StatusCode, Json};

use super::{dispatch, AppState, AuthenticatedUser};
use crate::models::{
    referrals::ReferralSummary,
    users::{Registration, User},
};
use crate::services::{users::UserRequest, ServiceError};

pub async fn register(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> Result<(StatusCode, Json<User>), ServiceError> {
    let user = dispatch(&state.user_channel, |response| UserRequest::CreateUser {
        registration,
        response,
    })
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_current_user(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<User>, ServiceError> {
    let user = dispatch(&state.user_channel, |response| UserRequest::GetUser {
        id: user_id,
        response,
    })
    .await?;

    Ok(Json(user))
}

pub async fn get_referrals(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<ReferralSummary>, ServiceError> {
    let summary = dispatch(&state.user_channel, |response| UserRequest::GetReferrals {
        id: user_id,
        response,
    })
    .await?;

    Ok(Json(summary))
}

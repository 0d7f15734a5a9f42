use axum::{extract::State, http::StatusCode, Json};

use super::{dispatch, AppState, AuthenticatedUser};
use crate::models::games::{Game, SpinRequest};
use crate::services::{games::GameRequest, ServiceError};

pub async fn play(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<SpinRequest>,
) -> Result<(StatusCode, Json<Game>), ServiceError> {
    let game = dispatch(&state.game_channel, |response| GameRequest::Play {
        user_id,
        bet: request.bet,
        response,
    })
    .await?;

    Ok((StatusCode::CREATED, Json(game)))
}

pub async fn list_games(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<Game>>, ServiceError> {
    let games = dispatch(&state.game_channel, |response| GameRequest::ListGames {
        user_id,
        response,
    })
    .await?;

    Ok(Json(games))
}

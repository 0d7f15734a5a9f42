use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::games::{Game, NewGame};
use crate::repositories::{BalanceStore, GameStore};

/// Multipliers of the wheel sections, in hundredths.
const WHEEL: [i64; 12] = [0, 50, 100, 0, 200, 50, 0, 150, 50, 0, 300, 100];

pub fn section_multiplier(section: usize) -> Option<Decimal> {
    WHEEL.get(section).map(|m| Decimal::new(*m, 2))
}

pub fn section_score(section: usize) -> i32 {
    (section as i32 + 1) * 10
}

/// Draws a section uniformly.
pub fn spin_wheel() -> usize {
    rand::thread_rng().gen_range(0..WHEEL.len())
}

pub enum GameRequest {
    Play {
        user_id: i64,
        bet: Decimal,
        response: oneshot::Sender<Result<Game, ServiceError>>,
    },
    ListGames {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<Game>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct GameRequestHandler {
    games: Arc<dyn GameStore>,
    balances: Arc<dyn BalanceStore>,
}

impl GameRequestHandler {
    pub fn new(games: Arc<dyn GameStore>, balances: Arc<dyn BalanceStore>) -> Self {
        GameRequestHandler { games, balances }
    }

    async fn play(&self, user_id: i64, bet: Decimal) -> Result<Game, ServiceError> {
        let section = spin_wheel();
        self.settle_game(user_id, bet, section).await
    }

    async fn settle_game(
        &self,
        user_id: i64,
        bet: Decimal,
        section: usize,
    ) -> Result<Game, ServiceError> {
        if bet <= Decimal::ZERO || bet.normalize().scale() > 2 {
            return Err(ServiceError::InvalidAmount);
        }

        if bet > self.balances.get_balance(user_id).await? {
            return Err(ServiceError::InsufficientBalance);
        }

        let multiplier = section_multiplier(section)
            .ok_or_else(|| ServiceError::InvalidRequest(format!("no wheel section {}", section)))?;
        let result = (bet * multiplier - bet).round_dp(2);

        let game = self
            .games
            .insert_game(NewGame {
                user_id,
                score: section_score(section),
                bet,
                multiplier,
                result,
            })
            .await?;

        log::info!(
            "User {} staked {} and landed on x{} ({}).",
            user_id,
            bet,
            multiplier,
            result
        );

        Ok(game)
    }

    async fn list_games(&self, user_id: i64) -> Result<Vec<Game>, ServiceError> {
        Ok(self.games.get_user_games(user_id).await?)
    }
}

#[async_trait]
impl RequestHandler<GameRequest> for GameRequestHandler {
    async fn handle_request(&self, request: GameRequest) {
        match request {
            GameRequest::Play {
                user_id,
                bet,
                response,
            } => {
                let game = self.play(user_id, bet).await;
                let _ = response.send(game);
            }
            GameRequest::ListGames { user_id, response } => {
                let games = self.list_games(user_id).await;
                let _ = response.send(games);
            }
        }
    }
}

pub struct GameService;

impl GameService {
    pub fn new() -> Self {
        GameService {}
    }
}

#[async_trait]
impl Service<GameRequest, GameRequestHandler> for GameService {}

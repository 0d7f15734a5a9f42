use crate::models::games;

use super::{users::apply_balance_delta, GameStore, RepositoryError};

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

const GAME_COLUMNS: &str = "id, user_id, game_type, score, bet, multiplier, result, created_at";

#[derive(Clone)]
pub struct GameRepository {
    conn: PgPool,
}

impl GameRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

fn row_to_game(row: &PgRow) -> Result<games::Game, RepositoryError> {
    Ok(games::Game {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        game_type: row.try_get("game_type")?,
        score: row.try_get("score")?,
        bet: row.try_get("bet")?,
        multiplier: row.try_get("multiplier")?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl GameStore for GameRepository {
    async fn insert_game(&self, game: games::NewGame) -> Result<games::Game, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        apply_balance_delta(&mut *tx, game.user_id, game.result).await?;

        let row = sqlx::query(&format!(
            r#"INSERT INTO games (user_id, game_type, score, bet, multiplier, result)
            VALUES ($1, 'wheel', $2, $3, $4, $5)
            RETURNING {GAME_COLUMNS}"#
        ))
        .bind(game.user_id)
        .bind(game.score)
        .bind(game.bet)
        .bind(game.multiplier)
        .bind(game.result)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        row_to_game(&row)
    }

    async fn get_user_games(&self, user_id: i64) -> Result<Vec<games::Game>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        rows.iter().map(row_to_game).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::users::{tests::insert, UserRepository};
    use crate::repositories::BalanceStore;
    use rust_decimal::Decimal;

    fn game(user_id: i64, result: i64) -> games::NewGame {
        games::NewGame {
            user_id,
            score: 50,
            bet: Decimal::from(20),
            multiplier: Decimal::new(200, 2),
            result: Decimal::from(result),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_insert_game_applies_result(pool: PgPool) {
        let users = UserRepository::new(pool.clone());
        let repository = GameRepository::new(pool);
        let user = insert(&users, "alice").await;
        users.apply_delta(user.id, Decimal::from(20)).await.unwrap();

        let played = repository.insert_game(game(user.id, 20)).await.unwrap();

        assert_eq!(played.game_type, "wheel");
        assert_eq!(users.get_balance(user.id).await.unwrap(), Decimal::from(40));
        assert_eq!(repository.get_user_games(user.id).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_losing_more_than_balance_records_nothing(pool: PgPool) {
        let users = UserRepository::new(pool.clone());
        let repository = GameRepository::new(pool);
        let user = insert(&users, "alice").await;
        users.apply_delta(user.id, Decimal::from(10)).await.unwrap();

        let result = repository.insert_game(game(user.id, -30)).await;

        assert!(matches!(result, Err(RepositoryError::InsufficientBalance)));
        assert!(repository.get_user_games(user.id).await.unwrap().is_empty());
        assert_eq!(users.get_balance(user.id).await.unwrap(), Decimal::from(10));
    }
}

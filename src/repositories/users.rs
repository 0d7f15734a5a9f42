use crate::models::users;

use super::{map_unique_violation, BalanceStore, RepositoryError, UserStore};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};

const USER_COLUMNS: &str =
    "id, username, phone_number, balance, referral_code, referred_by, created_at";

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
}

impl UserRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

fn row_to_user(row: &PgRow) -> Result<users::User, RepositoryError> {
    Ok(users::User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        phone_number: row.try_get("phone_number")?,
        balance: row.try_get("balance")?,
        referral_code: row.try_get("referral_code")?,
        referred_by: row.try_get("referred_by")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Conditional in-place update, so the check and the write are one statement
/// and concurrent deltas for the same row serialize on its row lock.
pub(crate) async fn apply_balance_delta(
    conn: &mut PgConnection,
    user_id: i64,
    delta: Decimal,
) -> Result<Decimal, RepositoryError> {
    let balance: Option<Decimal> = sqlx::query_scalar(
        r#"UPDATE users SET balance = balance + $1
        WHERE id = $2 AND balance + $1 >= 0
        RETURNING balance"#,
    )
    .bind(delta)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(balance) = balance {
        return Ok(balance);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

    if exists {
        Err(RepositoryError::InsufficientBalance)
    } else {
        Err(RepositoryError::UserNotFound)
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn insert_user(&self, user: users::NewUser) -> Result<users::User, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO users (username, phone_number, referral_code, referred_by)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}"#
        ))
        .bind(&user.username)
        .bind(&user.phone_number)
        .bind(&user.referral_code)
        .bind(&user.referred_by)
        .fetch_one(&self.conn)
        .await
        .map_err(map_unique_violation)?;

        row_to_user(&row)
    }

    async fn get_user(&self, id: i64) -> Result<Option<users::User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<users::User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_referrals(&self, code: &str) -> Result<Vec<users::User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referred_by = $1 ORDER BY created_at DESC"
        ))
        .bind(code)
        .fetch_all(&self.conn)
        .await?;

        rows.iter().map(row_to_user).collect()
    }
}

#[async_trait]
impl BalanceStore for UserRepository {
    async fn get_balance(&self, user_id: i64) -> Result<Decimal, RepositoryError> {
        sqlx::query_scalar::<_, Decimal>("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?
            .ok_or(RepositoryError::UserNotFound)
    }

    async fn apply_delta(&self, user_id: i64, delta: Decimal) -> Result<Decimal, RepositoryError> {
        let mut conn = self.conn.acquire().await?;
        apply_balance_delta(&mut *conn, user_id, delta).await
    }
}

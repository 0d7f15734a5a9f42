//! Storage seams. The services only see these traits; `main` decides whether
//! the Postgres repositories or the in-memory store sit behind them.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::models::{
    games::{Game, NewGame},
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::{NewUser, User},
};

pub mod games;
pub mod memory;
pub mod payments;
pub mod transactions;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupted row: {0}")]
    Corrupted(String),
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Balance overflow")]
    BalanceOverflow,
    #[error("User not found")]
    UserNotFound,
    #[error("Transaction not found")]
    TransactionNotFound,
    #[error("Duplicate value for {0}")]
    Conflict(String),
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Fails with `Conflict("username")` or `Conflict("referral_code")` when a
    /// unique field is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, RepositoryError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_referral_code(&self, code: &str)
        -> Result<Option<User>, RepositoryError>;

    async fn get_referrals(&self, code: &str) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync + 'static {
    /// Fails with `UserNotFound` for unknown users.
    async fn get_balance(&self, user_id: i64) -> Result<Decimal, RepositoryError>;

    /// Adds `delta` to the user's balance and returns the new balance. A result
    /// below zero fails with `InsufficientBalance` and leaves the balance as it
    /// was. Concurrent calls for one user are serialized.
    async fn apply_delta(&self, user_id: i64, delta: Decimal) -> Result<Decimal, RepositoryError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync + 'static {
    /// Appends a transaction. A row inserted as `completed` has its amount
    /// applied to the owner's balance in the same unit of work.
    async fn insert_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<Transaction, RepositoryError>;

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, RepositoryError>;

    async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, RepositoryError>;

    /// Newest first.
    async fn get_user_transactions(&self, user_id: i64)
        -> Result<Vec<Transaction>, RepositoryError>;

    /// Moves a pending transaction to `status`.
    ///
    /// Returns `Ok(None)` without touching anything when the row is no longer
    /// pending, and `TransactionNotFound` when `id` does not exist. Moving to
    /// `completed` applies the amount to the balance atomically with the status
    /// change; if that would overdraw the user, neither happens.
    async fn update_transaction_status(
        &self,
        id: i64,
        status: TransactionStatus,
        provider_reference: Option<String>,
    ) -> Result<Option<Transaction>, RepositoryError>;
}

#[async_trait]
pub trait GameStore: Send + Sync + 'static {
    /// Records a finished game and applies its result to the balance in the
    /// same unit of work.
    async fn insert_game(&self, game: NewGame) -> Result<Game, RepositoryError>;

    async fn get_user_games(&self, user_id: i64) -> Result<Vec<Game>, RepositoryError>;
}

/// The storage backend as seen by the services.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub balances: Arc<dyn BalanceStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub games: Arc<dyn GameStore>,
}

impl Stores {
    pub fn postgres(conn: PgPool) -> Self {
        Self {
            users: Arc::new(users::UserRepository::new(conn.clone())),
            balances: Arc::new(users::UserRepository::new(conn.clone())),
            transactions: Arc::new(transactions::TransactionRepository::new(conn.clone())),
            games: Arc::new(games::GameRepository::new(conn)),
        }
    }

    pub fn memory(store: memory::MemoryStore) -> Self {
        Self {
            users: Arc::new(store.clone()),
            balances: Arc::new(store.clone()),
            transactions: Arc::new(store.clone()),
            games: Arc::new(store),
        }
    }
}

/// Maps a unique violation to `Conflict(column)` using the constraint names
/// from the migrations.
pub(crate) fn map_unique_violation(error: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            let field = match db_error.constraint() {
                Some("users_username_key") => "username",
                Some("users_referral_code_key") => "referral_code",
                Some("transactions_reference_key") => "reference",
                Some(other) => other,
                None => "unknown",
            };
            return RepositoryError::Conflict(field.to_string());
        }
    }

    RepositoryError::Database(error)
}

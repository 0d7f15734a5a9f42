//! In-process implementation of every store trait.
//!
//! Balances live in a `DashMap`, so the entry lock taken by `get_mut` is the
//! per-user critical section around each read-modify-write. Ledger changes
//! hold the ledger mutex first and the user entry second, always in that
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::models::{
    games::{Game, NewGame},
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::{NewUser, User},
};

use super::{BalanceStore, GameStore, RepositoryError, TransactionStore, UserStore};

#[derive(Default)]
struct Ledger {
    rows: Vec<Transaction>,
    by_reference: HashMap<String, usize>,
}

#[derive(Default)]
struct Inner {
    users: DashMap<i64, User>,
    // Guards uniqueness checks and holds the last issued user id.
    registration: Mutex<i64>,
    ledger: Mutex<Ledger>,
    games: Mutex<Vec<Game>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_delta_locked(&self, user_id: i64, delta: Decimal) -> Result<Decimal, RepositoryError> {
        let mut user = self
            .inner
            .users
            .get_mut(&user_id)
            .ok_or(RepositoryError::UserNotFound)?;

        let balance = user
            .balance
            .checked_add(delta)
            .ok_or(RepositoryError::BalanceOverflow)?;

        if balance < Decimal::ZERO {
            return Err(RepositoryError::InsufficientBalance);
        }

        user.balance = balance;
        Ok(balance)
    }
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut last_id = self.inner.registration.lock().await;

        for existing in self.inner.users.iter() {
            if existing.username == user.username {
                return Err(RepositoryError::Conflict("username".to_string()));
            }
            if existing.referral_code == user.referral_code {
                return Err(RepositoryError::Conflict("referral_code".to_string()));
            }
        }

        *last_id += 1;
        let created = User {
            id: *last_id,
            username: user.username,
            phone_number: user.phone_number,
            balance: Decimal::ZERO,
            referral_code: user.referral_code,
            referred_by: user.referred_by,
            created_at: now(),
        };

        self.inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.inner.users.get(&id).map(|user| user.clone()))
    }

    async fn get_user_by_referral_code(&self, code: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .inner
            .users
            .iter()
            .find(|user| user.referral_code == code)
            .map(|user| user.clone()))
    }

    async fn get_referrals(&self, code: &str) -> Result<Vec<User>, RepositoryError> {
        let mut referrals: Vec<User> = self
            .inner
            .users
            .iter()
            .filter(|user| user.referred_by.as_deref() == Some(code))
            .map(|user| user.clone())
            .collect();

        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(referrals)
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn get_balance(&self, user_id: i64) -> Result<Decimal, RepositoryError> {
        self.inner
            .users
            .get(&user_id)
            .map(|user| user.balance)
            .ok_or(RepositoryError::UserNotFound)
    }

    async fn apply_delta(&self, user_id: i64, delta: Decimal) -> Result<Decimal, RepositoryError> {
        self.apply_delta_locked(user_id, delta)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<Transaction, RepositoryError> {
        let mut ledger = self.inner.ledger.lock().await;

        if ledger.by_reference.contains_key(&transaction.reference) {
            return Err(RepositoryError::Conflict("reference".to_string()));
        }
        if !self.inner.users.contains_key(&transaction.user_id) {
            return Err(RepositoryError::UserNotFound);
        }
        if transaction.status == TransactionStatus::Completed {
            self.apply_delta_locked(transaction.user_id, transaction.amount)?;
        }

        let timestamp = now();
        let created = Transaction {
            id: ledger.rows.len() as i64 + 1,
            user_id: transaction.user_id,
            kind: transaction.kind,
            amount: transaction.amount,
            status: transaction.status,
            reference: transaction.reference,
            phone_number: transaction.phone_number,
            checkout_request_id: transaction.checkout_request_id,
            provider_reference: transaction.provider_reference,
            created_at: timestamp,
            updated_at: timestamp,
        };

        let index = ledger.rows.len();
        ledger.by_reference.insert(created.reference.clone(), index);
        ledger.rows.push(created.clone());

        Ok(created)
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, RepositoryError> {
        let ledger = self.inner.ledger.lock().await;
        Ok(ledger.rows.iter().find(|row| row.id == id).cloned())
    }

    async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let ledger = self.inner.ledger.lock().await;
        Ok(ledger
            .by_reference
            .get(reference)
            .and_then(|index| ledger.rows.get(*index))
            .cloned())
    }

    async fn get_user_transactions(
        &self,
        user_id: i64,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let ledger = self.inner.ledger.lock().await;
        Ok(ledger
            .rows
            .iter()
            .rev()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_transaction_status(
        &self,
        id: i64,
        status: TransactionStatus,
        provider_reference: Option<String>,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let mut ledger = self.inner.ledger.lock().await;

        let (user_id, amount) = match ledger.rows.iter().find(|row| row.id == id) {
            None => return Err(RepositoryError::TransactionNotFound),
            Some(row) if row.status.is_terminal() => return Ok(None),
            Some(row) => (row.user_id, row.amount),
        };

        if status == TransactionStatus::Completed {
            self.apply_delta_locked(user_id, amount)?;
        }

        let row = ledger
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(RepositoryError::TransactionNotFound)?;

        row.status = status;
        if provider_reference.is_some() {
            row.provider_reference = provider_reference;
        }
        row.updated_at = now();

        Ok(Some(row.clone()))
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn insert_game(&self, game: NewGame) -> Result<Game, RepositoryError> {
        let mut games = self.inner.games.lock().await;

        self.apply_delta_locked(game.user_id, game.result)?;

        let created = Game {
            id: games.len() as i64 + 1,
            user_id: game.user_id,
            game_type: "wheel".to_string(),
            score: game.score,
            bet: game.bet,
            multiplier: game.multiplier,
            result: game.result,
            created_at: now(),
        };
        games.push(created.clone());

        Ok(created)
    }

    async fn get_user_games(&self, user_id: i64) -> Result<Vec<Game>, RepositoryError> {
        let games = self.inner.games.lock().await;
        Ok(games
            .iter()
            .rev()
            .filter(|game| game.user_id == user_id)
            .cloned()
            .collect())
    }
}

use crate::models::transactions::{self, TransactionStatus};

use super::{map_unique_violation, users::apply_balance_delta, RepositoryError, TransactionStore};

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, status, reference, phone_number, \
     checkout_request_id, provider_reference, created_at, updated_at";

#[derive(Clone)]
pub struct TransactionRepository {
    conn: PgPool,
}

impl TransactionRepository {
    pub fn new(conn: PgPool) -> Self {
        TransactionRepository { conn }
    }
}

fn row_to_transaction(row: &PgRow) -> Result<transactions::Transaction, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(transactions::Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: kind.parse().map_err(RepositoryError::Corrupted)?,
        amount: row.try_get("amount")?,
        status: status.parse().map_err(RepositoryError::Corrupted)?,
        reference: row.try_get("reference")?,
        phone_number: row.try_get("phone_number")?,
        checkout_request_id: row.try_get("checkout_request_id")?,
        provider_reference: row.try_get("provider_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert_transaction(
        &self,
        transaction: transactions::NewTransaction,
    ) -> Result<transactions::Transaction, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query(&format!(
            r#"INSERT INTO transactions
                (user_id, kind, amount, status, reference, phone_number,
                 checkout_request_id, provider_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TRANSACTION_COLUMNS}"#
        ))
        .bind(transaction.user_id)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(transaction.status.as_str())
        .bind(&transaction.reference)
        .bind(&transaction.phone_number)
        .bind(&transaction.checkout_request_id)
        .bind(&transaction.provider_reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        if transaction.status == TransactionStatus::Completed {
            apply_balance_delta(&mut *tx, transaction.user_id, transaction.amount).await?;
        }

        tx.commit().await?;

        row_to_transaction(&row)
    }

    async fn get_transaction(
        &self,
        id: i64,
    ) -> Result<Option<transactions::Transaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<transactions::Transaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.conn)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_user_transactions(
        &self,
        user_id: i64,
    ) -> Result<Vec<transactions::Transaction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn update_transaction_status(
        &self,
        id: i64,
        status: TransactionStatus,
        provider_reference: Option<String>,
    ) -> Result<Option<transactions::Transaction>, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query(&format!(
            r#"UPDATE transactions
            SET status = $1,
                provider_reference = COALESCE($2, provider_reference),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND status = 'pending'
            RETURNING {TRANSACTION_COLUMNS}"#
        ))
        .bind(status.as_str())
        .bind(&provider_reference)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let transaction = match row {
            Some(row) => row_to_transaction(&row)?,
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transactions WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&mut *tx)
                        .await?;

                return if exists {
                    Ok(None)
                } else {
                    Err(RepositoryError::TransactionNotFound)
                };
            }
        };

        if transaction.status == TransactionStatus::Completed {
            // Dropping `tx` on error rolls the status change back too.
            apply_balance_delta(&mut *tx, transaction.user_id, transaction.amount).await?;
        }

        tx.commit().await?;

        Ok(Some(transaction))
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{CanonicalStatus, ProviderNotice};
use crate::models::transactions::{
    NewTransaction, Transaction, TransactionKind, TransactionStatus, TransactionStatusReport,
    TransferRequest,
};
use crate::repositories::payments::{format_phone_number, whole_units, PaymentGateway};
use crate::repositories::{RepositoryError, TransactionStore, UserStore};

pub enum TransactionServiceRequest {
    Deposit {
        user_id: i64,
        request: TransferRequest,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    Withdraw {
        user_id: i64,
        request: TransferRequest,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    Resolve {
        notice: ProviderNotice,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    CheckStatus {
        user_id: i64,
        reference: String,
        response: oneshot::Sender<Result<TransactionStatusReport, ServiceError>>,
    },
    ListTransactions {
        user_id: i64,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct TransactionRequestHandler {
    transactions: Arc<dyn TransactionStore>,
    users: Arc<dyn UserStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl TransactionRequestHandler {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        users: Arc<dyn UserStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        TransactionRequestHandler {
            transactions,
            users,
            gateway,
        }
    }

    /// Validates a transfer. Yields the amount, the normalized phone number it
    /// goes to and the user's balance at the time of the check.
    async fn prepare_transfer(
        &self,
        user_id: i64,
        request: &TransferRequest,
    ) -> Result<(Decimal, String, Decimal), ServiceError> {
        whole_units(request.amount)?;

        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let phone_number = match &request.phone_number {
            Some(phone) if !phone.trim().is_empty() => phone.as_str(),
            _ => user.phone_number.as_str(),
        };

        Ok((
            request.amount,
            format_phone_number(phone_number)?,
            user.balance,
        ))
    }

    async fn deposit(
        &self,
        user_id: i64,
        request: TransferRequest,
    ) -> Result<Transaction, ServiceError> {
        let (amount, phone_number, _) = self.prepare_transfer(user_id, &request).await?;

        let receipt = self
            .gateway
            .initiate_collection(amount, &phone_number, user_id)
            .await?;

        let transaction = self
            .transactions
            .insert_transaction(NewTransaction {
                user_id,
                kind: TransactionKind::Deposit,
                amount,
                status: TransactionStatus::Pending,
                reference: receipt.reference,
                phone_number: Some(phone_number),
                checkout_request_id: receipt.checkout_request_id,
                provider_reference: receipt.provider_status.provider_reference,
            })
            .await?;

        log::info!(
            "Deposit {} of {} initiated for user {}.",
            transaction.reference,
            amount,
            user_id
        );

        Ok(transaction)
    }

    async fn withdraw(
        &self,
        user_id: i64,
        request: TransferRequest,
    ) -> Result<Transaction, ServiceError> {
        let (amount, phone_number, balance) = self.prepare_transfer(user_id, &request).await?;

        if amount > balance {
            return Err(ServiceError::InsufficientBalance);
        }

        let receipt = self
            .gateway
            .initiate_payout(amount, &phone_number, user_id)
            .await?;

        let transaction = self
            .transactions
            .insert_transaction(NewTransaction {
                user_id,
                kind: TransactionKind::Withdrawal,
                amount: -amount,
                status: TransactionStatus::Pending,
                reference: receipt.reference,
                phone_number: Some(phone_number),
                checkout_request_id: receipt.checkout_request_id,
                provider_reference: receipt.provider_status.provider_reference,
            })
            .await?;

        log::info!(
            "Withdrawal {} of {} initiated for user {}.",
            transaction.reference,
            amount,
            user_id
        );

        Ok(transaction)
    }

    /// Applies a provider report to the transaction it refers to.
    async fn resolve(
        &self,
        reference: &str,
        status: CanonicalStatus,
    ) -> Result<Transaction, ServiceError> {
        let transaction = self
            .transactions
            .get_transaction_by_reference(reference)
            .await?
            .ok_or(ServiceError::TransactionNotFound)?;

        self.apply_outcome(transaction, status).await
    }

    /// Handles a webhook notice. The webhook is unauthenticated, so a notice
    /// that would end a transaction only triggers a status query; the
    /// provider's answer is what gets applied.
    async fn resolve_notice(&self, notice: ProviderNotice) -> Result<Transaction, ServiceError> {
        let reference = notice.reference.ok_or_else(|| {
            ServiceError::InvalidRequest("callback carries no reference".to_string())
        })?;

        let transaction = self
            .transactions
            .get_transaction_by_reference(&reference)
            .await?
            .ok_or(ServiceError::TransactionNotFound)?;

        if transaction.status.is_terminal() || notice.status.outcome().is_none() {
            return Ok(transaction);
        }

        let confirmed = self.gateway.query_status(&reference).await.map_err(|e| {
            log::warn!("Could not confirm callback for {}: {}", reference, e);
            ServiceError::from(e)
        })?;

        if confirmed.outcome() != notice.status.outcome() {
            log::warn!(
                "Callback for {} claimed {:?} but the provider reports {:?}.",
                reference,
                notice.status.status,
                confirmed.status
            );
        }

        let confirmed = CanonicalStatus {
            provider_reference: confirmed
                .provider_reference
                .or(notice.status.provider_reference),
            ..confirmed
        };

        self.apply_outcome(transaction, confirmed).await
    }

    async fn apply_outcome(
        &self,
        transaction: Transaction,
        status: CanonicalStatus,
    ) -> Result<Transaction, ServiceError> {
        if transaction.status.is_terminal() {
            log::debug!(
                "Transaction {} already {}, ignoring provider report.",
                transaction.reference,
                transaction.status
            );
            return Ok(transaction);
        }

        let Some(outcome) = status.outcome() else {
            return Ok(transaction);
        };

        let updated = match self
            .transactions
            .update_transaction_status(transaction.id, outcome, status.provider_reference)
            .await
        {
            Ok(updated) => updated,
            Err(RepositoryError::InsufficientBalance) => {
                log::error!(
                    "Completing {} would overdraw user {}; left pending for reconciliation.",
                    transaction.reference,
                    transaction.user_id
                );
                return Err(ServiceError::InsufficientBalance);
            }
            Err(e) => return Err(e.into()),
        };

        match updated {
            Some(updated) => {
                log::info!(
                    "Transaction {} moved to {}.",
                    updated.reference,
                    updated.status
                );
                Ok(updated)
            }
            // Lost the race to another resolution; report what it wrote.
            None => self
                .transactions
                .get_transaction(transaction.id)
                .await?
                .ok_or(ServiceError::TransactionNotFound),
        }
    }

    async fn check_status(
        &self,
        user_id: i64,
        reference: &str,
    ) -> Result<TransactionStatusReport, ServiceError> {
        let transaction = self
            .transactions
            .get_transaction_by_reference(reference)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(ServiceError::TransactionNotFound)?;

        if transaction.status.is_terminal() {
            return Ok(TransactionStatusReport {
                transaction,
                provider: None,
            });
        }

        let provider = match self.gateway.query_status(reference).await {
            Ok(provider) => provider,
            Err(e) => {
                log::warn!("Status query for {} failed: {}", reference, e);
                return Err(e.into());
            }
        };

        let transaction = self.apply_outcome(transaction, provider.clone()).await?;

        Ok(TransactionStatusReport {
            transaction,
            provider: Some(provider),
        })
    }

    async fn list_transactions(&self, user_id: i64) -> Result<Vec<Transaction>, ServiceError> {
        Ok(self.transactions.get_user_transactions(user_id).await?)
    }
}

#[async_trait]
impl RequestHandler<TransactionServiceRequest> for TransactionRequestHandler {
    async fn handle_request(&self, request: TransactionServiceRequest) {
        match request {
            TransactionServiceRequest::Deposit {
                user_id,
                request,
                response,
            } => {
                let result = self.deposit(user_id, request).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::Withdraw {
                user_id,
                request,
                response,
            } => {
                let result = self.withdraw(user_id, request).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::Resolve { notice, response } => {
                let result = self.resolve_notice(notice).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::CheckStatus {
                user_id,
                reference,
                response,
            } => {
                let result = self.check_status(user_id, &reference).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::ListTransactions { user_id, response } => {
                let result = self.list_transactions(user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        TransactionService {}
    }
}

#[async_trait]
impl Service<TransactionServiceRequest, TransactionRequestHandler> for TransactionService {}

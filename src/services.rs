use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::repositories::{
    payments::{GatewayError, PaymentGateway},
    RepositoryError, Stores,
};
use crate::settings::Settings;

mod games;
mod http;
mod transactions;
mod users;

#[cfg(test)]
mod testing;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Amount must be a positive number of whole units")]
    InvalidAmount,
    #[error("Invalid phone number")]
    InvalidPhoneNumber,
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Payment provider rejected the request: {0}")]
    GatewayRejected(String),
    #[error("Transaction not found")]
    TransactionNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("User not found")]
    UserNotFound,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0}")]
    Communication(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::InsufficientBalance => ServiceError::InsufficientBalance,
            RepositoryError::UserNotFound => ServiceError::UserNotFound,
            RepositoryError::TransactionNotFound => ServiceError::TransactionNotFound,
            RepositoryError::Conflict(field) if field == "username" => ServiceError::UsernameTaken,
            other => ServiceError::Database(other.to_string()),
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::InvalidPhoneNumber(_) => ServiceError::InvalidPhoneNumber,
            GatewayError::InvalidAmount(_) => ServiceError::InvalidAmount,
            GatewayError::Rejected(message) => ServiceError::GatewayRejected(message),
            other => ServiceError::GatewayRejected(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Spawns the user, transaction and game services and returns the HTTP state
/// holding their request channels.
fn spawn_services(
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    referral_bonus: Decimal,
) -> http::AppState {
    let (transaction_tx, mut transaction_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (game_tx, mut game_rx) = mpsc::channel(512);

    let mut transaction_service = transactions::TransactionService::new();
    let mut user_service = users::UserService::new();
    let mut game_service = games::GameService::new();

    log::info!("Starting transaction service.");
    let handler = transactions::TransactionRequestHandler::new(
        stores.transactions.clone(),
        stores.users.clone(),
        gateway,
    );
    tokio::spawn(async move {
        transaction_service.run(handler, &mut transaction_rx).await;
    });

    log::info!("Starting user service.");
    let handler = users::UserRequestHandler::new(
        stores.users.clone(),
        stores.transactions.clone(),
        referral_bonus,
    );
    tokio::spawn(async move {
        user_service.run(handler, &mut user_rx).await;
    });

    log::info!("Starting game service.");
    let handler = games::GameRequestHandler::new(stores.games.clone(), stores.balances.clone());
    tokio::spawn(async move {
        game_service.run(handler, &mut game_rx).await;
    });

    http::AppState {
        transaction_channel: transaction_tx,
        user_channel: user_tx,
        game_channel: game_tx,
    }
}

pub async fn start_services(
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let state = spawn_services(stores, gateway, settings.referral.bonus);

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.server.listen, state).await
}

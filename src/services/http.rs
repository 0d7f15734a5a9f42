use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    games::GameRequest, transactions::TransactionServiceRequest, users::UserRequest, ServiceError,
};

mod games;
mod transactions;
mod users;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub transaction_channel: mpsc::Sender<TransactionServiceRequest>,
    pub user_channel: mpsc::Sender<UserRequest>,
    pub game_channel: mpsc::Sender<GameRequest>,
}

/// Caller identity as established by the upstream session layer.
pub struct AuthenticatedUser(pub i64);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(AuthenticatedUser)
            .ok_or(ServiceError::Unauthorized)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ServiceError::InvalidAmount
            | ServiceError::InvalidPhoneNumber
            | ServiceError::InsufficientBalance
            | ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
            ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ServiceError::UserNotFound | ServiceError::TransactionNotFound => {
                (StatusCode::NOT_FOUND, "Not found")
            }
            ServiceError::UsernameTaken => (StatusCode::CONFLICT, "Conflict"),
            ServiceError::GatewayRejected(_) => (StatusCode::BAD_GATEWAY, "Payment provider error"),
            ServiceError::Database(_) | ServiceError::Communication(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let details = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": error, "details": details }))).into_response()
    }
}

/// Sends a request to a service and waits for its answer.
async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(format!("Failed to process request: {}", e)))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(format!("Failed to receive response: {}", e)))?
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(users::register))
        .route("/api/user", get(users::get_current_user))
        .route("/api/referrals", get(users::get_referrals))
        .route("/api/transactions", get(transactions::list_transactions))
        .route("/api/transactions/deposit", post(transactions::deposit))
        .route("/api/transactions/withdraw", post(transactions::withdraw))
        .route(
            "/api/transactions/{reference}/status",
            get(transactions::check_status),
        )
        .route("/api/payments/callback", post(transactions::payment_callback))
        .route("/api/games", post(games::play).get(games::list_games))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(listen: &str, state: AppState) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payments::ProviderStatus;
    use crate::repositories::memory::MemoryStore;
    use crate::repositories::Stores;
    use crate::services::spawn_services;
    use crate::services::testing::ScriptedGateway;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::sync::Arc;

    async fn spawn_app() -> String {
        spawn_app_with(ScriptedGateway::new()).await
    }

    async fn spawn_app_with(gateway: Arc<ScriptedGateway>) -> String {
        let state = spawn_services(
            Stores::memory(MemoryStore::new()),
            gateway,
            Decimal::new(500, 2),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn decimal(value: &Value) -> Decimal {
        value.as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_app().await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        for header in [None, Some("abc"), Some("-3")] {
            let mut request = client.get(format!("{}/api/user", base));
            if let Some(header) = header {
                request = request.header(USER_ID_HEADER, header);
            }
            let response = request.send().await.unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["error"], "Unauthorized");
        }
    }

    #[tokio::test]
    async fn test_deposit_callback_and_poll() {
        let gateway = ScriptedGateway::new();
        let base = spawn_app_with(gateway.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/users", base))
            .json(&json!({"username": "alice", "phone_number": "0712345678"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let user: Value = response.json().await.unwrap();
        let user_id = user["id"].as_i64().unwrap().to_string();

        let response = client
            .post(format!("{}/api/transactions/deposit", base))
            .header(USER_ID_HEADER, &user_id)
            .json(&json!({"amount": "50"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let pending: Value = response.json().await.unwrap();
        assert_eq!(pending["status"], "pending");
        let reference = pending["reference"].as_str().unwrap().to_string();
        gateway.set_status(&reference, ProviderStatus::Success, true);

        let response = client
            .post(format!("{}/api/payments/callback", base))
            .json(&json!({
                "response": {
                    "ExternalReference": reference,
                    "ResultCode": 0,
                    "Status": "Success",
                    "MpesaReceiptNumber": "SGR7ABC"
                }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = client
            .get(format!("{}/api/transactions/{}/status", base, reference))
            .header(USER_ID_HEADER, &user_id)
            .send()
            .await
            .unwrap();
        let report: Value = response.json().await.unwrap();
        assert_eq!(report["transaction"]["status"], "completed");
        assert!(report["transaction"]["provider_reference"].is_string());
        assert!(report["provider"].is_null());

        let response = client
            .get(format!("{}/api/user", base))
            .header(USER_ID_HEADER, &user_id)
            .send()
            .await
            .unwrap();
        let user: Value = response.json().await.unwrap();
        assert_eq!(decimal(&user["balance"]), Decimal::from(50));

        let response = client
            .post(format!("{}/api/transactions/withdraw", base))
            .header(USER_ID_HEADER, &user_id)
            .json(&json!({"amount": 150}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["details"], "Insufficient balance");

        let response = client
            .get(format!("{}/api/transactions", base))
            .header(USER_ID_HEADER, &user_id)
            .send()
            .await
            .unwrap();
        let listed: Vec<Value> = response.json().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_forged_callback_does_not_credit() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let user: Value = client
            .post(format!("{}/api/users", base))
            .json(&json!({"username": "mallory", "phone_number": "0712345678"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let user_id = user["id"].as_i64().unwrap().to_string();

        let pending: Value = client
            .post(format!("{}/api/transactions/deposit", base))
            .header(USER_ID_HEADER, &user_id)
            .json(&json!({"amount": 1000000}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let response = client
            .post(format!("{}/api/payments/callback", base))
            .json(&json!({
                "reference": pending["reference"],
                "status": "SUCCESS",
                "success": true
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "pending");

        let user: Value = client
            .get(format!("{}/api/user", base))
            .header(USER_ID_HEADER, &user_id)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(decimal(&user["balance"]), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_callback_for_unknown_reference() {
        let base = spawn_app().await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/payments/callback", base))
            .json(&json!({"reference": "spin_0_0_0", "status": "SUCCESS", "success": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_callback_is_rejected() {
        let base = spawn_app().await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/payments/callback", base))
            .json(&json!({"unexpected": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_referral_and_game_routes() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let alice: Value = client
            .post(format!("{}/api/users", base))
            .json(&json!({"username": "alice", "phone_number": "712345678"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let alice_id = alice["id"].as_i64().unwrap().to_string();

        let response = client
            .post(format!("{}/api/users", base))
            .json(&json!({
                "username": "bob",
                "phone_number": "0712345679",
                "referral_code": alice["referral_code"]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let duplicate = client
            .post(format!("{}/api/users", base))
            .json(&json!({"username": "bob", "phone_number": "0712345679"}))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let summary: Value = client
            .get(format!("{}/api/referrals", base))
            .header(USER_ID_HEADER, &alice_id)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["referrals"][0]["username"], "bob");
        assert_eq!(decimal(&summary["total_earned"]), Decimal::new(5, 0));

        let response = client
            .post(format!("{}/api/games", base))
            .header(USER_ID_HEADER, &alice_id)
            .json(&json!({"bet": "2.50"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let game: Value = response.json().await.unwrap();

        let user: Value = client
            .get(format!("{}/api/user", base))
            .header(USER_ID_HEADER, &alice_id)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            decimal(&user["balance"]),
            Decimal::from(5) + decimal(&game["result"])
        );

        let games: Vec<Value> = client
            .get(format!("{}/api/games", base))
            .header(USER_ID_HEADER, &alice_id)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(games.len(), 1);

        let too_big = client
            .post(format!("{}/api/games", base))
            .header(USER_ID_HEADER, &alice_id)
            .json(&json!({"bet": 1000}))
            .send()
            .await
            .unwrap();
        assert_eq!(too_big.status(), StatusCode::BAD_REQUEST);
    }
}

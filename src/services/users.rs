use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::referrals::{ReferralSummary, ReferredUser};
use crate::models::transactions::{NewTransaction, TransactionKind, TransactionStatus};
use crate::models::users::{NewUser, Registration, User};
use crate::repositories::payments::format_phone_number;
use crate::repositories::{RepositoryError, TransactionStore, UserStore};

const REFERRAL_CODE_LENGTH: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 5;

pub enum UserRequest {
    CreateUser {
        registration: Registration,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetUser {
        id: i64,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetReferrals {
        id: i64,
        response: oneshot::Sender<Result<ReferralSummary, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    users: Arc<dyn UserStore>,
    transactions: Arc<dyn TransactionStore>,
    referral_bonus: Decimal,
}

fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LENGTH)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

impl UserRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        transactions: Arc<dyn TransactionStore>,
        referral_bonus: Decimal,
    ) -> Self {
        UserRequestHandler {
            users,
            transactions,
            referral_bonus,
        }
    }

    async fn create_user(&self, registration: Registration) -> Result<User, ServiceError> {
        let username = registration.username.trim().to_string();
        if username.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "username must not be empty".to_string(),
            ));
        }
        let phone_number = format_phone_number(&registration.phone_number)?;

        let referrer = match registration
            .referral_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
        {
            Some(code) => {
                let referrer = self.users.get_user_by_referral_code(code).await?;
                if referrer.is_none() {
                    log::warn!("Ignoring unknown referral code '{}'.", code);
                }
                referrer
            }
            None => None,
        };

        let mut attempt = 0;
        let user = loop {
            attempt += 1;
            let new_user = NewUser {
                username: username.clone(),
                phone_number: phone_number.clone(),
                referral_code: generate_referral_code(),
                referred_by: referrer.as_ref().map(|r| r.referral_code.clone()),
            };

            match self.users.insert_user(new_user).await {
                Ok(user) => break user,
                Err(RepositoryError::Conflict(field))
                    if field == "referral_code" && attempt < REFERRAL_CODE_ATTEMPTS =>
                {
                    log::debug!("Referral code collision, drawing another.");
                }
                Err(e) => return Err(e.into()),
            }
        };

        log::info!("Registered user {} ({}).", user.id, user.username);

        if let Some(referrer) = referrer {
            self.credit_referrer(&referrer, &user).await;
        }

        Ok(user)
    }

    /// Pays the referral bonus. Registration has already succeeded, so a
    /// failure here is only logged.
    async fn credit_referrer(&self, referrer: &User, referred: &User) {
        if self.referral_bonus <= Decimal::ZERO {
            return;
        }

        let bonus = NewTransaction {
            user_id: referrer.id,
            kind: TransactionKind::Referral,
            amount: self.referral_bonus,
            status: TransactionStatus::Completed,
            reference: format!("referral_{}", referred.id),
            phone_number: None,
            checkout_request_id: None,
            provider_reference: None,
        };

        match self.transactions.insert_transaction(bonus).await {
            Ok(transaction) => log::info!(
                "Credited {} to user {} for referring user {}.",
                transaction.amount,
                referrer.id,
                referred.id
            ),
            Err(e) => log::error!(
                "Failed to credit referral bonus to user {}: {}",
                referrer.id,
                e
            ),
        }
    }

    async fn get_user(&self, id: i64) -> Result<User, ServiceError> {
        self.users
            .get_user(id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    async fn get_referrals(&self, id: i64) -> Result<ReferralSummary, ServiceError> {
        let user = self.get_user(id).await?;

        let referrals = self
            .users
            .get_referrals(&user.referral_code)
            .await?
            .into_iter()
            .map(|referred| ReferredUser {
                username: referred.username,
                joined_at: referred.created_at,
            })
            .collect();

        let total_earned = self
            .transactions
            .get_user_transactions(id)
            .await?
            .iter()
            .filter(|t| {
                t.kind == TransactionKind::Referral && t.status == TransactionStatus::Completed
            })
            .map(|t| t.amount)
            .sum();

        Ok(ReferralSummary {
            referral_code: user.referral_code,
            referrals,
            total_earned,
        })
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::CreateUser {
                registration,
                response,
            } => {
                let user = self.create_user(registration).await;
                let _ = response.send(user);
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(id).await;
                let _ = response.send(user);
            }
            UserRequest::GetReferrals { id, response } => {
                let summary = self.get_referrals(id).await;
                let _ = response.send(summary);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;
    use crate::services::testing::balance_of;

    fn handler(store: &MemoryStore) -> UserRequestHandler {
        UserRequestHandler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Decimal::new(500, 2),
        )
    }

    fn registration(username: &str, referral_code: Option<&str>) -> Registration {
        Registration {
            username: username.to_string(),
            phone_number: "0712345678".to_string(),
            referral_code: referral_code.map(str::to_string),
        }
    }

    #[test]
    fn test_referral_code_shape() {
        let code = generate_referral_code();

        assert_eq!(code.len(), REFERRAL_CODE_LENGTH);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_create_user_starts_empty() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        let user = handler
            .create_user(registration("  alice ", None))
            .await
            .unwrap();

        assert_eq!(user.username, "alice");
        assert_eq!(user.phone_number, "254712345678");
        assert_eq!(user.balance, Decimal::ZERO);
        assert!(user.referred_by.is_none());
        assert_eq!(handler.get_user(user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_create_user_rejects_bad_input() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        let blank = handler.create_user(registration("   ", None)).await;
        let phone = handler
            .create_user(Registration {
                username: "alice".to_string(),
                phone_number: "12".to_string(),
                referral_code: None,
            })
            .await;

        assert!(matches!(blank, Err(ServiceError::InvalidRequest(_))));
        assert!(matches!(phone, Err(ServiceError::InvalidPhoneNumber)));
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        handler.create_user(registration("alice", None)).await.unwrap();
        let result = handler.create_user(registration("alice", None)).await;

        assert!(matches!(result, Err(ServiceError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_referral_credits_referrer() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        let alice = handler.create_user(registration("alice", None)).await.unwrap();
        let bob = handler
            .create_user(registration("bob", Some(&alice.referral_code)))
            .await
            .unwrap();
        handler
            .create_user(registration("carol", Some(&alice.referral_code)))
            .await
            .unwrap();

        assert_eq!(bob.referred_by.as_deref(), Some(alice.referral_code.as_str()));
        assert_eq!(balance_of(&store, alice.id).await, Decimal::new(1000, 2));
        assert_eq!(balance_of(&store, bob.id).await, Decimal::ZERO);

        let summary = handler.get_referrals(alice.id).await.unwrap();
        let mut names: Vec<&str> = summary
            .referrals
            .iter()
            .map(|r| r.username.as_str())
            .collect();
        names.sort();

        assert_eq!(summary.referral_code, alice.referral_code);
        assert_eq!(names, vec!["bob", "carol"]);
        assert_eq!(summary.total_earned, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_unknown_referral_code_is_ignored() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        let user = handler
            .create_user(registration("alice", Some("NOSUCHCD")))
            .await
            .unwrap();

        assert!(user.referred_by.is_none());
    }

    #[tokio::test]
    async fn test_zero_bonus_records_nothing() {
        let store = MemoryStore::new();
        let handler = UserRequestHandler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Decimal::ZERO,
        );

        let alice = handler.create_user(registration("alice", None)).await.unwrap();
        handler
            .create_user(registration("bob", Some(&alice.referral_code)))
            .await
            .unwrap();

        let summary = handler.get_referrals(alice.id).await.unwrap();
        assert_eq!(summary.referrals.len(), 1);
        assert_eq!(summary.total_earned, Decimal::ZERO);
        assert!(store.get_user_transactions(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_user() {
        let store = MemoryStore::new();
        let handler = handler(&store);

        assert!(matches!(
            handler.get_user(99).await,
            Err(ServiceError::UserNotFound)
        ));
        assert!(matches!(
            handler.get_referrals(99).await,
            Err(ServiceError::UserNotFound)
        ));
    }
}

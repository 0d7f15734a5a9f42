//! Test doubles shared by the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::payments::{CanonicalStatus, GatewayReceipt, ProviderStatus};
use crate::models::users::{NewUser, User};
use crate::repositories::memory::MemoryStore;
use crate::repositories::payments::{
    external_reference, format_phone_number, whole_units, GatewayError, PaymentGateway,
};
use crate::repositories::{BalanceStore, UserStore};

/// A payment provider whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedGateway {
    statuses: Mutex<HashMap<String, CanonicalStatus>>,
    rejection: Mutex<Option<String>>,
    unreachable: AtomicBool,
    initiations: AtomicUsize,
    queries: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_with(&self, message: &str) {
        *self.rejection.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_status(&self, reference: &str, status: ProviderStatus, success: bool) {
        self.statuses.lock().unwrap().insert(
            reference.to_string(),
            CanonicalStatus {
                status,
                success,
                provider_reference: Some(format!("MPESA-{}", reference.len())),
            },
        );
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn initiations(&self) -> usize {
        self.initiations.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn receipt(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError> {
        format_phone_number(phone_number)?;
        whole_units(amount)?;
        self.initiations.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.rejection.lock().unwrap().clone() {
            return Err(GatewayError::Rejected(message));
        }

        Ok(GatewayReceipt {
            reference: external_reference(owner_id),
            provider_status: CanonicalStatus {
                status: ProviderStatus::Queued,
                success: true,
                provider_reference: None,
            },
            checkout_request_id: Some(format!("ws_CO_{}", owner_id)),
        })
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate_collection(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.receipt(amount, phone_number, owner_id)
    }

    async fn initiate_payout(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.receipt(amount, phone_number, owner_id)
    }

    async fn query_status(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::MalformedResponse("provider timed out".to_string()));
        }

        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or(CanonicalStatus {
                status: ProviderStatus::Queued,
                success: true,
                provider_reference: None,
            }))
    }
}

pub async fn funded_user(store: &MemoryStore, username: &str, balance: i64) -> User {
    let user = store
        .insert_user(NewUser {
            username: username.to_string(),
            phone_number: "254712345678".to_string(),
            referral_code: format!("REF{}", username.to_uppercase()),
            referred_by: None,
        })
        .await
        .unwrap();

    if balance > 0 {
        store
            .apply_delta(user.id, Decimal::from(balance))
            .await
            .unwrap();
    }

    store.get_user(user.id).await.unwrap().unwrap()
}

pub async fn balance_of(store: &MemoryStore, user_id: i64) -> Decimal {
    store.get_user(user_id).await.unwrap().unwrap().balance
}

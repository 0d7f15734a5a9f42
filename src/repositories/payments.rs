//! Payment provider seam and the provider-independent helpers around it.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::payments::{CanonicalStatus, GatewayReceipt};

pub mod payhero;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("{0}")]
    Rejected(String),
    #[error("Provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Asks the provider to prompt `phone_number` for a payment (STK push).
    async fn initiate_collection(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Asks the provider to send `amount` to `phone_number`.
    async fn initiate_payout(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError>;

    async fn query_status(&self, reference: &str) -> Result<CanonicalStatus, GatewayError>;
}

/// Normalizes a Kenyan mobile number to `254XXXXXXXXX`.
pub fn format_phone_number(phone: &str) -> Result<String, GatewayError> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    let formatted = match digits.len() {
        9 => format!("254{}", digits),
        10 if digits.starts_with('0') => format!("254{}", &digits[1..]),
        12 if digits.starts_with("254") => digits,
        _ => return Err(GatewayError::InvalidPhoneNumber(phone.to_string())),
    };

    Ok(formatted)
}

/// `spin_<unix millis>_<owner>_<random>`. The random tail keeps two requests
/// from the same owner within one millisecond apart.
pub fn external_reference(owner_id: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "spin_{}_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        owner_id,
        &suffix[..8]
    )
}

/// The provider only moves whole currency units.
pub fn whole_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount <= Decimal::ZERO || amount.fract() != Decimal::ZERO {
        return Err(GatewayError::InvalidAmount(amount));
    }

    amount.to_i64().ok_or(GatewayError::InvalidAmount(amount))
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub phone_number: String,
    pub balance: Decimal,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

/// Registration payload as received over HTTP.
#[derive(Clone, Debug, Deserialize)]
pub struct Registration {
    pub username: String,
    pub phone_number: String,
    pub referral_code: Option<String>,
}

/// Row handed to a user store. `referred_by` has already been checked
/// against existing referral codes.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub phone_number: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
}

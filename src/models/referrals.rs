use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferredUser {
    pub username: String,
    pub joined_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferralSummary {
    pub referral_code: String,
    pub referrals: Vec<ReferredUser>,
    pub total_earned: Decimal,
}

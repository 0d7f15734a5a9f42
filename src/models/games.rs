use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Game {
    pub id: i64,
    pub user_id: i64,
    pub game_type: String,
    pub score: i32,
    pub bet: Decimal,
    pub multiplier: Decimal,
    pub result: Decimal,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug)]
pub struct NewGame {
    pub user_id: i64,
    pub score: i32,
    pub bet: Decimal,
    pub multiplier: Decimal,
    pub result: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpinRequest {
    pub bet: Decimal,
}

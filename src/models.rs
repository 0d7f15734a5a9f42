pub mod games;
pub mod payments;
pub mod referrals;
pub mod transactions;
pub mod users;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Server {
    pub listen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayHero {
    pub url: String,
    pub username: String,
    pub password: String,
    pub channel_id: u32,
    pub provider: String,
    pub network_code: String,
    pub callback_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Referral {
    pub bonus: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub postgres: Option<Postgres>,
    pub payhero: PayHero,
    pub referral: Referral,
}

impl Settings {
    /// Loads `path`, then lets `SPIN__SECTION__KEY` variables override it so
    /// provider credentials can stay out of the file.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.listen", "0.0.0.0:8080")?
            .set_default("storage.backend", "postgres")?
            .set_default("payhero.url", "https://backend.payhero.co.ke/api/v2/")?
            .set_default("payhero.provider", "m-pesa")?
            .set_default("payhero.network_code", "63902")?
            .set_default("payhero.timeout_secs", 15)?
            .set_default("referral.bonus", "5.00")?
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SPIN").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

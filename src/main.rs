use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use repositories::{memory::MemoryStore, payments::payhero::PayHeroApi, Stores};
use settings::StorageBackend;

mod models;
mod repositories;
mod services;
mod settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let settings = settings::Settings::new(&args.config)?;
    log::info!("Starting spin wallet.");

    let gateway = Arc::new(PayHeroApi::new(&settings.payhero)?);

    let stores = match settings.storage.backend {
        StorageBackend::Postgres => {
            let postgres = settings.postgres.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is postgres but [postgres] is missing")
            })?;

            let conn = PgPoolOptions::new()
                .max_connections(postgres.max_connections)
                .connect(&postgres.url)
                .await?;

            log::info!("Running database migrations.");
            sqlx::migrate!("./migrations").run(&conn).await?;

            Stores::postgres(conn)
        }
        StorageBackend::Memory => {
            log::warn!("Using the in-memory store. Nothing will survive a restart.");
            Stores::memory(MemoryStore::new())
        }
    };

    services::start_services(stores, gateway, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}

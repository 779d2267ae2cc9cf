use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use backupvault::config::AppConfig;
use backupvault::scheduler::Scheduler;
use backupvault::store::postgres::PgStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let app_config = AppConfig::from_env();

    let database_url = app_config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("Failed to connect to the metadata database")?;

    let store = Arc::new(PgStore::new(pool));
    let scheduler = Scheduler::new(app_config, store.clone(), store);

    info!("scheduler starting");
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    scheduler.shutdown().await;
    info!("scheduler stopped");
    Ok(())
}

//! Roster Sync Worker - roster upload and session ledger synchronization
//!
//! This worker connects to NATS and handles upload requests, or runs a
//! single upload from the command line.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::sync::{RosterSync, SyncSettings};
use crate::types::UploadRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Logs directory - LOGS_DIR or ../logs (relative to worker)
    std::fs::create_dir_all(&config.logs_dir).ok();
    services::job_history::init(&config.logs_dir);

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - console (stderr) and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,roster_sync_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)) // console
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
            db::run_migrations(&pool).await
        }
        Command::Upload { file, target } => {
            let csv_content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read upload file {}", file.display()))?;
            upload_once(config, UploadRequest { csv_content, target_id: target }).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Roster Sync Worker...");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    if let Err(e) = handlers::start_handlers(nats_client, pool, &config).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Run one upload and print its result; a failed upload is a failed process
async fn upload_once(config: Config, request: UploadRequest) -> Result<()> {
    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&pool).await?;

    let sync = RosterSync::postgres(pool, SyncSettings::from(&config));
    let result = sync.run(&request).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!(
            "Upload failed: {}",
            result.message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

//! NATS message handlers

pub mod jobs;
pub mod ping;
pub mod upload;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::sync::{RosterSync, SyncSettings};
use crate::services::upload_processor::UploadProcessor;

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // One engine for every entry point; its lock serializes uploads
    let settings = SyncSettings::from(config);
    info!(
        "Roster sync: ids {}-<n> above {}, session batch size {}",
        settings.id_prefix, settings.id_floor, settings.session_batch_size
    );
    let sync = Arc::new(RosterSync::postgres(pool, settings));

    let upload_processor = Arc::new(UploadProcessor::new(client.clone(), Arc::clone(&sync)).await?);

    // Subscribe to all subjects
    let ping_sub = client.subscribe("roster.ping").await?;
    let upload_run_sub = client.subscribe("roster.upload.run").await?;
    let upload_submit_sub = client.subscribe("roster.upload.submit").await?;
    let retry_ledger_sub = client.subscribe("roster.upload.retry_ledger").await?;
    let job_history_sub = client.subscribe("roster.jobs.history").await?;

    info!("Subscribed to NATS subjects");

    let client_ping = client.clone();
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let client_run = client.clone();
    let sync_run = Arc::clone(&sync);
    let upload_run_handle = tokio::spawn(async move {
        upload::handle_upload_run(client_run, upload_run_sub, sync_run).await
    });

    let client_submit = client.clone();
    let processor_submit = Arc::clone(&upload_processor);
    let upload_submit_handle = tokio::spawn(async move {
        upload::handle_upload_submit(client_submit, upload_submit_sub, processor_submit).await
    });

    let client_retry = client.clone();
    let sync_retry = Arc::clone(&sync);
    let retry_ledger_handle = tokio::spawn(async move {
        upload::handle_retry_ledger(client_retry, retry_ledger_sub, sync_retry).await
    });

    let client_history = client.clone();
    let job_history_handle = tokio::spawn(async move {
        jobs::handle_job_history(client_history, job_history_sub).await
    });

    let processor_worker = Arc::clone(&upload_processor);
    let upload_worker_handle = tokio::spawn(async move {
        processor_worker.start_processing().await
    });

    info!("All handlers started, waiting for messages...");

    // Any handler finishing means its subscription is gone
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = upload_run_handle => {
            error!("Upload run handler finished: {:?}", result);
        }
        result = upload_submit_handle => {
            error!("Upload submit handler finished: {:?}", result);
        }
        result = retry_ledger_handle => {
            error!("Ledger retry handler finished: {:?}", result);
        }
        result = job_history_handle => {
            error!("Job history handler finished: {:?}", result);
        }
        result = upload_worker_handle => {
            error!("Upload job processor finished: {:?}", result);
        }
    }

    Ok(())
}

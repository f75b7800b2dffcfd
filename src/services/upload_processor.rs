//! Upload JetStream processor
//!
//! Queued uploads go through JetStream so large files do not block a
//! request/reply round trip and survive worker restarts. Jobs are consumed
//! one at a time; the shared `RosterSync` lock serializes them with direct
//! uploads as well.
//!
//! ## Streams
//! - `ROSTER_UPLOAD_JOBS` - roster upload jobs

use std::sync::Arc;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::job_history::JOB_HISTORY;
use crate::services::sync::RosterSync;
use crate::types::{
    QueuedUploadJob, UploadJobRequest, UploadJobStatus, UploadJobStatusUpdate, UploadJobSubmitResponse,
    UploadResult,
};

// Stream and consumer names
const STREAM_NAME: &str = "ROSTER_UPLOAD_JOBS";
const CONSUMER_NAME: &str = "upload_workers";
const SUBJECT: &str = "roster.jobs.upload";
const STATUS_PREFIX: &str = "roster.job.upload.status";
const JOB_TYPE: &str = "upload";

pub struct UploadProcessor {
    client: Client,
    js: JsContext,
    sync: Arc<RosterSync>,
}

impl UploadProcessor {
    /// Create the processor, making sure the upload stream exists
    pub async fn new(client: Client, sync: Arc<RosterSync>) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 100 * 1024 * 1024, // uploads can be large
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream upload stream '{}' ready", STREAM_NAME);

        Ok(Self { client, js, sync })
    }

    pub async fn submit_job(&self, request: UploadJobRequest) -> Result<UploadJobSubmitResponse> {
        let job = QueuedUploadJob::new(request);
        let job_id = job.id;

        let payload = serde_json::to_vec(&job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!(
            "Upload job {} submitted: {} ({} bytes)",
            job_id,
            job.request.filename,
            job.request.csv_content.len()
        );

        self.publish_status(job_id, UploadJobStatus::Queued { position: 1 }).await?;

        Ok(UploadJobSubmitResponse {
            job_id,
            message: "Upload job submitted".to_string(),
        })
    }

    pub async fn publish_status(&self, job_id: Uuid, status: UploadJobStatus) -> Result<()> {
        let update = UploadJobStatusUpdate::new(job_id, status);
        let subject = status_subject(job_id);
        let payload = serde_json::to_vec(&update)?;

        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Consume queued jobs until the stream closes
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream upload consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Sequential: uploads must not overlap
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process upload job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving upload message: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let job: QueuedUploadJob = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                // Never going to parse; drop it instead of redelivering
                warn!("Discarding malformed upload job: {}", e);
                if let Err(e) = msg.ack().await {
                    error!("Failed to ack malformed upload job: {:?}", e);
                }
                return Ok(());
            }
        };
        let job_id = job.id;
        let started_at = Utc::now();

        info!("Processing upload job {} ({})", job_id, job.request.filename);

        let result = self.run_reporting_stages(job_id, &job.request).await;

        let status = final_status(&result);
        if let Err(e) = self.publish_status(job_id, status).await {
            warn!("Failed to publish final status for upload job {}: {}", job_id, e);
        }

        let filename = Some(job.request.filename.clone());
        if result.success {
            info!(
                "Upload job {} completed in {}ms: {} accepted, {} created, {} updated",
                job_id, result.duration_ms, result.accepted_rows, result.created_count, result.updated_count
            );
            JOB_HISTORY.record_completed(job_id, JOB_TYPE, filename, started_at, result);
        } else {
            let message = result.message.clone().unwrap_or_default();
            warn!("Upload job {} failed: {}", job_id, message);
            JOB_HISTORY.record_failed(job_id, JOB_TYPE, filename, started_at, message, Some(result));
        }

        // Failed uploads are acked too: replaying them is an operator decision
        if let Err(e) = msg.ack().await {
            error!("Failed to ack upload job {}: {:?}", job_id, e);
        }

        Ok(())
    }

    /// Run the upload and publish a `processing` update per stage entered
    async fn run_reporting_stages(&self, job_id: Uuid, request: &UploadJobRequest) -> UploadResult {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let upload = request.to_upload();
        let sync = &self.sync;

        let run = async move {
            let result = sync.run_with_progress(&upload, Some(&tx)).await;
            drop(tx);
            result
        };

        let forward = async {
            while let Some(stage) = rx.recv().await {
                if stage.is_terminal() {
                    continue;
                }
                if let Err(e) = self.publish_status(job_id, UploadJobStatus::Processing { stage }).await {
                    warn!("Failed to publish progress for upload job {}: {}", job_id, e);
                }
            }
        };

        let (result, ()) = tokio::join!(run, forward);
        result
    }
}

fn status_subject(job_id: Uuid) -> String {
    format!("{}.{}", STATUS_PREFIX, job_id)
}

fn final_status(result: &UploadResult) -> UploadJobStatus {
    if result.success {
        UploadJobStatus::Completed { result: result.clone() }
    } else {
        UploadJobStatus::Failed {
            error: result.message.clone().unwrap_or_else(|| "Upload failed".to_string()),
            result: Some(result.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadStage;

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "ROSTER_UPLOAD_JOBS");
        assert_eq!(SUBJECT, "roster.jobs.upload");
    }

    #[test]
    fn test_status_subject() {
        let id = Uuid::nil();
        assert_eq!(
            status_subject(id),
            "roster.job.upload.status.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_final_status_completed() {
        let mut result = UploadResult::started();
        result.stage = UploadStage::Done;
        assert!(matches!(final_status(&result), UploadJobStatus::Completed { .. }));
    }

    #[test]
    fn test_final_status_failed_carries_message_and_result() {
        let result = UploadResult::failed(UploadStage::Upserting, "roster upsert failed: gone".into());
        match final_status(&result) {
            UploadJobStatus::Failed { error, result } => {
                assert!(error.contains("roster upsert failed"));
                assert_eq!(result.unwrap().failed_stage, Some(UploadStage::Upserting));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }
}

//! Upload job history handler

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::error;
use uuid::Uuid;

use crate::services::job_history::{JobHistoryResponse, JobHistoryService, JOB_HISTORY};
use crate::types::{ErrorResponse, HistoryRequest, Request, SuccessResponse};

fn query(history: &JobHistoryService, request: &HistoryRequest) -> JobHistoryResponse {
    match &request.status {
        Some(status) => history.get_by_status(status, request.limit),
        None => history.get_recent(request.limit),
    }
}

/// Handle roster.jobs.history requests
pub async fn handle_job_history(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<HistoryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse job history request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let success = SuccessResponse::new(request.id, query(&JOB_HISTORY, &request.payload));
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}

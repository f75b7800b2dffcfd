//! Roster upload handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::job_history::JOB_HISTORY;
use crate::services::sync::RosterSync;
use crate::services::upload_processor::UploadProcessor;
use crate::types::{
    ErrorResponse, Request, RetryLedgerRequest, SuccessResponse, UploadJobRequest, UploadRequest,
    UploadResult,
};

/// Success envelope for a finished upload, error envelope (with the
/// failed stage and affected roster ids as details) otherwise
pub fn result_envelope(request_id: Uuid, result: UploadResult) -> Result<Vec<u8>> {
    if result.success {
        return Ok(serde_json::to_vec(&SuccessResponse::new(request_id, result))?);
    }

    let code = result.error_code.clone().unwrap_or_else(|| "UPLOAD_FAILED".to_string());
    let message = result.message.clone().unwrap_or_else(|| "Upload failed".to_string());
    let details = serde_json::json!({
        "failedStage": result.failed_stage,
        "affectedRosterIds": result.affected_roster_ids,
        "result": result,
    });
    let error = ErrorResponse::new(request_id, code, message).with_details(details);
    Ok(serde_json::to_vec(&error)?)
}

fn record_history(job_id: Uuid, job_type: &str, started_at: chrono::DateTime<Utc>, result: &UploadResult) {
    if result.success {
        JOB_HISTORY.record_completed(job_id, job_type, None, started_at, result.clone());
    } else {
        let message = result.message.clone().unwrap_or_default();
        JOB_HISTORY.record_failed(job_id, job_type, None, started_at, message, Some(result.clone()));
    }
}

/// Handle roster.upload.run: run the upload inline and reply with the result
pub async fn handle_upload_run(client: Client, mut subscriber: Subscriber, sync: Arc<RosterSync>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<UploadRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse upload request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        debug!("Upload request {} ({} bytes)", request.id, request.payload.csv_content.len());
        let started_at = Utc::now();
        let result = sync.run(&request.payload).await;
        record_history(request.id, "upload.run", started_at, &result);

        let _ = client.publish(reply, result_envelope(request.id, result)?.into()).await;
    }

    Ok(())
}

/// Handle roster.upload.submit: enqueue the upload as a JetStream job
pub async fn handle_upload_submit(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<UploadProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<UploadJobRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse upload submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match processor.submit_job(request.payload).await {
            Ok(response) => {
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to submit upload job: {}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle roster.upload.retry_ledger: replay the ledger step for the given ids
pub async fn handle_retry_ledger(client: Client, mut subscriber: Subscriber, sync: Arc<RosterSync>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<RetryLedgerRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse ledger retry request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if request.payload.roster_ids.is_empty() {
            let error = ErrorResponse::new(request.id, "INVALID_REQUEST", "rosterIds must not be empty");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        warn!("Replaying session ledger for {} roster id(s)", request.payload.roster_ids.len());
        let started_at = Utc::now();
        let result = sync.retry_ledger(&request.payload).await;
        record_history(request.id, "retryLedger", started_at, &result);

        let _ = client.publish(reply, result_envelope(request.id, result)?.into()).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadStage;

    #[test]
    fn test_success_envelope_carries_result() {
        let mut result = UploadResult::started();
        result.stage = UploadStage::Done;
        result.accepted_rows = 4;

        let bytes = result_envelope(Uuid::nil(), result).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["payload"]["acceptedRows"], 4);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_ledger_failure_envelope_lists_affected_ids() {
        let id = Uuid::new_v4();
        let mut result = UploadResult::started();
        result.mark_failed(UploadStage::ReplacingLedger, Some("LEDGER_PARTIAL"), "insert failed".into());
        result.affected_roster_ids = vec![id];

        let bytes = result_envelope(Uuid::nil(), result).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "LEDGER_PARTIAL");
        assert_eq!(json["error"]["details"]["failedStage"], "replacingLedger");
        assert_eq!(json["error"]["details"]["affectedRosterIds"][0], id.to_string());
    }

    #[test]
    fn test_failure_without_code_uses_generic_code() {
        let result = UploadResult::failed(UploadStage::Parsing, "bad".into());
        let bytes = result_envelope(Uuid::nil(), result).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "UPLOAD_FAILED");
    }
}

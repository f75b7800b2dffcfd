//! Upload request/result types and the JetStream job envelope
//!
//! The same `UploadResult` is returned by the synchronous `roster.upload.run`
//! subject, carried inside `completed`/`failed` job status updates, and
//! printed by the `upload` CLI command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ImportIssue;

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Upload request / result
// ==========================================================================

/// Upload entry point payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Raw tabular text (header row + data rows)
    pub csv_content: String,
    /// Roster id or external id used when a row has no usable email
    #[serde(default)]
    pub target_id: Option<String>,
}

/// Request to replay the ledger step for a subset of roster ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryLedgerRequest {
    pub csv_content: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub roster_ids: Vec<Uuid>,
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadStage {
    Parsing,
    Reconciling,
    Upserting,
    Rereading,
    ReplacingLedger,
    Done,
    Failed,
}

impl UploadStage {
    /// Successor on the happy path
    pub fn next(self) -> Option<UploadStage> {
        match self {
            UploadStage::Parsing => Some(UploadStage::Reconciling),
            UploadStage::Reconciling => Some(UploadStage::Upserting),
            UploadStage::Upserting => Some(UploadStage::Rereading),
            UploadStage::Rereading => Some(UploadStage::ReplacingLedger),
            UploadStage::ReplacingLedger => Some(UploadStage::Done),
            UploadStage::Done | UploadStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStage::Done | UploadStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStage::Parsing => "parsing",
            UploadStage::Reconciling => "reconciling",
            UploadStage::Upserting => "upserting",
            UploadStage::Rereading => "rereading",
            UploadStage::ReplacingLedger => "replacing_ledger",
            UploadStage::Done => "done",
            UploadStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single outcome of one upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    /// Terminal stage reached (`done` or `failed`)
    pub stage: UploadStage,
    pub failed_stage: Option<UploadStage>,
    /// Human-readable cause on failure, or a note such as "nothing to import"
    pub message: Option<String>,
    /// Stable failure code (`LEDGER_PARTIAL`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Data rows in the upload
    pub total_rows: u32,
    /// Rows that made it into the roster batch
    pub accepted_rows: u32,
    pub created_count: u32,
    pub updated_count: u32,
    pub duplicate_count: u32,
    /// Rows dropped because no email could be resolved
    pub dropped_count: u32,
    pub sessions_inserted: u32,
    /// Roster ids whose session ledger was (or was being) replaced
    pub affected_roster_ids: Vec<Uuid>,
    pub issues: Vec<ImportIssue>,
    pub duration_ms: u64,
}

impl UploadResult {
    /// Fresh, still-successful result at the start of a pipeline
    pub fn started() -> Self {
        Self {
            success: true,
            stage: UploadStage::Parsing,
            failed_stage: None,
            message: None,
            error_code: None,
            total_rows: 0,
            accepted_rows: 0,
            created_count: 0,
            updated_count: 0,
            duplicate_count: 0,
            dropped_count: 0,
            sessions_inserted: 0,
            affected_roster_ids: Vec::new(),
            issues: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn failed(stage: UploadStage, message: String) -> Self {
        let mut result = Self::started();
        result.mark_failed(stage, None, message);
        result
    }

    pub fn mark_failed(&mut self, stage: UploadStage, code: Option<&str>, message: String) {
        self.success = false;
        self.stage = UploadStage::Failed;
        self.failed_stage = Some(stage);
        self.error_code = code.map(str::to_string);
        self.message = Some(message);
    }
}

// ==========================================================================
// JetStream upload jobs
// ==========================================================================

/// Upload job submitted through `roster.upload.submit`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobRequest {
    pub filename: String,
    pub csv_content: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

impl UploadJobRequest {
    pub fn to_upload(&self) -> UploadRequest {
        UploadRequest {
            csv_content: self.csv_content.clone(),
            target_id: self.target_id.clone(),
        }
    }
}

/// Job as stored in the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedUploadJob {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: UploadJobRequest,
}

impl QueuedUploadJob {
    pub fn new(request: UploadJobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            request,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobSubmitResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Status of an upload job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadJobStatus {
    #[serde(rename_all = "camelCase")]
    Queued { position: u32 },
    #[serde(rename_all = "camelCase")]
    Processing { stage: UploadStage },
    #[serde(rename_all = "camelCase")]
    Completed { result: UploadResult },
    #[serde(rename_all = "camelCase")]
    Failed { error: String, result: Option<UploadResult> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: UploadJobStatus,
}

impl UploadJobStatusUpdate {
    pub fn new(job_id: Uuid, status: UploadJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

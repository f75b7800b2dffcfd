//! Upload job history
//!
//! Keeps the most recent finished upload jobs in memory, mirrored to a JSON
//! file in the configured logs directory so history survives worker
//! restarts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_LOGS_DIR;
use crate::types::UploadResult;

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE_NAME: &str = "job-history.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub id: Uuid,
    pub job_type: String,
    pub filename: Option<String>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryResponse {
    pub jobs: Vec<JobHistoryEntry>,
    pub total: usize,
}

/// In-memory deque, newest first, with an optional backing file
pub struct JobHistoryService {
    history: RwLock<VecDeque<JobHistoryEntry>>,
    file: Option<PathBuf>,
}

impl JobHistoryService {
    /// Load whatever `file` already holds
    pub fn open(file: PathBuf) -> Self {
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = load_from_disk(&file) {
            deque.extend(loaded.into_iter().take(MAX_HISTORY_SIZE));
            info!("Loaded {} job history entries from disk", deque.len());
        }
        Self {
            history: RwLock::new(deque),
            file: Some(file),
        }
    }

    /// History that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE)),
            file: None,
        }
    }

    pub fn record_completed(
        &self,
        id: Uuid,
        job_type: &str,
        filename: Option<String>,
        started_at: DateTime<Utc>,
        result: UploadResult,
    ) {
        self.add_entry(entry(id, job_type, filename, "completed", started_at, None, Some(result)));
    }

    pub fn record_failed(
        &self,
        id: Uuid,
        job_type: &str,
        filename: Option<String>,
        started_at: DateTime<Utc>,
        error: String,
        result: Option<UploadResult>,
    ) {
        self.add_entry(entry(id, job_type, filename, "failed", started_at, Some(error), result));
    }

    fn add_entry(&self, entry: JobHistoryEntry) {
        let mut history = self.history.write();

        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }
        history.push_front(entry);

        if let Some(file) = &self.file {
            save_to_disk(file, &history);
        }
    }

    pub fn get_recent(&self, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        JobHistoryResponse {
            jobs: history.iter().take(limit).cloned().collect(),
            total: history.len(),
        }
    }

    pub fn get_by_status(&self, status: &str, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .filter(|j| j.status == status)
            .take(limit)
            .cloned()
            .collect();
        let total = jobs.len();

        JobHistoryResponse { jobs, total }
    }
}

fn entry(
    id: Uuid,
    job_type: &str,
    filename: Option<String>,
    status: &str,
    started_at: DateTime<Utc>,
    error: Option<String>,
    result: Option<UploadResult>,
) -> JobHistoryEntry {
    let completed_at = Utc::now();
    JobHistoryEntry {
        id,
        job_type: job_type.to_string(),
        filename,
        status: status.to_string(),
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        error,
        result,
    }
}

fn load_from_disk(path: &Path) -> Option<Vec<JobHistoryEntry>> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Vec<JobHistoryEntry>>(&content) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Failed to parse job history file: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read job history file: {}", e);
            None
        }
    }
}

fn save_to_disk(path: &Path, history: &VecDeque<JobHistoryEntry>) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create job history directory: {}", e);
            return;
        }
    }
    let entries: Vec<&JobHistoryEntry> = history.iter().collect();
    match serde_json::to_string_pretty(&entries) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to write job history file: {}", e);
            }
        }
        Err(e) => warn!("Failed to serialize job history: {}", e),
    }
}

static HISTORY_DIR: OnceCell<PathBuf> = OnceCell::new();

/// Directory of the global history file. Must run before `JOB_HISTORY` is
/// first touched; later calls are ignored.
pub fn init(logs_dir: impl AsRef<Path>) {
    if HISTORY_DIR.set(logs_dir.as_ref().to_path_buf()).is_err() {
        warn!("Job history directory already set; ignoring {}", logs_dir.as_ref().display());
    }
}

pub fn history_file(logs_dir: &Path) -> PathBuf {
    logs_dir.join(HISTORY_FILE_NAME)
}

// Global instance, file in the logs directory (same place as the log files)
pub static JOB_HISTORY: Lazy<JobHistoryService> = Lazy::new(|| {
    let dir = HISTORY_DIR
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOGS_DIR));
    JobHistoryService::open(history_file(&dir))
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadStage;

    fn done() -> UploadResult {
        let mut result = UploadResult::started();
        result.stage = UploadStage::Done;
        result.accepted_rows = 3;
        result
    }

    #[test]
    fn test_record_completed_job() {
        let service = JobHistoryService::in_memory();
        let id = Uuid::new_v4();
        let started_at = Utc::now() - chrono::Duration::seconds(5);

        service.record_completed(id, "upload", Some("roster.csv".into()), started_at, done());

        let history = service.get_recent(10);
        assert_eq!(history.jobs.len(), 1);
        assert_eq!(history.jobs[0].id, id);
        assert_eq!(history.jobs[0].status, "completed");
        assert!(history.jobs[0].duration_ms >= 5000);
        assert_eq!(history.jobs[0].result.as_ref().map(|r| r.accepted_rows), Some(3));
    }

    #[test]
    fn test_record_failed_job() {
        let service = JobHistoryService::in_memory();
        let failed = UploadResult::failed(UploadStage::ReplacingLedger, "timeout".into());

        service.record_failed(Uuid::new_v4(), "upload", None, Utc::now(), "timeout".into(), Some(failed));

        let history = service.get_recent(10);
        assert_eq!(history.jobs[0].status, "failed");
        assert_eq!(history.jobs[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_history_limit_keeps_newest() {
        let service = JobHistoryService::in_memory();
        let mut last = Uuid::nil();
        for _ in 0..150 {
            last = Uuid::new_v4();
            service.record_completed(last, "upload", None, Utc::now(), done());
        }

        let history = service.get_recent(200);
        assert_eq!(history.jobs.len(), MAX_HISTORY_SIZE);
        assert_eq!(history.jobs[0].id, last);
    }

    #[test]
    fn test_history_file_lives_in_logs_dir() {
        assert_eq!(
            history_file(Path::new("/var/log/roster")),
            PathBuf::from("/var/log/roster/job-history.json")
        );
    }

    #[test]
    fn test_get_by_status() {
        let service = JobHistoryService::in_memory();
        service.record_completed(Uuid::new_v4(), "upload", None, Utc::now(), done());
        service.record_failed(Uuid::new_v4(), "upload", None, Utc::now(), "x".into(), None);
        service.record_completed(Uuid::new_v4(), "retryLedger", None, Utc::now(), done());

        assert_eq!(service.get_by_status("completed", 10).jobs.len(), 2);
        assert_eq!(service.get_by_status("failed", 10).total, 1);
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("roster-history-{}", Uuid::new_v4()));
        let file = history_file(&dir);
        let id = Uuid::new_v4();

        JobHistoryService::open(file.clone()).record_completed(id, "upload", None, Utc::now(), done());
        let reopened = JobHistoryService::open(file);

        assert_eq!(reopened.get_recent(10).jobs[0].id, id);
        let _ = std::fs::remove_dir_all(dir);
    }
}

//! Upload orchestrator
//!
//! Runs `Parsing → Reconciling → Upserting → Rereading → ReplacingLedger →
//! Done` for one upload and folds the outcome into a single
//! [`UploadResult`]. Any fatal error moves the upload to `Failed`; committed
//! roster upserts are not undone.
//!
//! One `RosterSync` is shared by every entry point. Its write lock keeps
//! uploads from overlapping, which the read-then-mint id allocation relies on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::allocator::IdAllocator;
use super::error::SyncError;
use super::identity::activated_emails;
use super::ledger::{plan_ledger, replace_ledger};
use super::parser::{parse_upload, ParsedUpload};
use super::reconciler::reconcile;
use crate::config::Config;
use crate::services::stores::{
    IdentityStore, PgIdentityStore, PgRosterStore, PgSessionStore, RosterStore, SessionStore,
};
use crate::types::{ImportIssue, RetryLedgerRequest, UploadRequest, UploadResult, UploadStage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub id_prefix: String,
    pub id_floor: u64,
    pub session_batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            id_prefix: "GC".to_string(),
            id_floor: 8000,
            session_batch_size: 200,
        }
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            id_prefix: config.roster_id_prefix.clone(),
            id_floor: config.roster_id_floor,
            session_batch_size: config.session_batch_size,
        }
    }
}

/// Stage bookkeeping plus optional progress reporting
struct StageTracker<'a> {
    upload_id: Uuid,
    current: UploadStage,
    progress: Option<&'a UnboundedSender<UploadStage>>,
}

impl<'a> StageTracker<'a> {
    fn new(upload_id: Uuid, progress: Option<&'a UnboundedSender<UploadStage>>) -> Self {
        let tracker = Self {
            upload_id,
            current: UploadStage::Parsing,
            progress,
        };
        tracker.report();
        tracker
    }

    fn enter(&mut self, stage: UploadStage) {
        self.current = stage;
        info!(upload_id = %self.upload_id, stage = %stage, "Upload stage");
        self.report();
    }

    /// Move to the next happy-path stage
    fn advance(&mut self) {
        if let Some(next) = self.current.next() {
            self.enter(next);
        }
    }

    fn report(&self) {
        if let Some(tx) = self.progress {
            // Receiver may be gone; progress is best effort
            let _ = tx.send(self.current);
        }
    }
}

pub struct RosterSync {
    roster: Arc<dyn RosterStore>,
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityStore>,
    settings: SyncSettings,
    write_lock: Mutex<()>,
}

impl RosterSync {
    pub fn new(
        roster: Arc<dyn RosterStore>,
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            roster,
            sessions,
            identities,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// All three stores backed by the same pool
    pub fn postgres(pool: PgPool, settings: SyncSettings) -> Self {
        Self::new(
            Arc::new(PgRosterStore::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgIdentityStore::new(pool)),
            settings,
        )
    }

    pub async fn run(&self, request: &UploadRequest) -> UploadResult {
        self.run_with_progress(request, None).await
    }

    /// Run one upload, sending every stage entered to `progress`
    pub async fn run_with_progress(
        &self,
        request: &UploadRequest,
        progress: Option<&UnboundedSender<UploadStage>>,
    ) -> UploadResult {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();
        let upload_id = Uuid::new_v4();
        let mut tracker = StageTracker::new(upload_id, progress);
        let mut result = UploadResult::started();

        info!(%upload_id, bytes = request.csv_content.len(), target = ?request.target_id, "Upload started");

        if let Err(e) = self.execute(request, &mut tracker, &mut result).await {
            fail(&mut tracker, &mut result, &e);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %upload_id,
            success = result.success,
            accepted = result.accepted_rows,
            created = result.created_count,
            updated = result.updated_count,
            sessions = result.sessions_inserted,
            duration_ms = result.duration_ms,
            "Upload finished"
        );
        result
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        tracker: &mut StageTracker<'_>,
        result: &mut UploadResult,
    ) -> Result<(), SyncError> {
        // Parsing
        let snapshot = self.roster.fetch_all().await.map_err(SyncError::Snapshot)?;
        let parsed = parse_upload(&request.csv_content, &snapshot, request.target_id.as_deref())?;
        record_parse(result, &parsed);

        // Reconciling
        tracker.advance();
        let activated = activated_emails(self.identities.as_ref()).await?;
        let mut allocator =
            IdAllocator::from_snapshot(&self.settings.id_prefix, self.settings.id_floor, &snapshot);
        let reconciliation = reconcile(&parsed.rows, &snapshot, &activated, &mut allocator);

        result.accepted_rows = reconciliation.batch.len() as u32;
        result.created_count = reconciliation.created;
        result.updated_count = reconciliation.updated;
        result.duplicate_count = reconciliation.duplicates;
        result.issues.extend(reconciliation.issues.iter().cloned());

        if reconciliation.is_empty() {
            result.message = Some("Nothing to import".to_string());
            finish(tracker, result);
            return Ok(());
        }

        // Upserting
        tracker.advance();
        self.roster
            .upsert_by_email(&reconciliation.batch)
            .await
            .map_err(SyncError::Upsert)?;

        // Rereading: new rows only get their id once the upsert is committed
        tracker.advance();
        let ids: HashMap<String, Uuid> = self
            .roster
            .fetch_all()
            .await
            .map_err(SyncError::Reread)?
            .into_iter()
            .map(|r| (r.email, r.id))
            .collect();

        // ReplacingLedger
        tracker.advance();
        let plan = plan_ledger(&parsed.rows, &ids, None);
        result.issues.extend(plan.issues.iter().cloned());
        result.affected_roster_ids = plan.affected.clone();
        let report = replace_ledger(self.sessions.as_ref(), &plan, self.settings.session_batch_size).await?;
        result.sessions_inserted = report.inserted as u32;

        finish(tracker, result);
        Ok(())
    }

    /// Replay only the ledger step of `request`, restricted to `roster_ids`.
    ///
    /// Used after a partial ledger failure. Roster rows are not touched; ids
    /// are resolved from the current roster.
    pub async fn retry_ledger(&self, request: &RetryLedgerRequest) -> UploadResult {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();
        let upload_id = Uuid::new_v4();
        let mut tracker = StageTracker::new(upload_id, None);
        let mut result = UploadResult::started();

        info!(%upload_id, roster_ids = request.roster_ids.len(), "Ledger retry started");

        if let Err(e) = self.execute_retry(request, &mut tracker, &mut result).await {
            fail(&mut tracker, &mut result, &e);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn execute_retry(
        &self,
        request: &RetryLedgerRequest,
        tracker: &mut StageTracker<'_>,
        result: &mut UploadResult,
    ) -> Result<(), SyncError> {
        let snapshot = self.roster.fetch_all().await.map_err(SyncError::Snapshot)?;
        let parsed = parse_upload(&request.csv_content, &snapshot, request.target_id.as_deref())?;
        record_parse(result, &parsed);

        let ids: HashMap<String, Uuid> = snapshot.into_iter().map(|r| (r.email, r.id)).collect();
        let only: HashSet<Uuid> = request.roster_ids.iter().copied().collect();

        tracker.enter(UploadStage::ReplacingLedger);
        let plan = plan_ledger(&parsed.rows, &ids, Some(&only));
        result.issues.extend(plan.issues.iter().cloned());

        for id in request.roster_ids.iter().filter(|id| !plan.affected.contains(id)) {
            result.issues.push(ImportIssue::warning(
                0,
                "roster_ids",
                "No session log for this roster id in the upload; left untouched",
                Some(id.to_string().as_str()),
            ));
        }

        result.affected_roster_ids = plan.affected.clone();
        let report = replace_ledger(self.sessions.as_ref(), &plan, self.settings.session_batch_size).await?;
        result.sessions_inserted = report.inserted as u32;
        result.message = Some(format!("Session ledger replayed for {} roster id(s)", plan.affected.len()));

        finish(tracker, result);
        Ok(())
    }
}

fn record_parse(result: &mut UploadResult, parsed: &ParsedUpload) {
    result.total_rows = parsed.total_rows;
    result.dropped_count = parsed.dropped_rows;
    result.issues.extend(parsed.issues.iter().cloned());
}

fn finish(tracker: &mut StageTracker<'_>, result: &mut UploadResult) {
    tracker.enter(UploadStage::Done);
    result.stage = UploadStage::Done;
}

fn fail(tracker: &mut StageTracker<'_>, result: &mut UploadResult, err: &SyncError) {
    let stage = tracker.current;
    match err {
        SyncError::Ledger { .. } => error!(
            upload_id = %tracker.upload_id,
            stage = %stage,
            affected = ?err.affected_roster_ids(),
            "Session ledger left partially replaced: {}", err
        ),
        _ => warn!(upload_id = %tracker.upload_id, stage = %stage, "Upload failed: {}", err),
    }

    result.mark_failed(stage, Some(err.code()), err.to_string());
    if !err.affected_roster_ids().is_empty() {
        result.affected_roster_ids = err.affected_roster_ids().to_vec();
    }
    tracker.enter(UploadStage::Failed);
}

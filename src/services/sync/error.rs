//! Fatal pipeline errors

use thiserror::Error;
use uuid::Uuid;

use crate::types::UploadStage;

/// Which half of the ledger replacement failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPhase {
    Delete,
    Insert,
}

impl std::fmt::Display for LedgerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerPhase::Delete => f.write_str("delete"),
            LedgerPhase::Insert => f.write_str("insert"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not read roster snapshot: {0}")]
    Snapshot(#[source] anyhow::Error),

    #[error("upload is not readable as a table: {0}")]
    Parse(#[from] csv::Error),

    #[error("identity store unavailable, claim status cannot be determined: {0}")]
    Identity(#[source] anyhow::Error),

    #[error("roster upsert failed: {0}")]
    Upsert(#[source] anyhow::Error),

    #[error("could not re-read roster ids after upsert: {0}")]
    Reread(#[source] anyhow::Error),

    #[error(
        "session ledger {phase} failed after {completed_batches} batch(es); {} roster id(s) may be partially replaced: {source}",
        .affected.len()
    )]
    Ledger {
        phase: LedgerPhase,
        completed_batches: usize,
        affected: Vec<Uuid>,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    /// Stage in which the error surfaced
    pub fn stage(&self) -> UploadStage {
        match self {
            SyncError::Snapshot(_) | SyncError::Parse(_) => UploadStage::Parsing,
            SyncError::Identity(_) => UploadStage::Reconciling,
            SyncError::Upsert(_) => UploadStage::Upserting,
            SyncError::Reread(_) => UploadStage::Rereading,
            SyncError::Ledger { .. } => UploadStage::ReplacingLedger,
        }
    }

    /// Stable code used in NATS error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Snapshot(_) => "ROSTER_READ_FAILED",
            SyncError::Parse(_) => "INVALID_UPLOAD",
            SyncError::Identity(_) => "IDENTITY_STORE_FAILED",
            SyncError::Upsert(_) => "ROSTER_UPSERT_FAILED",
            SyncError::Reread(_) => "ROSTER_REREAD_FAILED",
            SyncError::Ledger { .. } => "LEDGER_PARTIAL",
        }
    }

    pub fn affected_roster_ids(&self) -> &[Uuid] {
        match self {
            SyncError::Ledger { affected, .. } => affected,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_message_names_phase_and_count() {
        let err = SyncError::Ledger {
            phase: LedgerPhase::Insert,
            completed_batches: 2,
            affected: vec![Uuid::nil(), Uuid::nil()],
            source: anyhow::anyhow!("timeout"),
        };
        let msg = err.to_string();
        assert!(msg.contains("insert"));
        assert!(msg.contains("2 batch(es)"));
        assert!(msg.contains("2 roster id(s)"));
        assert!(msg.contains("timeout"));
        assert_eq!(err.stage(), UploadStage::ReplacingLedger);
        assert_eq!(err.affected_roster_ids().len(), 2);
    }

    #[test]
    fn test_identity_error_maps_to_reconciling() {
        let err = SyncError::Identity(anyhow::anyhow!("refused"));
        assert_eq!(err.stage(), UploadStage::Reconciling);
        assert_eq!(err.code(), "IDENTITY_STORE_FAILED");
        assert!(err.affected_roster_ids().is_empty());
    }
}

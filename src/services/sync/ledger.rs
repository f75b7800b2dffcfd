//! Session ledger replacement
//!
//! Every roster id touched by a row carrying a session-log loses its whole
//! session history, then receives the uploaded entries. Deletes and inserts
//! run in fixed-size batches and every delete completes before the first
//! insert is issued. Nothing is rolled back on failure; the error carries the
//! affected ids so the same replacement can be replayed for them.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{LedgerPhase, SyncError};
use super::parser::ParsedRow;
use crate::services::stores::SessionStore;
use crate::types::{ImportIssue, NewSession};

#[derive(Debug, Default, Clone)]
pub struct LedgerPlan {
    /// Roster ids whose history is replaced, in first-seen order
    pub affected: Vec<Uuid>,
    pub inserts: Vec<NewSession>,
    pub issues: Vec<ImportIssue>,
}

impl LedgerPlan {
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReport {
    pub delete_batches: usize,
    pub insert_batches: usize,
    pub inserted: usize,
}

/// Collect affected ids and session rows from parsed rows.
///
/// `ids` maps normalized email to the persisted roster id (re-read after the
/// upsert). `only` restricts the plan to a subset of roster ids.
pub fn plan_ledger(
    rows: &[ParsedRow],
    ids: &HashMap<String, Uuid>,
    only: Option<&HashSet<Uuid>>,
) -> LedgerPlan {
    let mut plan = LedgerPlan::default();
    let mut per_roster: HashMap<Uuid, i32> = HashMap::new();

    for row in rows {
        let Some(entries) = row.session_log.as_ref() else {
            continue;
        };
        let Some(&roster_id) = ids.get(&row.email) else {
            plan.issues.push(ImportIssue::warning(
                row.row_number,
                "session_log",
                "No roster id for this email after upsert; session log skipped",
                Some(row.email.as_str()),
            ));
            continue;
        };
        if only.is_some_and(|subset| !subset.contains(&roster_id)) {
            continue;
        }

        let ordinal = per_roster.entry(roster_id).or_insert_with(|| {
            plan.affected.push(roster_id);
            0
        });

        for entry in entries {
            *ordinal += 1;
            plan.inserts.push(NewSession {
                roster_id,
                session_date: entry.date,
                location: entry.location.clone(),
                notes: entry.notes.clone(),
                session_number: entry.session_number.or(Some(*ordinal)),
                lesson_number: entry.lesson_number,
            });
        }
    }

    plan
}

/// Delete-then-insert for every id in the plan
pub async fn replace_ledger(
    store: &dyn SessionStore,
    plan: &LedgerPlan,
    batch_size: usize,
) -> Result<LedgerReport, SyncError> {
    let batch_size = batch_size.max(1);
    let mut report = LedgerReport::default();

    for chunk in plan.affected.chunks(batch_size) {
        if let Err(e) = store.delete_by_roster_ids(chunk).await {
            warn!(completed = report.delete_batches, affected = plan.affected.len(), "Session delete batch failed");
            return Err(SyncError::Ledger {
                phase: LedgerPhase::Delete,
                completed_batches: report.delete_batches,
                affected: plan.affected.clone(),
                source: e,
            });
        }
        report.delete_batches += 1;
    }

    for chunk in plan.inserts.chunks(batch_size) {
        if let Err(e) = store.insert_many(chunk).await {
            warn!(completed = report.insert_batches, affected = plan.affected.len(), "Session insert batch failed");
            return Err(SyncError::Ledger {
                phase: LedgerPhase::Insert,
                completed_batches: report.insert_batches,
                affected: plan.affected.clone(),
                source: e,
            });
        }
        report.insert_batches += 1;
        report.inserted += chunk.len();
    }

    debug!(
        affected = plan.affected.len(),
        inserted = report.inserted,
        delete_batches = report.delete_batches,
        insert_batches = report.insert_batches,
        "Session ledger replaced"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stores::MemorySessionStore;
    use crate::types::{Metadata, RosterFields, SessionEntry};

    fn row(email: &str, log: Option<Vec<SessionEntry>>) -> ParsedRow {
        ParsedRow {
            row_number: 2,
            email: email.to_string(),
            external_id: None,
            claimed: None,
            fields: RosterFields::default(),
            metadata: Metadata::new(),
            session_log: log,
        }
    }

    fn entry(location: &str) -> SessionEntry {
        SessionEntry {
            location: Some(location.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_skips_rows_without_log() {
        let a = Uuid::new_v4();
        let ids = HashMap::from([("a@x.com".to_string(), a)]);
        let plan = plan_ledger(&[row("a@x.com", None)], &ids, None);
        assert!(plan.is_empty());
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn test_plan_numbers_sessions_per_roster() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ids = HashMap::from([("a@x.com".to_string(), a), ("b@x.com".to_string(), b)]);
        let mut numbered = entry("Cage");
        numbered.session_number = Some(10);
        let rows = vec![
            row("a@x.com", Some(vec![entry("Gym"), numbered])),
            row("b@x.com", Some(vec![entry("Field")])),
            row("a@x.com", Some(vec![entry("Pool")])),
        ];

        let plan = plan_ledger(&rows, &ids, None);
        assert_eq!(plan.affected, vec![a, b]);
        let numbers: Vec<Option<i32>> = plan.inserts.iter().map(|s| s.session_number).collect();
        assert_eq!(numbers, vec![Some(1), Some(10), Some(1), Some(3)]);
    }

    #[test]
    fn test_empty_log_still_marks_roster_affected() {
        let a = Uuid::new_v4();
        let ids = HashMap::from([("a@x.com".to_string(), a)]);
        let plan = plan_ledger(&[row("a@x.com", Some(vec![]))], &ids, None);
        assert_eq!(plan.affected, vec![a]);
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn test_plan_reports_unresolved_email() {
        let plan = plan_ledger(&[row("ghost@x.com", Some(vec![entry("Gym")]))], &HashMap::new(), None);
        assert!(plan.is_empty());
        assert_eq!(plan.issues.len(), 1);
    }

    #[test]
    fn test_plan_restricted_to_subset() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ids = HashMap::from([("a@x.com".to_string(), a), ("b@x.com".to_string(), b)]);
        let rows = vec![
            row("a@x.com", Some(vec![entry("Gym")])),
            row("b@x.com", Some(vec![entry("Field")])),
        ];
        let only = HashSet::from([b]);
        let plan = plan_ledger(&rows, &ids, Some(&only));
        assert_eq!(plan.affected, vec![b]);
        assert_eq!(plan.inserts.len(), 1);
    }

    #[tokio::test]
    async fn replaces_only_affected_history() {
        let store = MemorySessionStore::new();
        let r1 = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.seed(r1, 3);
        store.seed(other, 2);
        let before_other = store.sessions_for(other);

        let ids = HashMap::from([("r1@x.com".to_string(), r1)]);
        let plan = plan_ledger(&[row("r1@x.com", Some(vec![entry("A"), entry("B")]))], &ids, None);
        let report = replace_ledger(&store, &plan, 200).await.unwrap();

        assert_eq!(report.inserted, 2);
        let locations: Vec<String> = store.sessions_for(r1).into_iter().filter_map(|s| s.location).collect();
        assert_eq!(locations, vec!["A", "B"]);
        assert_eq!(store.sessions_for(other), before_other);
    }

    #[tokio::test]
    async fn all_deletes_precede_inserts_in_batches() {
        let store = MemorySessionStore::new();
        let mut ids = HashMap::new();
        let mut rows = Vec::new();
        for i in 0..5 {
            let email = format!("p{}@x.com", i);
            ids.insert(email.clone(), Uuid::new_v4());
            rows.push(row(&email, Some(vec![entry("X")])));
        }
        let plan = plan_ledger(&rows, &ids, None);
        let report = replace_ledger(&store, &plan, 2).await.unwrap();

        assert_eq!(report.delete_batches, 3);
        assert_eq!(report.insert_batches, 3);
        assert_eq!(
            store.calls(),
            vec!["delete:2", "delete:2", "delete:1", "insert:2", "insert:2", "insert:1"]
        );
    }

    #[tokio::test]
    async fn delete_failure_reports_phase_and_affected() {
        let store = MemorySessionStore::new();
        store.fail_delete_after(1);
        let ids: HashMap<String, Uuid> = (0..3).map(|i| (format!("p{}@x.com", i), Uuid::new_v4())).collect();
        let rows: Vec<ParsedRow> = (0..3).map(|i| row(&format!("p{}@x.com", i), Some(vec![entry("X")]))).collect();
        let plan = plan_ledger(&rows, &ids, None);

        let err = replace_ledger(&store, &plan, 1).await.unwrap_err();
        match err {
            SyncError::Ledger { phase, completed_batches, affected, .. } => {
                assert_eq!(phase, LedgerPhase::Delete);
                assert_eq!(completed_batches, 1);
                assert_eq!(affected.len(), 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.calls().iter().all(|c| c.starts_with("delete")));
    }

    #[tokio::test]
    async fn insert_failure_leaves_partial_ledger() {
        let store = MemorySessionStore::new();
        let r1 = Uuid::new_v4();
        store.seed(r1, 3);
        store.fail_insert_after(1);
        let ids = HashMap::from([("r1@x.com".to_string(), r1)]);
        let plan = plan_ledger(&[row("r1@x.com", Some(vec![entry("A"), entry("B"), entry("C")]))], &ids, None);

        let err = replace_ledger(&store, &plan, 2).await.unwrap_err();
        assert!(matches!(err, SyncError::Ledger { phase: LedgerPhase::Insert, completed_batches: 1, .. }));
        assert_eq!(err.affected_roster_ids(), &[r1]);
        // Old history gone, first batch written
        assert_eq!(store.sessions_for(r1).len(), 2);
    }
}

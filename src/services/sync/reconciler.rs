//! Roster reconciliation
//!
//! Folds parsed rows into one duplicate-free upsert batch keyed by email.
//! External ids resolve in this order: the id already stored for the email,
//! an id supplied by the row (unless another email holds it), a freshly
//! minted one. Rows are visited in upload order so minting is deterministic.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::allocator::IdAllocator;
use super::parser::ParsedRow;
use crate::types::{ImportIssue, RosterRecord, RosterUpsert};

#[derive(Debug, Default)]
pub struct Reconciliation {
    pub batch: Vec<RosterUpsert>,
    pub created: u32,
    pub updated: u32,
    pub duplicates: u32,
    pub issues: Vec<ImportIssue>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

pub fn reconcile(
    rows: &[ParsedRow],
    snapshot: &[RosterRecord],
    activated: &HashSet<String>,
    allocator: &mut IdAllocator,
) -> Reconciliation {
    let existing: HashMap<&str, &RosterRecord> =
        snapshot.iter().map(|r| (r.email.as_str(), r)).collect();

    // external id (uppercased) → email holding it
    let mut holders: HashMap<String, String> = snapshot
        .iter()
        .filter(|r| !r.external_id.trim().is_empty())
        .map(|r| (r.external_id.trim().to_uppercase(), r.email.clone()))
        .collect();

    // Supplied ids of new rows are claimed before anything is minted
    let mut firsts = HashSet::new();
    for row in rows {
        if !firsts.insert(row.email.as_str()) || existing.contains_key(row.email.as_str()) {
            continue;
        }
        if let Some(id) = supplied_id(row) {
            if !holders.contains_key(&id.to_uppercase()) {
                allocator.reserve(id);
            }
        }
    }

    let mut out = Reconciliation::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for row in rows {
        if !seen.insert(row.email.as_str()) {
            out.duplicates += 1;
            out.issues.push(ImportIssue::info(
                row.row_number,
                "email",
                format!("Duplicate of an earlier row for {}; roster fields ignored", row.email),
            ));
            continue;
        }

        let stored = existing.get(row.email.as_str()).copied();

        let external_id = match stored.filter(|r| !r.external_id.trim().is_empty()) {
            Some(record) => record.external_id.clone(),
            None => match supplied_id(row) {
                Some(id) => match holders.get(&id.to_uppercase()) {
                    Some(holder) if holder != &row.email => {
                        let minted = allocator.mint();
                        out.issues.push(ImportIssue::warning(
                            row.row_number,
                            "external_id",
                            format!("Id already belongs to {}; assigned {}", holder, minted),
                            Some(id),
                        ));
                        minted
                    }
                    _ => id.to_string(),
                },
                None => allocator.mint(),
            },
        };
        holders.insert(external_id.to_uppercase(), row.email.clone());

        let claimed = row.claimed.unwrap_or(false)
            || activated.contains(&row.email)
            || stored.map(|r| r.claimed).unwrap_or(false);

        if stored.is_some() {
            out.updated += 1;
        } else {
            out.created += 1;
        }

        out.batch.push(RosterUpsert {
            email: row.email.clone(),
            external_id,
            claimed,
            metadata: row.metadata.clone(),
            fields: row.fields.clone(),
            is_new: stored.is_none(),
        });
    }

    debug!(
        batch = out.batch.len(),
        created = out.created,
        updated = out.updated,
        duplicates = out.duplicates,
        "Reconciled upload rows"
    );

    out
}

fn supplied_id(row: &ParsedRow) -> Option<&str> {
    row.external_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sync::allocator::parse_suffix;
    use crate::types::{Metadata, RosterFields};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(email: &str, external_id: &str, claimed: bool) -> RosterRecord {
        RosterRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            external_id: external_id.to_string(),
            claimed,
            metadata: Metadata::new(),
            session_count: 0,
            lesson_count: 0,
            name: None,
            guardian_name: None,
            guardian_email: None,
            guardian_phone: None,
            graduation_year: None,
            team: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn row(n: i32, email: &str) -> ParsedRow {
        ParsedRow {
            row_number: n,
            email: email.to_string(),
            external_id: None,
            claimed: None,
            fields: RosterFields::default(),
            metadata: Metadata::new(),
            session_log: None,
        }
    }

    fn named(n: i32, email: &str, name: &str) -> ParsedRow {
        let mut r = row(n, email);
        r.fields.name = Some(name.to_string());
        r
    }

    fn alloc(snapshot: &[RosterRecord]) -> IdAllocator {
        IdAllocator::from_snapshot("GC", 8000, snapshot)
    }

    #[test]
    fn test_duplicate_email_keeps_first_and_existing_id() {
        let snapshot = vec![record("a@x.com", "GC-8001", false)];
        let rows = vec![named(2, "a@x.com", "First"), named(3, "a@x.com", "Second")];

        let out = reconcile(&rows, &snapshot, &HashSet::new(), &mut alloc(&snapshot));

        assert_eq!(out.batch.len(), 1);
        assert_eq!(out.batch[0].external_id, "GC-8001");
        assert_eq!(out.batch[0].fields.name.as_deref(), Some("First"));
        assert_eq!(out.updated, 1);
        assert_eq!(out.created, 0);
        assert_eq!(out.duplicates, 1);
        assert!(!out.batch[0].is_new);
    }

    #[test]
    fn test_new_rows_get_sequential_ids_above_floor() {
        let rows = vec![row(2, "a@x.com"), row(3, "b@x.com")];
        let out = reconcile(&rows, &[], &HashSet::new(), &mut alloc(&[]));

        let ids: Vec<&str> = out.batch.iter().map(|u| u.external_id.as_str()).collect();
        assert_eq!(ids, vec!["GC-8001", "GC-8002"]);
        assert_eq!(out.created, 2);
        assert!(out.batch.iter().all(|u| u.is_new));
    }

    #[test]
    fn test_minted_ids_exceed_snapshot_and_are_unique() {
        let snapshot = vec![
            record("a@x.com", "GC-8001", false),
            record("b@x.com", "GC-8050", false),
            record("c@x.com", "LEGACY-7", false),
        ];
        let rows: Vec<ParsedRow> = (0..10).map(|i| row(i + 2, &format!("n{}@x.com", i))).collect();
        let out = reconcile(&rows, &snapshot, &HashSet::new(), &mut alloc(&snapshot));

        let mut seen = HashSet::new();
        for upsert in &out.batch {
            let n = parse_suffix("GC", &upsert.external_id).unwrap();
            assert!(n > 8050);
            assert!(seen.insert(upsert.external_id.clone()));
        }
    }

    #[test]
    fn test_supplied_id_is_used_and_skipped_by_minting() {
        let mut first = row(2, "a@x.com");
        let mut second = row(3, "b@x.com");
        second.external_id = Some("GC-8001".into());
        first.external_id = None;

        let out = reconcile(&[first, second], &[], &HashSet::new(), &mut alloc(&[]));
        assert_eq!(out.batch[0].external_id, "GC-8002");
        assert_eq!(out.batch[1].external_id, "GC-8001");
    }

    #[test]
    fn test_supplied_id_held_by_other_email_is_replaced() {
        let snapshot = vec![record("a@x.com", "GC-8001", false)];
        let mut r = row(2, "b@x.com");
        r.external_id = Some("gc-8001".into());

        let out = reconcile(&[r], &snapshot, &HashSet::new(), &mut alloc(&snapshot));
        assert_eq!(out.batch[0].external_id, "GC-8002");
        assert!(out.issues.iter().any(|i| i.field == "external_id"));
    }

    #[test]
    fn test_claimed_from_row_or_identity_or_snapshot() {
        let snapshot = vec![record("stored@x.com", "GC-8001", true)];
        let mut flagged = row(2, "flag@x.com");
        flagged.claimed = Some(true);
        let mut explicit_false = row(3, "stored@x.com");
        explicit_false.claimed = Some(false);
        let rows = vec![flagged, explicit_false, row(4, "active@x.com"), row(5, "plain@x.com")];
        let activated: HashSet<String> = ["active@x.com".to_string()].into();

        let out = reconcile(&rows, &snapshot, &activated, &mut alloc(&snapshot));
        let claimed: Vec<bool> = out.batch.iter().map(|u| u.claimed).collect();
        assert_eq!(claimed, vec![true, true, true, false]);
    }

    #[test]
    fn test_same_input_same_output() {
        let snapshot = vec![record("a@x.com", "GC-8003", false)];
        let rows = vec![row(2, "a@x.com"), row(3, "b@x.com"), row(4, "c@x.com")];

        let first = reconcile(&rows, &snapshot, &HashSet::new(), &mut alloc(&snapshot));
        let second = reconcile(&rows, &snapshot, &HashSet::new(), &mut alloc(&snapshot));
        assert_eq!(first.batch, second.batch);
    }

    #[test]
    fn test_empty_rows_give_empty_batch() {
        let out = reconcile(&[], &[], &HashSet::new(), &mut alloc(&[]));
        assert!(out.is_empty());
    }
}

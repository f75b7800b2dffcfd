//! External identifier allocation (`PREFIX-<n>`)
//!
//! The cursor starts one above the highest numeric suffix in the snapshot,
//! never below the configured floor. Ids that do not follow the scheme are
//! ignored when computing the maximum.

use std::collections::HashSet;

use crate::types::RosterRecord;

#[derive(Debug, Clone)]
pub struct IdAllocator {
    prefix: String,
    next: u64,
    /// Numbers at or above `next` that are already spoken for
    reserved: HashSet<u64>,
}

impl IdAllocator {
    pub fn from_snapshot(prefix: &str, floor: u64, snapshot: &[RosterRecord]) -> Self {
        let highest = snapshot
            .iter()
            .filter_map(|r| parse_suffix(prefix, &r.external_id))
            .max()
            .unwrap_or(0)
            .max(floor);

        Self {
            prefix: prefix.to_string(),
            next: highest + 1,
            reserved: HashSet::new(),
        }
    }

    /// Mark an id supplied by an upload row so minting steps around it
    pub fn reserve(&mut self, external_id: &str) {
        if let Some(n) = parse_suffix(&self.prefix, external_id) {
            if n >= self.next {
                self.reserved.insert(n);
            }
        }
    }

    /// Next unused id
    pub fn mint(&mut self) -> String {
        while self.reserved.remove(&self.next) {
            self.next += 1;
        }
        let id = format_id(&self.prefix, self.next);
        self.next += 1;
        id
    }
}

pub fn format_id(prefix: &str, n: u64) -> String {
    format!("{}-{}", prefix, n)
}

/// `GC-8001` → `Some(8001)`; prefix match is case-insensitive, zero and
/// non-numeric suffixes yield `None`.
pub fn parse_suffix(prefix: &str, external_id: &str) -> Option<u64> {
    let id = external_id.trim();
    let head = id.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let digits = id[prefix.len()..].strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().filter(|n| *n > 0)
}

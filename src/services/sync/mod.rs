//! Roster synchronization engine
//!
//! Parser → Reconciler (allocator + identity cross-reference) → roster upsert
//! → id re-read → session ledger replacement, sequenced by [`RosterSync`].

pub mod allocator;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod orchestrator;
pub mod parser;
pub mod reconciler;

pub use error::{LedgerPhase, SyncError};
pub use orchestrator::{RosterSync, SyncSettings};

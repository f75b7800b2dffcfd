//! Store abstractions consumed by the roster sync pipeline.
//!
//! `RosterStore`, `SessionStore` and `IdentityStore` are the three
//! collaborators the pipeline talks to. The `Pg*` implementations wrap the
//! query modules; the `Memory*` implementations keep everything in process
//! and can be told to fail, which is how the pipeline is tested.
//!
//! All traits are object-safe so callers can hold `Arc<dyn RosterStore>`.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{NewSession, RosterRecord, RosterUpsert};

#[cfg(test)]
pub use memory::{MemoryIdentityStore, MemoryRosterStore, MemorySessionStore};

// =============================================================================
// Core traits
// =============================================================================

#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<RosterRecord>>;
    async fn upsert_by_email(&self, batch: &[RosterUpsert]) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn delete_by_roster_ids(&self, ids: &[Uuid]) -> Result<()>;
    async fn insert_many(&self, rows: &[NewSession]) -> Result<()>;
}

/// Read-only view of the identity/profile store
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn fetch_activated_emails(&self) -> Result<HashSet<String>>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Clone)]
pub struct PgRosterStore {
    pool: PgPool,
}

impl PgRosterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterStore for PgRosterStore {
    async fn fetch_all(&self) -> Result<Vec<RosterRecord>> {
        queries::roster::list_all(&self.pool).await
    }

    async fn upsert_by_email(&self, batch: &[RosterUpsert]) -> Result<()> {
        queries::roster::upsert_by_email(&self.pool, batch).await
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn delete_by_roster_ids(&self, ids: &[Uuid]) -> Result<()> {
        queries::session::delete_by_roster_ids(&self.pool, ids).await?;
        Ok(())
    }

    async fn insert_many(&self, rows: &[NewSession]) -> Result<()> {
        queries::session::insert_many(&self.pool, rows).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn fetch_activated_emails(&self) -> Result<HashSet<String>> {
        let emails = queries::identity::list_activated_emails(&self.pool).await?;
        Ok(emails.into_iter().collect())
    }
}

// =============================================================================
// In-memory (tests)
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetaValue, Metadata, RosterFields};

    fn upsert(email: &str, external_id: &str, claimed: bool) -> RosterUpsert {
        RosterUpsert {
            email: email.into(),
            external_id: external_id.into(),
            claimed,
            metadata: Metadata::new(),
            fields: RosterFields::default(),
            is_new: true,
        }
    }

    #[tokio::test]
    async fn memory_roster_upsert_keeps_external_id_and_ors_claimed() {
        let store = MemoryRosterStore::new();
        store.upsert_by_email(&[upsert("a@x.com", "GC-8001", true)]).await.unwrap();
        store.upsert_by_email(&[upsert("a@x.com", "GC-9999", false)]).await.unwrap();

        let record = store.by_email("a@x.com").unwrap();
        assert_eq!(record.external_id, "GC-8001");
        assert!(record.claimed);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn memory_roster_upsert_fills_blank_external_id() {
        let store = MemoryRosterStore::new();
        store.upsert_by_email(&[upsert("a@x.com", "", false)]).await.unwrap();
        store.upsert_by_email(&[upsert("a@x.com", "GC-8001", false)]).await.unwrap();
        assert_eq!(store.by_email("a@x.com").unwrap().external_id, "GC-8001");
    }

    #[tokio::test]
    async fn memory_roster_upsert_merges_metadata_additively() {
        let store = MemoryRosterStore::new();
        let mut first = upsert("a@x.com", "GC-8001", false);
        first.metadata.insert("bats".into(), MetaValue::from("L"));
        store.upsert_by_email(&[first]).await.unwrap();

        let mut second = upsert("a@x.com", "GC-8001", false);
        second.metadata.insert("throws".into(), MetaValue::from("R"));
        store.upsert_by_email(&[second]).await.unwrap();

        let record = store.by_email("a@x.com").unwrap();
        assert_eq!(record.metadata.len(), 2);
    }

    #[tokio::test]
    async fn memory_roster_rejects_external_id_clash() {
        let store = MemoryRosterStore::new();
        store.upsert_by_email(&[upsert("a@x.com", "GC-8001", false)]).await.unwrap();
        let err = store.upsert_by_email(&[upsert("b@x.com", "GC-8001", false)]).await;
        assert!(err.is_err());
        assert!(store.by_email("b@x.com").is_none());
    }

    #[tokio::test]
    async fn memory_session_store_fails_after_limit() {
        let store = MemorySessionStore::new();
        store.fail_insert_after(1);
        let row = NewSession {
            roster_id: Uuid::new_v4(),
            session_date: None,
            location: None,
            notes: None,
            session_number: None,
            lesson_number: None,
        };
        tokio_test::assert_ok!(store.insert_many(&[row.clone()]).await);
        tokio_test::assert_err!(store.insert_many(&[row]).await);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn memory_identity_store_can_fail() {
        let store = MemoryIdentityStore::new(["a@x.com"]);
        assert!(store.fetch_activated_emails().await.unwrap().contains("a@x.com"));
        store.fail(true);
        assert!(store.fetch_activated_emails().await.is_err());
    }
}

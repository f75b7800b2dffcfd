//! Session ledger types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted coaching/training event owned by one roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub session_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub session_number: Option<i32>,
    pub lesson_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// One entry of a session-log embedded in an uploaded row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub session_number: Option<i32>,
    #[serde(default)]
    pub lesson_number: Option<i32>,
}

impl SessionEntry {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.location.is_none()
            && self.notes.is_none()
            && self.session_number.is_none()
            && self.lesson_number.is_none()
    }

    /// Date, location or notes present; numbers alone do not describe a session
    pub fn has_triple_value(&self) -> bool {
        self.date.is_some() || self.location.is_some() || self.notes.is_some()
    }
}

/// Session row to be inserted, already tagged with its roster id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub roster_id: Uuid,
    pub session_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub session_number: Option<i32>,
    pub lesson_number: Option<i32>,
}

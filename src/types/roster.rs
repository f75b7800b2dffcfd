//! Roster types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Open key/value bag attached to every roster record.
///
/// Keys keep a stable (sorted) order so the stored JSON is deterministic.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Closed set of values a metadata entry can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => MetaValue::Null,
            serde_json::Value::Bool(b) => MetaValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Integer(i),
                None => MetaValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => MetaValue::Text(s),
            serde_json::Value::Array(items) => {
                MetaValue::List(items.into_iter().map(MetaValue::from).collect())
            }
            serde_json::Value::Object(map) => MetaValue::Map(
                map.into_iter().map(|(k, v)| (k, MetaValue::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

/// Descriptive roster columns. `None` means "not supplied": the store keeps
/// its current value (or its default on insert).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterFields {
    pub name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_email: Option<String>,
    pub guardian_phone: Option<String>,
    pub graduation_year: Option<i32>,
    pub team: Option<String>,
    pub session_count: Option<i32>,
    pub lesson_count: Option<i32>,
}

/// Persisted roster entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RosterRecord {
    pub id: Uuid,
    pub email: String,
    pub external_id: String,
    pub claimed: bool,
    #[sqlx(json)]
    pub metadata: Metadata,
    pub session_count: i32,
    pub lesson_count: i32,
    pub name: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_email: Option<String>,
    pub guardian_phone: Option<String>,
    pub graduation_year: Option<i32>,
    pub team: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One reconciled row, ready to be upserted by email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterUpsert {
    pub email: String,
    pub external_id: String,
    pub claimed: bool,
    pub metadata: Metadata,
    #[serde(flatten)]
    pub fields: RosterFields,
    /// True when no snapshot record had this email
    #[serde(skip)]
    pub is_new: bool,
}

/// Lowercase + trim. Returns `None` for anything that is not a plausible address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return None;
    }
    Some(email)
}

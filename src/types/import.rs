//! Row-level import issue types

use serde::{Deserialize, Serialize};

/// Import issue level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportIssueLevel {
    Info,
    Warning,
    Error,
}

/// Single import issue, tied to a source row (header is row 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub row_number: i32,
    pub level: ImportIssueLevel,
    pub field: String,
    pub message: String,
    pub original_value: Option<String>,
}

impl ImportIssue {
    pub fn warning(row_number: i32, field: &str, message: impl Into<String>, original_value: Option<&str>) -> Self {
        Self {
            row_number,
            level: ImportIssueLevel::Warning,
            field: field.to_string(),
            message: message.into(),
            original_value: original_value.map(str::to_string),
        }
    }

    pub fn error(row_number: i32, field: &str, message: impl Into<String>, original_value: Option<&str>) -> Self {
        Self {
            row_number,
            level: ImportIssueLevel::Error,
            field: field.to_string(),
            message: message.into(),
            original_value: original_value.map(str::to_string),
        }
    }

    pub fn info(row_number: i32, field: &str, message: impl Into<String>) -> Self {
        Self {
            row_number,
            level: ImportIssueLevel::Info,
            field: field.to_string(),
            message: message.into(),
            original_value: None,
        }
    }
}

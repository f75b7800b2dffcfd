//! Upload row parser
//!
//! Turns raw tabular text into [`ParsedRow`]s. Known columns are matched by
//! normalized header name (with aliases), everything else lands in the
//! row's metadata bag. Problems with a single cell never abort the row: the
//! value is omitted and an [`ImportIssue`] is recorded. A row is dropped only
//! when no email can be resolved for it.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::types::{
    normalize_email, ImportIssue, MetaValue, Metadata, RosterFields, RosterRecord, SessionEntry,
};

/// One accepted upload row
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// Source line (header is row 1)
    pub row_number: i32,
    pub email: String,
    pub external_id: Option<String>,
    pub claimed: Option<bool>,
    pub fields: RosterFields,
    pub metadata: Metadata,
    /// `Some` when the row carries a session-log, even an empty one
    pub session_log: Option<Vec<SessionEntry>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedUpload {
    pub rows: Vec<ParsedRow>,
    pub total_rows: u32,
    pub dropped_rows: u32,
    pub issues: Vec<ImportIssue>,
}

// =============================================================================
// COLUMNS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Email,
    ExternalId,
    Claimed,
    Name,
    FirstName,
    LastName,
    GuardianName,
    GuardianEmail,
    GuardianPhone,
    GraduationYear,
    Team,
    SessionCount,
    LessonCount,
    SessionDate,
    SessionLocation,
    SessionNotes,
    SessionNumber,
    LessonNumber,
    SessionLog,
    Metadata,
    Extra(String),
}

impl Column {
    fn from_header(raw: &str) -> Column {
        let key = normalize_header(raw);
        match key.as_str() {
            "email" | "e_mail" | "mail" | "contact_email" | "athlete_email" | "player_email" => Column::Email,
            "external_id" | "player_id" | "athlete_id" | "roster_code" | "code" => Column::ExternalId,
            "claimed" | "is_claimed" | "activated" => Column::Claimed,
            "name" | "full_name" | "athlete_name" | "player_name" => Column::Name,
            "first_name" | "firstname" | "given_name" => Column::FirstName,
            "last_name" | "lastname" | "surname" | "family_name" => Column::LastName,
            "guardian_name" | "parent_name" | "guardian" => Column::GuardianName,
            "guardian_email" | "parent_email" => Column::GuardianEmail,
            "guardian_phone" | "parent_phone" => Column::GuardianPhone,
            "graduation_year" | "grad_year" | "class_of" | "class_year" => Column::GraduationYear,
            "team" | "team_name" | "club" => Column::Team,
            "session_count" | "sessions" | "total_sessions" => Column::SessionCount,
            "lesson_count" | "lessons" | "total_lessons" => Column::LessonCount,
            "session_date" | "lesson_date" => Column::SessionDate,
            "session_location" | "lesson_location" => Column::SessionLocation,
            "session_notes" | "lesson_notes" => Column::SessionNotes,
            "session_number" | "session_no" => Column::SessionNumber,
            "lesson_number" | "lesson_no" => Column::LessonNumber,
            "session_log" | "session_history" | "lesson_log" => Column::SessionLog,
            "metadata" | "meta" => Column::Metadata,
            _ => Column::Extra(key),
        }
    }

    fn field_name(&self) -> &str {
        match self {
            Column::Email => "email",
            Column::ExternalId => "external_id",
            Column::Claimed => "claimed",
            Column::Name => "name",
            Column::FirstName => "first_name",
            Column::LastName => "last_name",
            Column::GuardianName => "guardian_name",
            Column::GuardianEmail => "guardian_email",
            Column::GuardianPhone => "guardian_phone",
            Column::GraduationYear => "graduation_year",
            Column::Team => "team",
            Column::SessionCount => "session_count",
            Column::LessonCount => "lesson_count",
            Column::SessionDate => "session_date",
            Column::SessionLocation => "session_location",
            Column::SessionNotes => "session_notes",
            Column::SessionNumber => "session_number",
            Column::LessonNumber => "lesson_number",
            Column::SessionLog => "session_log",
            Column::Metadata => "metadata",
            Column::Extra(key) => key,
        }
    }
}

/// `"Guardian Email"`, `"guardian-email"` and `"guardianEmail"` all become
/// `guardian_email`.
pub fn normalize_header(raw: &str) -> String {
    let raw = raw.trim().trim_start_matches('\u{feff}');
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Picks `;`, tab or `,` by counting them in the header line
pub fn detect_delimiter(content: &str) -> u8 {
    let header = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [b';', b'\t', b',']
        .into_iter()
        .map(|d| (header.bytes().filter(|b| *b == d).count(), d))
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, d)| (*count, *d == b','))
        .map(|(_, d)| d)
        .unwrap_or(b',')
}

// =============================================================================
// VALUE PARSING
// =============================================================================

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "x" | "t" => Some(true),
        "false" | "no" | "n" | "0" | "f" => Some(false),
        _ => None,
    }
}

fn parse_int(s: &str) -> Option<i32> {
    let s = s.trim();
    s.parse::<i32>().ok().or_else(|| {
        // Spreadsheet exports like "12.0"
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.abs() <= i32::MAX as f64)
            .map(|f| f as i32)
    })
}

/// Unknown column cell → metadata value. JSON arrays/objects keep their
/// structure, everything else stays text.
fn meta_value_from_cell(cell: &str) -> MetaValue {
    if cell.starts_with('[') || cell.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(cell) {
            return MetaValue::from(json);
        }
    }
    MetaValue::Text(cell.to_string())
}

fn json_as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_as_int(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|i| i32::try_from(i).ok()),
        serde_json::Value::String(s) => parse_int(s),
        _ => None,
    }
}

/// Entry of a `session_log` cell. Accepts camelCase and snake_case keys and
/// lenient date/number formats.
fn session_entry_from_json(value: &serde_json::Value) -> Option<SessionEntry> {
    let obj = value.as_object()?;
    let get = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));

    let entry = SessionEntry {
        date: get(&["date", "sessionDate", "session_date"])
            .and_then(json_as_text)
            .and_then(|d| parse_date(&d)),
        location: get(&["location", "sessionLocation", "session_location"]).and_then(json_as_text),
        notes: get(&["notes", "sessionNotes", "session_notes"]).and_then(json_as_text),
        session_number: get(&["sessionNumber", "session_number"]).and_then(json_as_int),
        lesson_number: get(&["lessonNumber", "lesson_number"]).and_then(json_as_int),
    };
    (!entry.is_empty()).then_some(entry)
}

// =============================================================================
// PARSER
// =============================================================================

/// Parse an upload.
///
/// `target_id` (roster UUID or external id) supplies the email for rows
/// whose email cell is missing, empty or malformed. Only a header that
/// cannot be read at all is an error.
pub fn parse_upload(
    content: &str,
    snapshot: &[RosterRecord],
    target_id: Option<&str>,
) -> Result<ParsedUpload, csv::Error> {
    let mut out = ParsedUpload::default();

    let by_email: HashMap<&str, &RosterRecord> =
        snapshot.iter().map(|r| (r.email.as_str(), r)).collect();

    let target_email = match target_id.map(str::trim).filter(|t| !t.is_empty()) {
        Some(target) => {
            let found = snapshot.iter().find(|r| {
                r.id.to_string().eq_ignore_ascii_case(target) || r.external_id.eq_ignore_ascii_case(target)
            });
            if found.is_none() {
                out.issues.push(ImportIssue::warning(
                    0,
                    "target_id",
                    "Target roster entry not found; rows without email will be dropped",
                    Some(target),
                ));
            }
            found.map(|r| r.email.clone())
        }
        None => None,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(content))
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns: Vec<Column> = reader.headers()?.iter().map(Column::from_header).collect();

    for (idx, record) in reader.records().enumerate() {
        // Quoted cells may span lines, so prefer the reader's own position
        let position = match &record {
            Ok(r) => r.position(),
            Err(e) => e.position(),
        };
        let row_number = position
            .and_then(|p| i32::try_from(p.line()).ok())
            .unwrap_or((idx + 2) as i32);
        out.total_rows += 1;

        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.dropped_rows += 1;
                out.issues.push(ImportIssue::error(row_number, "", format!("Unreadable row: {}", e), None));
                continue;
            }
        };

        if record.iter().all(|c| c.is_empty()) {
            out.dropped_rows += 1;
            continue;
        }

        let cells: Vec<(&Column, &str)> = columns
            .iter()
            .zip(record.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .collect();

        match parse_row(row_number, &cells, target_email.as_deref(), &mut out.issues) {
            Some(mut row) => {
                if let Some(existing) = by_email.get(row.email.as_str()) {
                    enrich_from_snapshot(&mut row, existing, &mut out.issues);
                }
                out.rows.push(row);
            }
            None => {
                debug!(row_number, "Dropping row without resolvable email");
                out.dropped_rows += 1;
            }
        }
    }

    Ok(out)
}

fn parse_row(
    row_number: i32,
    cells: &[(&Column, &str)],
    target_email: Option<&str>,
    issues: &mut Vec<ImportIssue>,
) -> Option<ParsedRow> {
    let mut email = None;
    let mut external_id = None;
    let mut claimed = None;
    let mut fields = RosterFields::default();
    let mut metadata = Metadata::new();
    let mut first_name = None;
    let mut last_name = None;
    let mut inline_entry = SessionEntry::default();
    let mut log_entries: Option<Vec<SessionEntry>> = None;

    for &(column, value) in cells {
        match column {
            Column::Email => match normalize_email(value) {
                Some(e) => email = Some(e),
                None => issues.push(ImportIssue::warning(row_number, "email", "Invalid email address", Some(value))),
            },
            Column::ExternalId => external_id = Some(value.to_string()),
            Column::Claimed => match parse_bool(value) {
                Some(b) => claimed = Some(b),
                None => issues.push(ImportIssue::warning(row_number, "claimed", "Not a yes/no value", Some(value))),
            },
            Column::Name => fields.name = Some(value.to_string()),
            Column::FirstName => first_name = Some(value),
            Column::LastName => last_name = Some(value),
            Column::GuardianName => fields.guardian_name = Some(value.to_string()),
            Column::GuardianEmail => match normalize_email(value) {
                Some(e) => fields.guardian_email = Some(e),
                None => issues.push(ImportIssue::warning(row_number, "guardian_email", "Invalid email address", Some(value))),
            },
            Column::GuardianPhone => fields.guardian_phone = Some(value.to_string()),
            Column::GraduationYear => {
                fields.graduation_year = int_cell(row_number, column, value, issues).filter(|y| {
                    let ok = (1900..=2100).contains(y);
                    if !ok {
                        issues.push(ImportIssue::warning(row_number, "graduation_year", "Year out of range", Some(value)));
                    }
                    ok
                });
            }
            Column::Team => fields.team = Some(value.to_string()),
            Column::SessionCount => fields.session_count = int_cell(row_number, column, value, issues),
            Column::LessonCount => fields.lesson_count = int_cell(row_number, column, value, issues),
            Column::SessionDate => match parse_date(value) {
                Some(d) => inline_entry.date = Some(d),
                None => issues.push(ImportIssue::warning(row_number, "session_date", "Unrecognized date", Some(value))),
            },
            Column::SessionLocation => inline_entry.location = Some(value.to_string()),
            Column::SessionNotes => inline_entry.notes = Some(value.to_string()),
            Column::SessionNumber => inline_entry.session_number = int_cell(row_number, column, value, issues),
            Column::LessonNumber => inline_entry.lesson_number = int_cell(row_number, column, value, issues),
            Column::SessionLog => match serde_json::from_str::<Vec<serde_json::Value>>(value) {
                Ok(items) => {
                    let entries: Vec<SessionEntry> = items.iter().filter_map(session_entry_from_json).collect();
                    if entries.len() < items.len() {
                        issues.push(ImportIssue::warning(
                            row_number,
                            "session_log",
                            format!("{} session entr(ies) had no usable values", items.len() - entries.len()),
                            None,
                        ));
                    }
                    // Only a literal `[]` clears history; an all-unusable array is omitted
                    if items.is_empty() || !entries.is_empty() {
                        log_entries.get_or_insert_with(Vec::new).extend(entries);
                    }
                }
                Err(e) => issues.push(ImportIssue::warning(
                    row_number,
                    "session_log",
                    format!("Session log is not a JSON array: {}", e),
                    Some(value),
                )),
            },
            Column::Metadata => match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(value) {
                Ok(map) => {
                    for (k, v) in map {
                        metadata.insert(k, MetaValue::from(v));
                    }
                }
                Err(_) => issues.push(ImportIssue::warning(row_number, "metadata", "Metadata is not a JSON object", Some(value))),
            },
            Column::Extra(key) => {
                metadata.insert(key.clone(), meta_value_from_cell(value));
            }
        }
    }

    if fields.name.is_none() {
        let joined = [first_name, last_name].into_iter().flatten().collect::<Vec<_>>().join(" ");
        if !joined.is_empty() {
            fields.name = Some(joined);
        }
    }

    if inline_entry.has_triple_value() {
        log_entries.get_or_insert_with(Vec::new).push(inline_entry);
    }

    let email = match (email, target_email) {
        (Some(e), _) => e,
        (None, Some(t)) => t.to_string(),
        (None, None) => {
            issues.push(ImportIssue::error(row_number, "email", "Row has no usable email and no target; skipped", None));
            return None;
        }
    };

    Some(ParsedRow {
        row_number,
        email,
        external_id,
        claimed,
        fields,
        metadata,
        session_log: log_entries,
    })
}

fn int_cell(row_number: i32, column: &Column, value: &str, issues: &mut Vec<ImportIssue>) -> Option<i32> {
    let parsed = parse_int(value);
    if parsed.is_none() {
        issues.push(ImportIssue::warning(row_number, column.field_name(), "Not a whole number", Some(value)));
    }
    parsed
}

/// Existing entries keep their external id; a conflicting upload value is
/// reported and replaced by the stored one.
fn enrich_from_snapshot(row: &mut ParsedRow, existing: &RosterRecord, issues: &mut Vec<ImportIssue>) {
    if existing.external_id.trim().is_empty() {
        return;
    }
    if let Some(supplied) = row.external_id.as_deref() {
        if !supplied.eq_ignore_ascii_case(&existing.external_id) {
            issues.push(ImportIssue::warning(
                row.row_number,
                "external_id",
                format!("Roster entry already has id {}; uploaded id ignored", existing.external_id),
                Some(supplied),
            ));
        }
    }
    row.external_id = Some(existing.external_id.clone());
}

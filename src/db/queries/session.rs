//! Session ledger database queries

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::types::session::NewSession;

/// Bind parameters per inserted session row
const BINDS_PER_SESSION: usize = 7;

/// Postgres rejects statements with more than 65535 bind parameters
pub const MAX_INSERT_ROWS: usize = u16::MAX as usize / BINDS_PER_SESSION;

/// Delete every session owned by any of the given roster ids
pub async fn delete_by_roster_ids(pool: &PgPool, roster_ids: &[Uuid]) -> Result<u64> {
    if roster_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM sessions WHERE roster_id = ANY($1)")
        .bind(roster_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Insert session rows, one multi-row statement per `MAX_INSERT_ROWS`
pub async fn insert_many(pool: &PgPool, rows: &[NewSession]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(MAX_INSERT_ROWS) {
        inserted += insert_chunk(pool, chunk).await?;
    }
    Ok(inserted)
}

async fn insert_chunk(pool: &PgPool, rows: &[NewSession]) -> Result<u64> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO sessions (id, roster_id, session_date, location, notes, session_number, lesson_number, created_at) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(Uuid::new_v4())
            .push_bind(row.roster_id)
            .push_bind(row.session_date)
            .push_bind(row.location.clone())
            .push_bind(row.notes.clone())
            .push_bind(row.session_number)
            .push_bind(row.lesson_number)
            .push("NOW()");
    });

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

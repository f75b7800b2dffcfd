//! Roster database queries

use anyhow::Result;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::roster::{RosterRecord, RosterUpsert};

/// Load every roster record
pub async fn list_all(pool: &PgPool) -> Result<Vec<RosterRecord>> {
    let records = sqlx::query_as::<_, RosterRecord>(
        r#"
        SELECT
            id, email, external_id, claimed, metadata,
            session_count, lesson_count,
            name, guardian_name, guardian_email, guardian_phone,
            graduation_year, team, created_at, updated_at
        FROM roster
        ORDER BY created_at ASC, email ASC
        "#
    )
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Upsert a reconciled batch keyed by email.
///
/// On conflict the stored `external_id` is kept, `claimed` only ever turns
/// on, `metadata` is merged key by key and descriptive columns are replaced
/// only when the upload supplied them. The batch commits as a whole.
pub async fn upsert_by_email(pool: &PgPool, batch: &[RosterUpsert]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for row in batch {
        sqlx::query(
            r#"
            INSERT INTO roster (
                id, email, external_id, claimed, metadata,
                session_count, lesson_count,
                name, guardian_name, guardian_email, guardian_phone,
                graduation_year, team, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5,
                COALESCE($6, 0), COALESCE($7, 0),
                $8, $9, $10, $11,
                $12, $13, NOW(), NOW()
            )
            ON CONFLICT (email) DO UPDATE SET
                external_id = COALESCE(NULLIF(BTRIM(roster.external_id), ''), EXCLUDED.external_id),
                claimed = roster.claimed OR EXCLUDED.claimed,
                metadata = roster.metadata || EXCLUDED.metadata,
                session_count = COALESCE($6, roster.session_count),
                lesson_count = COALESCE($7, roster.lesson_count),
                name = COALESCE(EXCLUDED.name, roster.name),
                guardian_name = COALESCE(EXCLUDED.guardian_name, roster.guardian_name),
                guardian_email = COALESCE(EXCLUDED.guardian_email, roster.guardian_email),
                guardian_phone = COALESCE(EXCLUDED.guardian_phone, roster.guardian_phone),
                graduation_year = COALESCE(EXCLUDED.graduation_year, roster.graduation_year),
                team = COALESCE(EXCLUDED.team, roster.team),
                updated_at = NOW()
            "#
        )
        .bind(Uuid::new_v4())
        .bind(&row.email)
        .bind(&row.external_id)
        .bind(row.claimed)
        .bind(Json(&row.metadata))
        .bind(row.fields.session_count)
        .bind(row.fields.lesson_count)
        .bind(&row.fields.name)
        .bind(&row.fields.guardian_name)
        .bind(&row.fields.guardian_email)
        .bind(&row.fields.guardian_phone)
        .bind(row.fields.graduation_year)
        .bind(&row.fields.team)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

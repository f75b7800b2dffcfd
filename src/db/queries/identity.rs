//! Identity/profile store queries (read-only)

use anyhow::Result;
use sqlx::PgPool;

/// Normalized emails of every activated profile
pub async fn list_activated_emails(pool: &PgPool) -> Result<Vec<String>> {
    let emails: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT LOWER(BTRIM(email))
        FROM profiles
        WHERE activated_at IS NOT NULL AND email <> ''
        "#
    )
    .fetch_all(pool)
    .await?;

    Ok(emails)
}

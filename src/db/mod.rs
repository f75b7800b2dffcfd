//! Database module

pub mod queries;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Run the embedded migrations.
///
/// The `_sqlx_migrations` bookkeeping is repaired first: records for
/// versions that are no longer embedded are dropped, and stored checksums
/// are refreshed so CRLF/LF checkouts of the same file do not block startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    repair_migration_table(pool, &MIGRATOR).await?;
    MIGRATOR.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

async fn repair_migration_table(pool: &PgPool, migrator: &Migrator) -> Result<()> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(());
    }

    let applied: Vec<(i64, Vec<u8>)> = sqlx::query_as(
        "SELECT version, checksum FROM _sqlx_migrations ORDER BY version"
    )
    .fetch_all(pool)
    .await?;

    for (version, stored_checksum) in applied {
        let embedded = migrator
            .iter()
            .find(|m| m.version == version && !m.migration_type.is_down_migration());

        match embedded {
            None => {
                warn!(version, "Removing orphaned migration record (file no longer embedded)");
                sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some(migration) if stored_checksum.as_slice() != &*migration.checksum => {
                warn!(
                    version,
                    description = %migration.description,
                    "Migration checksum mismatch, updating stored checksum"
                );
                sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                    .bind(&*migration.checksum)
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some(_) => {}
        }
    }

    Ok(())
}

//! Database initialization
//!
//! Opens (creating if needed) the SQLite file that backs the document
//! collections and creates every collection table idempotently.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Default for `ingest_database_max_lock_wait_ms`
pub const DEFAULT_MAX_LOCK_WAIT_MS: i64 = 5000;

/// Initialize database connection and create collections if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer; jobs run in parallel
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 250").execute(&pool).await?;

    create_collections(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every collection table (idempotent)
pub async fn create_collections(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_scans_table(pool).await?;
    create_images_table(pool).await?;
    create_image_beam_sets_table(pool).await?;
    create_scan_auto_share_table(pool).await?;
    create_ownership_table(pool).await?;
    create_jobs_table(pool).await?;
    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scans (
            id TEXT PRIMARY KEY,
            doc TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_images_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            name TEXT PRIMARY KEY,
            origin_scan_id TEXT,
            doc TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_origin ON images(origin_scan_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_image_beam_sets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_beam_sets (
            image_name TEXT NOT NULL,
            scan_id TEXT NOT NULL,
            doc TEXT NOT NULL,
            PRIMARY KEY (image_name, scan_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scan_auto_share_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_auto_share (
            id TEXT PRIMARY KEY,
            viewer_group_ids TEXT NOT NULL DEFAULT '[]',
            editor_group_ids TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ownership_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ownership (
            object_id TEXT NOT NULL,
            object_type TEXT NOT NULL,
            doc TEXT NOT NULL,
            PRIMARY KEY (object_id, object_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            scan_id TEXT NOT NULL,
            state TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            message TEXT,
            log_ref TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind("ingest_database_max_lock_wait_ms")
        .bind(DEFAULT_MAX_LOCK_WAIT_MS.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Read `ingest_database_max_lock_wait_ms`, falling back to the default
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let value: Option<i64> = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'ingest_database_max_lock_wait_ms'",
    )
    .fetch_optional(pool)
    .await?;

    Ok(value.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS).max(0) as u64)
}

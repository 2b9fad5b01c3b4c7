//! Scan summary collection

use scanport_common::db::max_lock_wait_ms;
use scanport_common::{time, Result};
use sqlx::SqlitePool;

use super::{from_doc, to_doc};
use crate::models::ScanSummary;
use crate::utils::retry_on_lock;

pub async fn get_summary(pool: &SqlitePool, scan_id: &str) -> Result<Option<ScanSummary>> {
    let doc: Option<String> = sqlx::query_scalar("SELECT doc FROM scans WHERE id = ?")
        .bind(scan_id)
        .fetch_optional(pool)
        .await?;

    doc.map(|d| from_doc("scan summary", &d)).transpose()
}

/// Insert or replace the summary for `summary.id`
///
/// `updated_at` is derived from the summary's own timestamp, never the wall
/// clock, so an identical re-publish writes an identical row.
pub async fn upsert_summary(pool: &SqlitePool, summary: &ScanSummary) -> Result<()> {
    let id = summary.id.clone();
    let doc = to_doc("scan summary", summary)?;
    let updated_at = time::from_unix_sec(summary.timestamp_unix_sec)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("upsert_summary", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO scans (id, doc, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                doc = excluded.doc,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&doc)
        .bind(&updated_at)
        .execute(pool)
        .await
        .map_err(scanport_common::Error::Database)?;

        Ok(())
    })
    .await
}

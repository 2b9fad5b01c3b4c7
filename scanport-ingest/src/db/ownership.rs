//! Ownership collection

use scanport_common::db::max_lock_wait_ms;
use scanport_common::{Error, Result};
use sqlx::SqlitePool;

use super::{from_doc, to_doc};
use crate::models::{ObjectType, Ownership};
use crate::utils::retry_on_lock;

pub async fn get_ownership(
    pool: &SqlitePool,
    object_id: &str,
    object_type: ObjectType,
) -> Result<Option<Ownership>> {
    let doc: Option<String> =
        sqlx::query_scalar("SELECT doc FROM ownership WHERE object_id = ? AND object_type = ?")
            .bind(object_id)
            .bind(object_type.as_str())
            .fetch_optional(pool)
            .await?;

    doc.map(|d| from_doc("ownership", &d)).transpose()
}

pub async fn upsert_ownership(pool: &SqlitePool, ownership: &Ownership) -> Result<()> {
    let object_id = ownership.object_id.clone();
    let object_type = ownership.object_type.as_str();
    let doc = to_doc("ownership", ownership)?;

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("upsert_ownership", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO ownership (object_id, object_type, doc) VALUES (?, ?, ?)
            ON CONFLICT(object_id, object_type) DO UPDATE SET doc = excluded.doc
            "#,
        )
        .bind(&object_id)
        .bind(object_type)
        .bind(&doc)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

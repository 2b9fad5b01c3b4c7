//! Image record and image beam set collections

use scanport_common::db::max_lock_wait_ms;
use scanport_common::{Error, Result};
use sqlx::SqlitePool;

use super::{from_doc, to_doc};
use crate::models::{ImageBeamSet, ImageRecord};
use crate::utils::retry_on_lock;

pub async fn get_image(pool: &SqlitePool, name: &str) -> Result<Option<ImageRecord>> {
    let doc: Option<String> = sqlx::query_scalar("SELECT doc FROM images WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    doc.map(|d| from_doc("image record", &d)).transpose()
}

pub async fn upsert_image(pool: &SqlitePool, image: &ImageRecord) -> Result<()> {
    let name = image.name.clone();
    let origin = image.origin_scan_id.clone();
    let doc = to_doc("image record", image)?;

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("upsert_image", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO images (name, origin_scan_id, doc) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                origin_scan_id = excluded.origin_scan_id,
                doc = excluded.doc
            "#,
        )
        .bind(&name)
        .bind(&origin)
        .bind(&doc)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Images originating from or associated with `scan_id`, ordered by name
pub async fn images_for_scan(pool: &SqlitePool, scan_id: &str) -> Result<Vec<ImageRecord>> {
    let docs: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT doc FROM images
        WHERE origin_scan_id = ?
           OR EXISTS (
               SELECT 1 FROM json_each(images.doc, '$.scanIdsAssociated') WHERE value = ?
           )
        ORDER BY name
        "#,
    )
    .bind(scan_id)
    .bind(scan_id)
    .fetch_all(pool)
    .await?;

    docs.iter().map(|d| from_doc("image record", d)).collect()
}

pub async fn get_beam_set(pool: &SqlitePool, image_name: &str, scan_id: &str) -> Result<Option<ImageBeamSet>> {
    let doc: Option<String> =
        sqlx::query_scalar("SELECT doc FROM image_beam_sets WHERE image_name = ? AND scan_id = ?")
            .bind(image_name)
            .bind(scan_id)
            .fetch_optional(pool)
            .await?;

    doc.map(|d| from_doc("image beam set", &d)).transpose()
}

pub async fn upsert_beam_set(pool: &SqlitePool, beams: &ImageBeamSet) -> Result<()> {
    let image_name = beams.image_name.clone();
    let scan_id = beams.scan_id.clone();
    let doc = to_doc("image beam set", beams)?;

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("upsert_beam_set", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO image_beam_sets (image_name, scan_id, doc) VALUES (?, ?, ?)
            ON CONFLICT(image_name, scan_id) DO UPDATE SET doc = excluded.doc
            "#,
        )
        .bind(&image_name)
        .bind(&scan_id)
        .bind(&doc)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

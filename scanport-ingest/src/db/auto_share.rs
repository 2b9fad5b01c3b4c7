//! Scan auto-share rules
//!
//! A rule keyed by creator id (or instrument name for automated imports)
//! grants viewer and editor groups access to every scan published for it.

use async_trait::async_trait;
use scanport_common::db::max_lock_wait_ms;
use scanport_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::{from_doc, to_doc};
use crate::models::AutoShareRule;
use crate::utils::retry_on_lock;

/// Source of auto-share rules for the publisher
#[async_trait]
pub trait AutoShareLookup: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<Option<AutoShareRule>>;
}

/// Rules stored in the `scan_auto_share` collection
#[derive(Clone)]
pub struct DbAutoShareLookup {
    pool: SqlitePool,
}

impl DbAutoShareLookup {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutoShareLookup for DbAutoShareLookup {
    async fn lookup(&self, id: &str) -> Result<Option<AutoShareRule>> {
        get_rule(&self.pool, id).await
    }
}

pub async fn get_rule(pool: &SqlitePool, id: &str) -> Result<Option<AutoShareRule>> {
    let row = sqlx::query("SELECT id, viewer_group_ids, editor_group_ids FROM scan_auto_share WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let viewers: String = row.get("viewer_group_ids");
    let editors: String = row.get("editor_group_ids");
    Ok(Some(AutoShareRule {
        id: row.get("id"),
        viewer_group_ids: from_doc("viewer group ids", &viewers)?,
        editor_group_ids: from_doc("editor group ids", &editors)?,
    }))
}

pub async fn save_rule(pool: &SqlitePool, rule: &AutoShareRule) -> Result<()> {
    let id = rule.id.clone();
    let viewers = to_doc("viewer group ids", &rule.viewer_group_ids)?;
    let editors = to_doc("editor group ids", &rule.editor_group_ids)?;

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("save_auto_share_rule", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO scan_auto_share (id, viewer_group_ids, editor_group_ids) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                viewer_group_ids = excluded.viewer_group_ids,
                editor_group_ids = excluded.editor_group_ids
            "#,
        )
        .bind(&id)
        .bind(&viewers)
        .bind(&editors)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

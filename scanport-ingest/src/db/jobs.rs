//! Job record collection

use scanport_common::db::max_lock_wait_ms;
use scanport_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{JobRecord, JobState};
use crate::utils::retry_on_lock;

/// Save the job row; called on every state transition
pub async fn save_job(pool: &SqlitePool, job: &JobRecord) -> Result<()> {
    let job_id = job.job_id.clone();
    let scan_id = job.scan_id.clone();
    let state = job.state.as_str();
    let started_at = job.started_at.to_rfc3339();
    let ended_at = job.ended_at.map(|dt| dt.to_rfc3339());
    let message = job.message.clone();
    let log_ref = job.log_ref.clone();

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("save_job", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, scan_id, state, started_at, ended_at, message, log_ref)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                scan_id = excluded.scan_id,
                state = excluded.state,
                ended_at = excluded.ended_at,
                message = excluded.message,
                log_ref = excluded.log_ref
            "#,
        )
        .bind(&job_id)
        .bind(&scan_id)
        .bind(state)
        .bind(&started_at)
        .bind(&ended_at)
        .bind(&message)
        .bind(&log_ref)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: &str) -> Result<Option<JobRecord>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, scan_id, state, started_at, ended_at, message, log_ref
        FROM jobs
        WHERE job_id = ?
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state: String = row.get("state");
    let state = JobState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown job state: {}", state)))?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse ended_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Ok(Some(JobRecord {
        job_id: row.get("job_id"),
        scan_id: row.get("scan_id"),
        state,
        started_at,
        ended_at,
        message: row.get("message"),
        log_ref: row.get("log_ref"),
    }))
}

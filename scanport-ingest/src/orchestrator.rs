//! Ingest orchestration
//!
//! One call to [`ingest`] runs one job end to end:
//!
//! 1. decode the trigger and, for deliveries, admit the bundle to the archive
//! 2. replay archived bundles onto a fresh working tree (or fetch a manual upload)
//! 3. fetch pseudo-intensity ranges and apply user overlays
//! 4. pick and run a converter
//! 5. scan for diffraction peaks and prepare images, concurrently
//! 6. publish, then classify the change against the previous summary
//!
//! Nothing is published unless every step before publishing succeeded.

use scanport_common::{blob::ContainerRouter, BlobStore};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::{fetch_manual_upload, ArchiveManager};
use crate::classify::classify_change;
use crate::config::IngestConfig;
use crate::converter::pseudo::parse_ranges;
use crate::converter::{run_converter, ConverterRegistry};
use crate::db::{self, AutoShareLookup, DbAutoShareLookup};
use crate::diffraction::{self, DiffractionDb};
use crate::error::{IngestError, Result};
use crate::images::{prepare_images, PreparedImages};
use crate::job_log::JobLog;
use crate::models::{IngestResult, JobRecord, JobState, PseudoIntensityRange, ScanModel};
use crate::overlay::apply_overlays;
use crate::publish::{PublishInput, Publisher};
use crate::rate_limit::RateLimiter;
use crate::trigger::{decode_trigger, DecodedTrigger};
use crate::utils::cancel::check_cancelled;
use crate::utils::with_cancel;
use crate::working_tree::WorkingTree;

/// Process-wide collaborators shared by every job
#[derive(Clone)]
pub struct IngestContext {
    pub config: IngestConfig,
    pub store: Arc<dyn BlobStore>,
    pub db: SqlitePool,
    pub auto_share: Arc<dyn AutoShareLookup>,
    pub converters: ConverterRegistry,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl IngestContext {
    /// Context with the routed blob store, DB-backed auto-share rules and the
    /// built-in converters
    pub fn new(config: IngestConfig, db: SqlitePool) -> Self {
        let rate_limiter = config.rate_limit.map(|s| Arc::new(RateLimiter::new(s)));
        Self {
            store: Arc::new(ContainerRouter::new()),
            auto_share: Arc::new(DbAutoShareLookup::new(db.clone())),
            converters: ConverterRegistry::with_builtin(),
            rate_limiter,
            config,
            db,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_auto_share(mut self, auto_share: Arc<dyn AutoShareLookup>) -> Self {
        self.auto_share = auto_share;
        self
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }
}

/// How a job that did not fail ended
enum JobOutcome {
    Duplicate,
    Published(IngestResult),
}

/// Run one ingest job for `payload`.
///
/// A duplicate delivery is a success with no change kind. Any failure is
/// recorded on the job row and returned.
pub async fn ingest(ctx: &IngestContext, payload: &[u8], cancel: CancellationToken) -> Result<IngestResult> {
    let trigger = decode_trigger(payload)?;
    if trigger.source_bucket.is_some() != trigger.source_key.is_some() {
        return Err(IngestError::MalformedTrigger(
            "Trigger must name both source bucket and source key, or neither".to_string(),
        ));
    }

    let log = Arc::new(JobLog::new(trigger.job_id.clone()));
    log.set_scan_id(&trigger.scan_id);

    let log_ref = format!("{}/{}.log", ctx.config.job_log_root, trigger.job_id);
    let mut job = JobRecord::new(trigger.job_id.clone(), trigger.scan_id.clone(), log_ref);
    db::jobs::save_job(&ctx.db, &job).await?;

    info!(job_id = %job.job_id, scan_id = %job.scan_id, "Starting ingest job");
    job.transition_to(JobState::Running);
    db::jobs::save_job(&ctx.db, &job).await?;

    let publish_time = job.started_at.timestamp();
    let outcome = match &ctx.rate_limiter {
        Some(limiter) => match limiter.acquire("ingest").await {
            Ok(()) => run_job(ctx, &trigger, &log, &cancel, publish_time).await,
            Err(e) => Err(e),
        },
        None => run_job(ctx, &trigger, &log, &cancel, publish_time).await,
    };

    let result = match outcome {
        Ok(JobOutcome::Duplicate) => {
            job.transition_to(JobState::SkippedDuplicate);
            Ok(IngestResult {
                working_dir: Default::default(),
                is_update: false,
                change_kind: None,
                scan_title: String::new(),
                scan_id: trigger.scan_id.clone(),
                job_id: trigger.job_id.clone(),
            })
        }
        Ok(JobOutcome::Published(result)) => {
            job.transition_to(JobState::Completed);
            Ok(result)
        }
        Err(e) => {
            log.error(format!("{}: {}", e.kind(), e));
            job.fail(e.to_string());
            Err(e)
        }
    };
    log.info(format!("Job {} status: {}", job.job_id, job.state.as_str()));

    // The job outcome stands even if its log cannot be stored
    if let Err(e) = log
        .flush(ctx.store.as_ref(), &ctx.config.datasets_container, &ctx.config.job_log_root)
        .await
    {
        warn!(job_id = %job.job_id, error = %e, "Failed to write job log");
    }
    if let Err(e) = db::jobs::save_job(&ctx.db, &job).await {
        error!(job_id = %job.job_id, error = %e, "Failed to save final job state");
    }

    result
}

async fn run_job(
    ctx: &IngestContext,
    trigger: &DecodedTrigger,
    log: &Arc<JobLog>,
    cancel: &CancellationToken,
    publish_time: i64,
) -> Result<JobOutcome> {
    let config = &ctx.config;
    let scan_id = trigger.scan_id.as_str();
    let archive = ArchiveManager::new(Arc::clone(&ctx.store), &config.archive_container, &config.archive_root);

    if let (Some(bucket), Some(key)) = (&trigger.source_bucket, &trigger.source_key) {
        if !archive.admit(bucket, key, log).await? {
            log.info("File already exists in archive, processing stopped.");
            return Ok(JobOutcome::Duplicate);
        }
    }
    check_cancelled(cancel)?;

    let tree = WorkingTree::create(config.working_dir_base.as_deref(), &trigger.job_id, config.keep_working_dir)?;

    let materialized = archive.materialize(scan_id, &tree, log, cancel).await?;
    if materialized.bundle_count == 0 {
        log.info("No zip files found in archive, dataset may have been manually uploaded. Trying to download...");
        fetch_manual_upload(
            ctx.store.as_ref(),
            &config.uploads_container,
            &config.uploads_root,
            scan_id,
            &tree,
            log,
            cancel,
        )
        .await?;
    }

    check_cancelled(cancel)?;
    let ranges = fetch_pseudo_intensity_ranges(ctx, log, cancel).await?;

    let overlays = apply_overlays(
        ctx.store.as_ref(),
        &config.overlay_container,
        &config.overlay_root,
        scan_id,
        &tree,
        log,
        cancel,
    )
    .await?;

    check_cancelled(cancel)?;
    let source = tree.unzipped_dir().to_path_buf();
    let converter = ctx.converters.select(&source, log)?;
    let mut model = run_converter(converter, source.clone(), ranges, scan_id.to_string(), Arc::clone(log)).await?;
    if model.creator_id.is_empty() {
        model.creator_id = config.default_creator_id.clone();
    }

    check_cancelled(cancel)?;
    let model = Arc::new(model);
    let (diffraction_db, images) = analyze(&model, &source, &config.images_root, log).await?;

    check_cancelled(cancel)?;
    let prior = db::scans::get_summary(&ctx.db, scan_id).await?;

    let publisher = Publisher {
        store: ctx.store.as_ref(),
        db: &ctx.db,
        auto_share: ctx.auto_share.as_ref(),
        container: &config.datasets_container,
        datasets_root: &config.datasets_root,
    };
    let input = PublishInput {
        model: &model,
        images: &images,
        diffraction: &diffraction_db,
        custom_meta: overlays.custom_meta.as_ref(),
        prior: prior.as_ref(),
        publish_time_unix_sec: publish_time,
        last_bundle_unix_sec: materialized.last_timestamp_unix_sec,
    };
    let summary = publisher.publish(&input, log, cancel).await?;

    let change_kind = classify_change(&summary, prior.as_ref());
    if let Some(kind) = change_kind {
        log.info(format!("Change since previous import: {:?}", kind));
    }

    Ok(JobOutcome::Published(IngestResult {
        working_dir: tree.root().to_path_buf(),
        is_update: prior.is_some(),
        change_kind,
        scan_title: summary.title,
        scan_id: scan_id.to_string(),
        job_id: trigger.job_id.clone(),
    }))
}

/// Ranges CSV from the config container; a missing file means no ranges
async fn fetch_pseudo_intensity_ranges(
    ctx: &IngestContext,
    log: &JobLog,
    cancel: &CancellationToken,
) -> Result<Vec<PseudoIntensityRange>> {
    log.info("Downloading pseudo-intensity ranges...");
    let key = ctx.config.pseudo_intensity_key();

    match with_cancel(cancel, ctx.store.read(&ctx.config.config_container, &key)).await {
        Ok(bytes) => parse_ranges(&String::from_utf8_lossy(&bytes))
            .map_err(|e| IngestError::Converter(format!("Failed to read {}: {}", key, e))),
        Err(IngestError::NotFound(_)) => {
            log.warn(format!("No pseudo-intensity ranges found at {}", key));
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Diffraction scan and image preparation, run side by side on the blocking pool
async fn analyze(
    model: &Arc<ScanModel>,
    source: &Path,
    images_root: &str,
    log: &Arc<JobLog>,
) -> Result<(DiffractionDb, PreparedImages)> {
    log.info("Running diffraction DB generator...");

    let diffraction_model = Arc::clone(model);
    let diffraction_task = async move {
        tokio::task::spawn_blocking(move || diffraction::scan_model(&diffraction_model))
            .await
            .map_err(|e| IngestError::Converter(format!("Diffraction scan failed: {}", e)))
    };

    let image_model = Arc::clone(model);
    let image_log = Arc::clone(log);
    let image_source = source.to_path_buf();
    let image_root = images_root.to_string();
    let image_task = async move {
        tokio::task::spawn_blocking(move || prepare_images(&image_model, &image_source, &image_root, &image_log))
            .await
            .map_err(|e| IngestError::ImageDecode(format!("Image preparation failed: {}", e)))?
    };

    let (diffraction_db, images) = tokio::try_join!(diffraction_task, image_task)?;
    log.info(format!(
        "Diffraction scan found {} peaks in {} locations",
        diffraction_db.peak_count(),
        diffraction_db.locations.len()
    ));
    Ok((diffraction_db, images))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> IngestContext {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        IngestContext::new(IngestConfig::default(), pool)
    }

    #[tokio::test]
    async fn test_delivery_without_bucket_is_malformed() {
        let payload = br#"{"Records":[{"eventSource":"aws:s3","s3":{"bucket":{"name":""},
            "object":{"key":"048300551-27-06-2021-09-52-25.zip"}}}]}"#;

        let err = ingest(&context(), payload, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedTrigger(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_unrecognized_payload_is_malformed() {
        let err = ingest(&context(), b"{\"hello\":1}", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected or no message type embedded in triggering SNS message"
        );
    }
}

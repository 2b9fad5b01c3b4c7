//! Publishing a converted scan
//!
//! Writes happen strictly in this order, each finishing before the next:
//!
//! 1. scan binary `<datasetsRoot>/<scanId>/dataset.bin`
//! 2. image bytes, image records and beam sets
//! 3. diffraction DB `<datasetsRoot>/<scanId>/diffraction-db.bin`
//! 4. scan summary
//! 5. ownership rows
//!
//! There is no rollback. Every write is an overwrite or an upsert, so running
//! the same publish again repairs a partial one.

use scanport_common::BlobStore;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::{self, AutoShareLookup};
use crate::diffraction::DiffractionDb;
use crate::error::{IngestError, Result};
use crate::images::{final_name, PreparedImage, PreparedImages};
use crate::job_log::JobLog;
use crate::models::{
    AutoShareRule, CustomMeta, DataTypeCount, DataTypeKind, ImageRecord, ObjectType, Ownership, ScanModel,
    ScanSummary,
};
use crate::utils::cancel::check_cancelled;
use crate::utils::with_cancel;

pub const DATASET_FILE: &str = "dataset.bin";
pub const DIFFRACTION_FILE: &str = "diffraction-db.bin";

pub fn dataset_key(datasets_root: &str, scan_id: &str) -> String {
    format!("{}/{}/{}", datasets_root, scan_id, DATASET_FILE)
}

pub fn diffraction_key(datasets_root: &str, scan_id: &str) -> String {
    format!("{}/{}/{}", datasets_root, scan_id, DIFFRACTION_FILE)
}

/// Everything one publish needs besides the stores
pub struct PublishInput<'a> {
    pub model: &'a ScanModel,
    pub images: &'a PreparedImages,
    pub diffraction: &'a DiffractionDb,
    pub custom_meta: Option<&'a CustomMeta>,
    pub prior: Option<&'a ScanSummary>,
    /// Import time written into the summary; the job start time
    pub publish_time_unix_sec: i64,
    /// Timestamp of the newest archived bundle, if any were applied
    pub last_bundle_unix_sec: Option<i64>,
}

/// Build the summary to store for `input`, merging the prior one
pub fn build_summary(input: &PublishInput<'_>, log: &JobLog) -> ScanSummary {
    let model = input.model;
    let prior = input.prior;
    let publish_time = input.publish_time_unix_sec;

    // A description means someone edited the scan; keep their title too
    let (mut title, description) = match prior {
        Some(p) if !p.description.is_empty() => (p.title.clone(), p.description.clone()),
        _ => (model.title.clone(), model.description.clone().unwrap_or_default()),
    };

    let mut default_context_image = model
        .default_context_image
        .as_deref()
        .map(|name| final_name(name, &model.id))
        .unwrap_or_default();

    if let Some(custom) = input.custom_meta {
        if let Some(custom_title) = custom.usable_title() {
            log.info(format!("Applying custom title: {}", custom_title));
            title = custom_title.to_string();
        }
        if let Some(image) = custom.default_context_image.as_deref().filter(|i| !i.is_empty()) {
            log.info(format!("Applying custom default context image: {}", image));
            default_context_image = image.to_string();
        }
    }

    let mut data_type_counts = Vec::new();
    if model.counts.normal_spectra > 0 {
        data_type_counts.push(DataTypeCount {
            kind: DataTypeKind::Xrf,
            count: model.counts.normal_spectra,
        });
    }
    data_type_counts.extend(input.images.data_type_counts());

    let counts = model.counts;
    let is_complete = counts.pseudo_intensities > 0 && counts.normal_spectra == counts.pseudo_intensities * 2;
    let complete_timestamp_unix_sec = if is_complete {
        match prior.map(|p| p.complete_timestamp_unix_sec) {
            Some(t) if t > 0 => t,
            _ => publish_time,
        }
    } else {
        input.last_bundle_unix_sec.unwrap_or(0)
    };

    let mut previous_import_times_unix_sec = prior
        .map(|p| p.previous_import_times_unix_sec.clone())
        .unwrap_or_default();
    if let Some(p) = prior {
        if p.timestamp_unix_sec != publish_time && !previous_import_times_unix_sec.contains(&p.timestamp_unix_sec) {
            previous_import_times_unix_sec.push(p.timestamp_unix_sec);
        }
    }

    ScanSummary {
        id: model.id.clone(),
        title,
        description,
        instrument: model.instrument,
        instrument_config: model.instrument_config.clone(),
        metadata: model.metadata.clone(),
        counts,
        data_type_counts,
        default_context_image,
        timestamp_unix_sec: publish_time,
        complete_timestamp_unix_sec,
        previous_import_times_unix_sec,
        creator_id: model.creator_id.clone(),
    }
}

pub struct Publisher<'a> {
    pub store: &'a dyn BlobStore,
    pub db: &'a SqlitePool,
    pub auto_share: &'a dyn AutoShareLookup,
    pub container: &'a str,
    pub datasets_root: &'a str,
}

impl<'a> Publisher<'a> {
    pub async fn publish(
        &self,
        input: &PublishInput<'_>,
        log: &JobLog,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let model = input.model;
        let scan_id = model.id.as_str();

        let bytes = model
            .to_bytes()
            .map_err(|e| IngestError::Converter(format!("Failed to serialize scan {}: {}", scan_id, e)))?;
        let key = dataset_key(self.datasets_root, scan_id);
        with_cancel(cancel, self.store.write(self.container, &key, &bytes)).await?;
        log.info(format!("Wrote scan binary: {}", key));

        for image in &input.images.images {
            check_cancelled(cancel)?;
            self.publish_image(image, scan_id, cancel).await?;
        }

        check_cancelled(cancel)?;
        let bytes = input
            .diffraction
            .to_bytes()
            .map_err(|e| IngestError::Converter(format!("Failed to serialize diffraction DB: {}", e)))?;
        let key = diffraction_key(self.datasets_root, scan_id);
        with_cancel(cancel, self.store.write(self.container, &key, &bytes)).await?;
        log.info("Diffraction db saved successfully");

        check_cancelled(cancel)?;
        let summary = build_summary(input, log);
        db::scans::upsert_summary(self.db, &summary).await?;

        check_cancelled(cancel)?;
        let rule = self.lookup_auto_share(&summary, log).await;
        let image_names: Vec<&str> = input.images.images.iter().map(|i| i.record.name.as_str()).collect();
        self.write_ownership(scan_id, ObjectType::Scan, &summary.creator_id, rule.as_ref(), input)
            .await?;
        for name in image_names {
            self.write_ownership(name, ObjectType::Image, &summary.creator_id, rule.as_ref(), input)
                .await?;
        }

        info!(scan_id = %scan_id, title = %summary.title, "Published scan");
        Ok(summary)
    }

    async fn publish_image(&self, image: &PreparedImage, scan_id: &str, cancel: &CancellationToken) -> Result<()> {
        let record = merge_image_record(db::images::get_image(self.db, &image.record.name).await?, &image.record)?;

        with_cancel(cancel, self.store.write(self.container, &record.storage_path, &image.bytes)).await?;
        db::images::upsert_image(self.db, &record).await?;

        if let Some(beams) = &image.beam_set {
            db::images::upsert_beam_set(self.db, beams).await?;
        }
        tracing::debug!(scan_id, image = %record.name, "Published image");
        Ok(())
    }

    /// Rule for the scan's creator, or its instrument for automated imports.
    /// Lookup failures are logged, never fatal.
    async fn lookup_auto_share(&self, summary: &ScanSummary, log: &JobLog) -> Option<AutoShareRule> {
        let id = if summary.creator_id.is_empty() {
            summary.instrument.as_str()
        } else {
            summary.creator_id.as_str()
        };
        log.info(format!("Looking up auto-share group(s) for: {}", id));

        match self.auto_share.lookup(id).await {
            Ok(Some(rule)) => Some(rule),
            Ok(None) => {
                log.warn("No auto-share destination found, so only importing user will be able to access this dataset.");
                None
            }
            Err(e) => {
                log.warn(format!("Failed to look up auto-share rule for {}: {}", id, e));
                None
            }
        }
    }

    async fn write_ownership(
        &self,
        object_id: &str,
        object_type: ObjectType,
        creator_id: &str,
        rule: Option<&AutoShareRule>,
        input: &PublishInput<'_>,
    ) -> Result<()> {
        let existing = db::ownership::get_ownership(self.db, object_id, object_type).await?;
        let ownership = Ownership {
            object_id: object_id.to_string(),
            object_type,
            creator_id: creator_id.to_string(),
            created_at_unix_sec: input.publish_time_unix_sec,
            modified_at_unix_sec: input.publish_time_unix_sec,
            viewer_group_ids: rule.map(|r| r.viewer_group_ids.clone()).unwrap_or_default(),
            editor_group_ids: rule.map(|r| r.editor_group_ids.clone()).unwrap_or_default(),
        }
        .merge_existing(existing.as_ref());

        db::ownership::upsert_ownership(self.db, &ownership).await?;
        Ok(())
    }
}

/// Combine a new image record with the stored one of the same name.
///
/// A stored record from a different origin scan is a conflict. Otherwise the
/// associated scan lists are merged.
pub fn merge_image_record(existing: Option<ImageRecord>, new: &ImageRecord) -> Result<ImageRecord> {
    let Some(existing) = existing else {
        return Ok(new.clone());
    };

    let new_origin = new.origin_scan_id.as_deref();
    let existing_origin = existing
        .origin_scan_id
        .as_deref()
        .or_else(|| existing.scan_ids_associated.first().map(String::as_str));

    if let (Some(a), Some(b)) = (existing_origin, new_origin) {
        if a != b {
            return Err(IngestError::ImageConflict(format!(
                "Image {} already exists for scan {}, cannot import it for scan {}",
                new.name, a, b
            )));
        }
    }

    let mut merged = new.clone();
    for id in existing.scan_ids_associated {
        if !merged.scan_ids_associated.contains(&id) {
            merged.scan_ids_associated.push(id);
        }
    }
    merged.scan_ids_associated.sort();
    Ok(merged)
}

//! End-to-end ingest jobs against local-directory containers

mod helpers;

use helpers::bundles::msa;
use helpers::{breadboard_bundle, delivery_trigger, reprocess_trigger, BundleSpec, Sandbox};
use scanport_ingest::db;
use scanport_ingest::models::{
    ChangeKind, DataTypeKind, ImageBeamSet, ImageRecord, JobState, ObjectType, Ownership,
};
use scanport_ingest::publish::{dataset_key, diffraction_key};
use scanport_ingest::{ingest, IngestError};
use tokio_util::sync::CancellationToken;

const SCAN_ID: &str = "983561";
const FIRST_BUNDLE: &str = "983561-27-06-2021-09-52-25.zip";
const SECOND_BUNDLE: &str = "983561-28-06-2021-10-00-00.zip";

/// TC-01: A fresh delivery is archived and published
///
/// **Given:** An empty archive and a breadboard bundle in the inbox
/// **When:** The delivery trigger is ingested
/// **Then:**
///   - The bundle is copied into the archive
///   - Scan binary, diffraction DB and context image are written
///   - The summary row carries the converter's title and spectra counts
///   - The job ends `completed` and its log is stored
#[tokio::test]
async fn tc_01_fresh_delivery_publishes_scan() {
    let sandbox = Sandbox::new().await;
    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&BundleSpec::default()));
    let ctx = sandbox.context();

    let result = ingest(&ctx, &delivery_trigger(&sandbox.inbox_name(), &key), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.scan_id, SCAN_ID);
    assert_eq!(result.scan_title, "Bench run 12");
    assert!(!result.is_update);
    assert_eq!(result.change_kind, Some(ChangeKind::Unknown));
    assert!(result.job_id.starts_with("auto-import"));

    let config = &sandbox.config;
    assert!(sandbox.exists(&config.archive_container, &format!("Archive/{}", FIRST_BUNDLE)).await);
    assert!(sandbox.exists(&config.datasets_container, &dataset_key(&config.datasets_root, SCAN_ID)).await);
    assert!(
        sandbox
            .exists(&config.datasets_container, &diffraction_key(&config.datasets_root, SCAN_ID))
            .await
    );
    assert!(
        sandbox
            .exists(&config.datasets_container, &format!("Images/{}/ctx_1.png", SCAN_ID))
            .await
    );

    let summary = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(summary.title, "Bench run 12");
    assert_eq!(summary.meta("RTT"), SCAN_ID);
    assert_eq!(summary.meta("Title"), "Bench run 12");
    assert_eq!(summary.meta("TargetId"), "0");
    assert!(summary.previous_import_times_unix_sec.is_empty());
    assert_eq!(summary.counts.normal_spectra, 4);
    assert_eq!(summary.counts.bulk_spectra, 2);
    assert_eq!(summary.data_type_count(DataTypeKind::Xrf), 4);
    assert_eq!(summary.data_type_count(DataTypeKind::Image), 1);
    assert_eq!(summary.creator_id, "u-42");
    assert_eq!(summary.default_context_image, "ctx_1.png");

    let image = db::images::get_image(&sandbox.pool, "ctx_1.png").await.unwrap().unwrap();
    assert_eq!((image.width, image.height), (8, 6));
    assert_eq!(image.scan_ids_associated, vec![SCAN_ID.to_string()]);

    let beams = db::images::get_beam_set(&sandbox.pool, "ctx_1.png", SCAN_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(beams.locations.len(), 3);

    let ownership = db::ownership::get_ownership(&sandbox.pool, SCAN_ID, ObjectType::Scan)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ownership.creator_id, "u-42");

    let job = db::jobs::load_job(&sandbox.pool, &result.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.ended_at.is_some());

    let log = sandbox.read_text(&config.datasets_container, &job.log_ref).await;
    assert!(log.contains("Downloading pseudo-intensity ranges..."));
    assert!(log.contains("Running diffraction DB generator..."));
    assert!(log.contains(&format!("Job {} status: completed", result.job_id)));

    assert_eq!(sandbox.working_dirs_left(), 0, "working tree must be removed");
}

/// TC-02: Delivering the same bundle twice is a no-op the second time
///
/// **Given:** A bundle that was already ingested
/// **When:** The same delivery trigger arrives again
/// **Then:** The job is `skipped-duplicate`, no change is reported and the
/// stored summary is untouched
#[tokio::test]
async fn tc_02_duplicate_delivery_is_skipped() {
    let sandbox = Sandbox::new().await;
    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&BundleSpec::default()));
    let ctx = sandbox.context();
    let trigger = delivery_trigger(&sandbox.inbox_name(), &key);

    ingest(&ctx, &trigger, CancellationToken::new()).await.unwrap();
    let before = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();

    let second = ingest(&ctx, &trigger, CancellationToken::new()).await.unwrap();
    assert_eq!(second.change_kind, None);
    assert!(!second.is_update);

    let job = db::jobs::load_job(&sandbox.pool, &second.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::SkippedDuplicate);

    let log = sandbox
        .read_text(&sandbox.config.datasets_container, &job.log_ref)
        .await;
    assert!(log.contains("File already exists in archive, processing stopped."));

    let after = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(before, after);
}

/// TC-03: A later bundle with more spectra is classified as a spectra change
///
/// **Given:** A scan ingested from one bundle with PMCs 1-2
/// **When:** A newer bundle adding PMC 3 is delivered
/// **Then:** Both bundles are replayed and the result is an update of kind
/// `spectra`
#[tokio::test]
async fn tc_03_second_bundle_is_spectra_update() {
    let sandbox = Sandbox::new().await;
    let ctx = sandbox.context();

    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&BundleSpec::default()));
    ingest(&ctx, &delivery_trigger(&sandbox.inbox_name(), &key), CancellationToken::new())
        .await
        .unwrap();
    let first = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();

    let spec = BundleSpec {
        pmcs: vec![3],
        ..BundleSpec::default()
    };
    let key = sandbox.deliver(SECOND_BUNDLE, &breadboard_bundle(&spec));
    let result = ingest(&ctx, &delivery_trigger(&sandbox.inbox_name(), &key), CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_update);
    assert_eq!(result.change_kind, Some(ChangeKind::Spectra));

    let second = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(second.counts.normal_spectra, 6);
    assert!(second.counts.normal_spectra > first.counts.normal_spectra);
}

/// TC-04: Reprocessing with nothing new reports an unknown change
///
/// **Given:** A published scan
/// **When:** A reprocess trigger for it runs
/// **Then:** The job replays the archive and republishes the same counts;
/// the change kind is `unknown`
#[tokio::test]
async fn tc_04_reprocess_republishes() {
    let sandbox = Sandbox::new().await;
    let ctx = sandbox.context();
    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&BundleSpec::default()));
    ingest(&ctx, &delivery_trigger(&sandbox.inbox_name(), &key), CancellationToken::new())
        .await
        .unwrap();
    let first = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();

    let result = ingest(&ctx, &reprocess_trigger(SCAN_ID, "job-reprocess-1"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.job_id, "job-reprocess-1");
    assert!(result.is_update);
    assert_eq!(result.change_kind, Some(ChangeKind::Unknown));

    let second = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(second.counts, first.counts);
    assert_eq!(second.data_type_counts, first.data_type_counts);

    let images = db::images::images_for_scan(&sandbox.pool, SCAN_ID).await.unwrap();
    assert_eq!(images.len(), 1);
}

/// TC-05: With no archived bundles the manual upload area is used
///
/// **Given:** Loose dataset files under the uploads container, nothing archived
/// **When:** A reprocess trigger runs
/// **Then:** The scan is published from the uploaded files and the log notes
/// the fallback
#[tokio::test]
async fn tc_05_manual_upload_fallback() {
    let sandbox = Sandbox::new().await;
    let config = sandbox.config.clone();
    let upload = |name: &str| format!("{}/{}/{}", config.uploads_root, SCAN_ID, name);

    sandbox
        .put(&config.uploads_container, &upload("detector.json"), br#"{"detector":"jpl-breadboard"}"#)
        .await;
    sandbox
        .put(
            &config.uploads_container,
            &upload("import.json"),
            br#"{"title":"Uploaded by hand","group":"JPL Breadboard","msaDir":"."}"#,
        )
        .await;
    sandbox
        .put(
            &config.uploads_container,
            &upload("Normal_A_0007.msa"),
            msa(7, &[1, 2, 3], &[3, 2, 1]).as_bytes(),
        )
        .await;

    let result = ingest(&sandbox.context(), &reprocess_trigger(SCAN_ID, "job-upload"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.scan_title, "Uploaded by hand");
    assert!(!result.is_update);

    let job = db::jobs::load_job(&sandbox.pool, "job-upload").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    let log = sandbox.read_text(&config.datasets_container, &job.log_ref).await;
    assert!(log.contains("No zip files found in archive, dataset may have been manually uploaded. Trying to download..."));

    let summary = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(summary.counts.normal_spectra, 2);
    assert_eq!(summary.data_type_count(DataTypeKind::Image), 0);
}

/// TC-06: A tree no converter recognizes fails the job
///
/// **Given:** A bundle without `detector.json`
/// **When:** It is delivered
/// **Then:** The job fails with `UnknownFormat`, its message is recorded and
/// nothing is published
#[tokio::test]
async fn tc_06_unknown_format_fails_without_publishing() {
    let sandbox = Sandbox::new().await;
    let spec = BundleSpec {
        without_detector: true,
        ..BundleSpec::default()
    };
    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&spec));

    let err = ingest(
        &sandbox.context(),
        &delivery_trigger(&sandbox.inbox_name(), &key),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::UnknownFormat(_)), "{:?}", err);

    let config = &sandbox.config;
    assert!(!sandbox.exists(&config.datasets_container, &dataset_key(&config.datasets_root, SCAN_ID)).await);
    assert!(db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().is_none());

    let jobs = sqlx::query_scalar::<_, String>("SELECT job_id FROM jobs")
        .fetch_all(&sandbox.pool)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = db::jobs::load_job(&sandbox.pool, &jobs[0]).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.message.as_deref(), Some("Failed to determine dataset type to import."));

    let log = sandbox.read_text(&config.datasets_container, &job.log_ref).await;
    assert!(log.contains("SelectDataConverter path listing:"));
}

/// TC-07: A delivery whose key is not a bundle name is rejected up front
///
/// **Given:** A delivery event for `notes.txt`
/// **When:** It is ingested
/// **Then:** `BadBundleName` is returned and nothing is archived
#[tokio::test]
async fn tc_07_bad_bundle_name_rejected() {
    let sandbox = Sandbox::new().await;
    let key = sandbox.deliver("notes.txt", b"hello");

    let err = ingest(
        &sandbox.context(),
        &delivery_trigger(&sandbox.inbox_name(), &key),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::BadBundleName(_)), "{:?}", err);
    assert!(!sandbox.exists(&sandbox.config.archive_container, "Archive/notes.txt").await);
}

/// TC-08: Malformed reprocess trigger
///
/// **Given:** A reprocess payload without a job id
/// **When:** It is ingested
/// **Then:** `MalformedTrigger` is returned
#[tokio::test]
async fn tc_08_reprocess_without_job_id() {
    let sandbox = Sandbox::new().await;
    let err = ingest(
        &sandbox.context(),
        br#"{"datasetID":"983561","jobID":""}"#,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::MalformedTrigger(_)));
    assert_eq!(err.to_string(), "Failed to find job ID in reprocess trigger");
}

/// TC-09: Custom title overlay wins over the converter's title
///
/// **Given:** An archived bundle and `custom-meta.json` with a title
/// **When:** The scan is reprocessed
/// **Then:** The published title is the custom one
#[tokio::test]
async fn tc_09_custom_title_overlay() {
    let sandbox = Sandbox::new().await;
    let config = sandbox.config.clone();
    sandbox
        .put(
            &config.archive_container,
            &format!("{}/{}", config.archive_root, FIRST_BUNDLE),
            &breadboard_bundle(&BundleSpec::default()),
        )
        .await;
    sandbox
        .put(
            &config.overlay_container,
            &format!("{}/{}/custom-meta.json", config.overlay_root, SCAN_ID),
            br#"{"title":"Naltsos outcrop"}"#,
        )
        .await;

    let result = ingest(&sandbox.context(), &reprocess_trigger(SCAN_ID, "job-custom"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.scan_title, "Naltsos outcrop");

    let summary = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(summary.title, "Naltsos outcrop");
}

/// TC-10: A cancelled job fails and publishes nothing
///
/// **Given:** An archived bundle and an already-cancelled token
/// **When:** The scan is reprocessed
/// **Then:** `Cancelled` is returned and the job is marked failed
#[tokio::test]
async fn tc_10_cancelled_job() {
    let sandbox = Sandbox::new().await;
    let config = sandbox.config.clone();
    sandbox
        .put(
            &config.archive_container,
            &format!("{}/{}", config.archive_root, FIRST_BUNDLE),
            &breadboard_bundle(&BundleSpec::default()),
        )
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ingest(&sandbox.context(), &reprocess_trigger(SCAN_ID, "job-cancel"), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));

    let job = db::jobs::load_job(&sandbox.pool, "job-cancel").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().is_none());
}

/// TC-11: A stray file in the scan's archive directory fails the listing
///
/// **Given:** `readme.txt` next to a valid bundle under `Archive/<scanId>/`
/// **When:** The scan is reprocessed
/// **Then:** `BadBundleName` naming `readme.txt` is returned and nothing is published
#[tokio::test]
async fn tc_11_stray_archive_file_fails() {
    let sandbox = Sandbox::new().await;
    let config = sandbox.config.clone();
    let dir = format!("{}/{}", config.archive_root, SCAN_ID);
    sandbox
        .put(
            &config.archive_container,
            &format!("{}/{}", dir, FIRST_BUNDLE),
            &breadboard_bundle(&BundleSpec::default()),
        )
        .await;
    sandbox
        .put(&config.archive_container, &format!("{}/readme.txt", dir), b"notes")
        .await;

    let err = ingest(&sandbox.context(), &reprocess_trigger(SCAN_ID, "job-stray"), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::BadBundleName(_)), "{:?}", err);
    assert!(err.to_string().contains("readme.txt"));

    assert!(!sandbox.exists(&config.datasets_container, &dataset_key(&config.datasets_root, SCAN_ID)).await);
    let job = db::jobs::load_job(&sandbox.pool, "job-stray").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
}

/// Everything a publish writes for the default bundle
struct PublishedState {
    dataset: Vec<u8>,
    diffraction: Vec<u8>,
    images: Vec<ImageRecord>,
    beams: ImageBeamSet,
    scan_owner: Ownership,
    image_owner: Ownership,
}

impl PublishedState {
    async fn read(sandbox: &Sandbox) -> Self {
        let config = &sandbox.config;
        let pool = &sandbox.pool;
        Self {
            dataset: sandbox
                .read_bytes(&config.datasets_container, &dataset_key(&config.datasets_root, SCAN_ID))
                .await,
            diffraction: sandbox
                .read_bytes(&config.datasets_container, &diffraction_key(&config.datasets_root, SCAN_ID))
                .await,
            images: db::images::images_for_scan(pool, SCAN_ID).await.unwrap(),
            beams: db::images::get_beam_set(pool, "ctx_1.png", SCAN_ID).await.unwrap().unwrap(),
            scan_owner: db::ownership::get_ownership(pool, SCAN_ID, ObjectType::Scan)
                .await
                .unwrap()
                .unwrap(),
            image_owner: db::ownership::get_ownership(pool, "ctx_1.png", ObjectType::Image)
                .await
                .unwrap()
                .unwrap(),
        }
    }
}

/// TC-12: Republishing unchanged content leaves the published state as it was
///
/// **Given:** A scan published from one delivery
/// **When:** The scan is reprocessed twice with nothing new in the archive
/// **Then:**
///   - Scan binary and diffraction DB bytes are unchanged
///   - Image records and beam sets are identical to the first publish
///   - Ownership rows keep their creator, creation time and groups
///   - `previous_import_times` holds each earlier import once
#[tokio::test]
async fn tc_12_republish_is_idempotent() {
    let sandbox = Sandbox::new().await;
    let ctx = sandbox.context();
    let key = sandbox.deliver(FIRST_BUNDLE, &breadboard_bundle(&BundleSpec::default()));
    ingest(&ctx, &delivery_trigger(&sandbox.inbox_name(), &key), CancellationToken::new())
        .await
        .unwrap();

    let first = PublishedState::read(&sandbox).await;
    let first_summary = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();

    for job_id in ["job-republish-1", "job-republish-2"] {
        let result = ingest(&ctx, &reprocess_trigger(SCAN_ID, job_id), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_update);
        assert_eq!(result.change_kind, Some(ChangeKind::Unknown));

        let again = PublishedState::read(&sandbox).await;
        assert_eq!(again.dataset, first.dataset, "scan binary changed");
        assert_eq!(again.diffraction, first.diffraction, "diffraction DB changed");
        assert_eq!(again.images, first.images);
        assert_eq!(again.images.len(), 1);
        assert_eq!(again.images[0].scan_ids_associated, vec![SCAN_ID.to_string()]);
        assert_eq!(again.beams, first.beams);
        for (now, before) in [
            (&again.scan_owner, &first.scan_owner),
            (&again.image_owner, &first.image_owner),
        ] {
            assert_eq!(now.creator_id, before.creator_id);
            assert_eq!(now.created_at_unix_sec, before.created_at_unix_sec);
            assert_eq!(now.viewer_group_ids, before.viewer_group_ids);
            assert_eq!(now.editor_group_ids, before.editor_group_ids);
            assert!(now.modified_at_unix_sec >= before.modified_at_unix_sec);
        }
    }

    let summary = db::scans::get_summary(&sandbox.pool, SCAN_ID).await.unwrap().unwrap();
    assert_eq!(summary.counts, first_summary.counts);
    assert_eq!(summary.metadata, first_summary.metadata);
    assert_eq!(summary.data_type_counts, first_summary.data_type_counts);

    let times = &summary.previous_import_times_unix_sec;
    let mut unique = times.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), times.len(), "duplicated import times: {:?}", times);
    // Jobs that start within the same second share a timestamp and add none
    assert!(times.len() <= 2, "{:?}", times);
    if let Some(oldest) = times.first() {
        assert_eq!(*oldest, first_summary.timestamp_unix_sec);
    }
    assert!(!times.contains(&summary.timestamp_unix_sec));
}

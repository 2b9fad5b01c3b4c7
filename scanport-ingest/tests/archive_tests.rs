//! Archive admission and replay order against a local container

mod helpers;

use helpers::{breadboard_bundle, BundleSpec, Sandbox};
use scanport_ingest::archive::ArchiveManager;
use scanport_ingest::job_log::JobLog;
use scanport_ingest::working_tree::WorkingTree;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn manager(sandbox: &Sandbox) -> ArchiveManager {
    ArchiveManager::new(
        Arc::clone(&sandbox.store),
        sandbox.config.archive_container.clone(),
        sandbox.config.archive_root.clone(),
    )
}

/// TC-ARC-01: Admission copies once
///
/// **Given:** A delivered bundle
/// **When:** It is admitted twice
/// **Then:** The first call archives it, the second reports it as already present
#[tokio::test]
async fn tc_arc_01_admit_is_once_only() {
    let sandbox = Sandbox::new().await;
    let key = sandbox.deliver("983561-27-06-2021-09-52-25.zip", b"zip bytes");
    let archive = manager(&sandbox);
    let log = JobLog::new("job");

    assert!(archive.admit(&sandbox.inbox_name(), &key, &log).await.unwrap());
    assert!(!archive.admit(&sandbox.inbox_name(), &key, &log).await.unwrap());
    assert!(
        sandbox
            .exists(&sandbox.config.archive_container, "Archive/983561-27-06-2021-09-52-25.zip")
            .await
    );
}

/// TC-ARC-02: Bundles replay oldest first, ignoring scans that share the prefix
///
/// **Given:** Two bundles for scan 983561 stored newest-name-first and one for 9835610
/// **When:** The archive is listed for 983561
/// **Then:** Only the two matching bundles come back, in timestamp order
#[tokio::test]
async fn tc_arc_02_list_orders_by_timestamp() {
    let sandbox = Sandbox::new().await;
    let container = sandbox.config.archive_container.clone();
    for name in [
        "Archive/983561-01-07-2021-00-00-00.zip",
        "Archive/983561-30-06-2021-23-59-59.zip",
        "Archive/9835610-01-01-2020-00-00-00.zip",
    ] {
        sandbox.put(&container, name, b"zip").await;
    }

    let listed = manager(&sandbox)
        .list_ordered("983561", &JobLog::new("job"))
        .await
        .unwrap();
    let keys: Vec<&str> = listed.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "Archive/983561-30-06-2021-23-59-59.zip",
            "Archive/983561-01-07-2021-00-00-00.zip",
        ]
    );
}

/// TC-ARC-03: Later bundles overwrite earlier files
///
/// **Given:** Two bundles with different titles in `import.json`
/// **When:** The archive is materialized
/// **Then:** The working tree holds the newer bundle's file and the last
/// timestamp is the newer bundle's
#[tokio::test]
async fn tc_arc_03_materialize_overwrites_in_order() {
    let sandbox = Sandbox::new().await;
    let container = sandbox.config.archive_container.clone();
    let older = BundleSpec {
        title: "older".to_string(),
        ..BundleSpec::default()
    };
    let newer = BundleSpec {
        title: "newer".to_string(),
        ..BundleSpec::default()
    };
    sandbox
        .put(&container, "Archive/983561-02-07-2021-00-00-00.zip", &breadboard_bundle(&newer))
        .await;
    sandbox
        .put(&container, "Archive/983561-01-07-2021-00-00-00.zip", &breadboard_bundle(&older))
        .await;

    let tree = WorkingTree::create(Some(sandbox.dir.path()), "job", false).unwrap();
    let materialized = manager(&sandbox)
        .materialize("983561", &tree, &JobLog::new("job"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(materialized.bundle_count, 2);
    let import = std::fs::read_to_string(tree.unzipped_dir().join("import.json")).unwrap();
    assert!(import.contains("\"newer\""));
    assert!(std::fs::read_dir(tree.download_dir()).unwrap().next().is_none());

    let newest = scanport_ingest::archive::decode_bundle_name("983561-02-07-2021-00-00-00.zip").unwrap();
    assert_eq!(materialized.last_timestamp_unix_sec, Some(newest.timestamp_unix_sec));
}

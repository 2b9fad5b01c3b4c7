//! Format dispatch and converters
//!
//! A converter turns a materialized working tree into a [`ScanModel`]. The
//! [`ConverterRegistry`] picks one by reading the `detector.json` canary at
//! the tree root: `{"detector": "<name>"}`.
//!
//! Converters are synchronous and run on the blocking pool; a panic inside
//! one is reported as [`IngestError::ConverterCrashed`].

pub mod breadboard;
pub mod msa;
pub mod pseudo;

use serde::Deserialize;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::job_log::JobLog;
use crate::models::{PseudoIntensityRange, ScanModel};

pub use breadboard::BreadboardConverter;

pub const DETECTOR_FILE: &str = "detector.json";

pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    /// Must not modify `tree`; the same inputs give the same model. Image
    /// descriptor source paths are relative to `tree`.
    fn convert(
        &self,
        tree: &Path,
        ranges: &[PseudoIntensityRange],
        scan_id: &str,
        log: &JobLog,
    ) -> Result<ScanModel>;
}

#[derive(Debug, Deserialize)]
struct DetectorChoice {
    detector: String,
}

/// How a registry entry matches the canary's detector name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorMatch {
    Exact(String),
    Suffix(String),
}

impl DetectorMatch {
    fn matches(&self, detector: &str) -> bool {
        match self {
            DetectorMatch::Exact(name) => detector == name,
            DetectorMatch::Suffix(suffix) => detector.ends_with(suffix.as_str()),
        }
    }
}

/// Converters keyed by canary content; first match wins
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    entries: Vec<(DetectorMatch, Arc<dyn Converter>)>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in converters
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            DetectorMatch::Suffix("-breadboard".to_string()),
            Arc::new(BreadboardConverter),
        );
        registry
    }

    pub fn register(&mut self, rule: DetectorMatch, converter: Arc<dyn Converter>) {
        self.entries.push((rule, converter));
    }

    pub fn lookup(&self, detector: &str) -> Option<Arc<dyn Converter>> {
        self.entries
            .iter()
            .find(|(rule, _)| rule.matches(detector))
            .map(|(_, c)| Arc::clone(c))
    }

    /// Pick the converter for `tree`
    pub fn select(&self, tree: &Path, log: &JobLog) -> Result<Arc<dyn Converter>> {
        let files = list_relative_files(tree);
        log.info(format!("SelectDataConverter: Path contains {} files...", files.len()));

        match read_detector_choice(tree) {
            Ok(choice) => {
                log.info(format!("Loaded {}...", DETECTOR_FILE));
                if let Some(converter) = self.lookup(&choice.detector) {
                    log.info(format!(
                        "Assuming {} dataset (detector: {})...",
                        converter.name(),
                        choice.detector
                    ));
                    return Ok(converter);
                }
                log.warn(format!("No converter registered for detector: {}", choice.detector));
            }
            Err(e) => log.error(format!(
                "Failed to open detector.json when determining dataset type. Error: {}",
                e
            )),
        }

        let mut listing = String::from("SelectDataConverter path listing:\n");
        for (c, item) in files.iter().enumerate() {
            listing.push_str(&format!("  {}. {}\n", c + 1, item));
        }
        log.info(listing);

        Err(IngestError::UnknownFormat(
            "Failed to determine dataset type to import.".to_string(),
        ))
    }
}

fn read_detector_choice(tree: &Path) -> std::result::Result<DetectorChoice, String> {
    let bytes = std::fs::read(tree.join(DETECTOR_FILE)).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// Sorted file paths under `root`, relative to it
pub fn list_relative_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `converter` on the blocking pool, turning a panic into `ConverterCrashed`
pub async fn run_converter(
    converter: Arc<dyn Converter>,
    tree: PathBuf,
    ranges: Vec<PseudoIntensityRange>,
    scan_id: String,
    log: Arc<JobLog>,
) -> Result<ScanModel> {
    let name = converter.name().to_string();
    let task_log = Arc::clone(&log);

    let handle =
        tokio::task::spawn_blocking(move || converter.convert(&tree, &ranges, &scan_id, &task_log));

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            log.error(format!(
                "Converter {} crashed in job {}: {}",
                name,
                log.job_id(),
                message
            ));
            Err(IngestError::ConverterCrashed(message))
        }
        Err(e) => Err(IngestError::Converter(format!("Converter task failed: {}", e))),
    }
}

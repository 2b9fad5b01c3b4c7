//! Bundle extraction

use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::error::{IngestError, Result};

/// Entries created by macOS archivers; never part of a delivery
const MACOS_METADATA_PREFIX: &str = "__MACOSX";

/// Extract every entry of `zip_path` under `dest`, overwriting existing files.
///
/// Returns the relative names of the files written, in archive order.
/// Blocking; call from `spawn_blocking`.
pub fn unzip_into(zip_path: &Path, dest: &Path) -> Result<Vec<String>> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        IngestError::ZipCorrupt(format!("Failed to open zip {}: {}", zip_path.display(), e))
    })?;

    let mut written = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| {
            IngestError::ZipCorrupt(format!(
                "Failed to read entry {} of {}: {}",
                index,
                zip_path.display(),
                e
            ))
        })?;

        let name = entry.name().to_string();
        if name.starts_with(MACOS_METADATA_PREFIX) {
            continue;
        }
        if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
            return Err(IngestError::ZipTraversalRejected(format!(
                "{}: illegal file path in {}",
                name,
                zip_path.display()
            )));
        }

        let out_path = dest.join(&name);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            IngestError::ZipCorrupt(format!("Failed to extract {} from {}: {}", name, zip_path.display(), e))
        })?;
        written.push(name);
    }

    Ok(written)
}

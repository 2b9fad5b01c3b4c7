//! Per-job working directory
//!
//! `<base>/<job dir>/download` receives raw bundle ZIPs and
//! `<base>/<job dir>/unzipped` holds the merged tree the converter reads.
//! The directory is removed when the value is dropped unless it was marked
//! to be kept.

use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
    download: PathBuf,
    unzipped: PathBuf,
    keep: bool,
}

impl WorkingTree {
    /// Create a fresh, empty tree under `base` (system temp dir when `None`)
    pub fn create(base: Option<&Path>, job_id: &str, keep: bool) -> Result<Self> {
        let base = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let safe_job: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let root = base.join(format!("scanport-{}-{}", safe_job, uuid::Uuid::new_v4().simple()));

        let download = root.join("download");
        let unzipped = root.join("unzipped");
        std::fs::create_dir_all(&download)?;
        std::fs::create_dir_all(&unzipped)?;

        Ok(Self {
            root,
            download,
            unzipped,
            keep,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_dir(&self) -> &Path {
        &self.download
    }

    pub fn unzipped_dir(&self) -> &Path {
        &self.unzipped
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    /// Relative paths of every file under `unzipped/`, sorted
    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = walkdir::WalkDir::new(&self.unzipped)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.unzipped)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }
}

impl Drop for WorkingTree {
    fn drop(&mut self) {
        if self.keep {
            tracing::info!(path = %self.root.display(), "Keeping working directory");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            tracing::warn!(path = %self.root.display(), error = %e, "Failed to remove working directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tree_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let root = {
            let tree = WorkingTree::create(Some(base.path()), "auto-import-01-Jan-2024 00-00-00 (abcd1234)", false).unwrap();
            assert!(tree.download_dir().is_dir());
            assert!(tree.unzipped_dir().is_dir());
            tree.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_kept_tree_survives_drop() {
        let base = TempDir::new().unwrap();
        let root = {
            let tree = WorkingTree::create(Some(base.path()), "job", true).unwrap();
            tree.root().to_path_buf()
        };
        assert!(root.join("unzipped").is_dir());
    }

    #[test]
    fn test_list_files_is_relative_and_sorted() {
        let base = TempDir::new().unwrap();
        let tree = WorkingTree::create(Some(base.path()), "job", false).unwrap();
        std::fs::create_dir_all(tree.unzipped_dir().join("MATCHED")).unwrap();
        std::fs::write(tree.unzipped_dir().join("MATCHED/m.json"), b"{}").unwrap();
        std::fs::write(tree.unzipped_dir().join("detector.json"), b"{}").unwrap();
        assert_eq!(tree.list_files(), vec!["MATCHED/m.json", "detector.json"]);
    }
}

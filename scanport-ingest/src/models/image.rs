//! Stored image records and per-scan beam locations

use serde::{Deserialize, Serialize};

use super::scan::MatchTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSource {
    Instrument,
    Upload,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImagePurpose {
    Viewing,
    Multichannel,
}

/// Image entity, keyed by `name` across the whole platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub name: String,
    pub scan_ids_associated: Vec<String>,
    pub origin_scan_id: Option<String>,
    pub source: ImageSource,
    pub purpose: ImagePurpose,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub match_transform: Option<MatchTransform>,
    /// Key in the datasets container
    pub storage_path: String,
}

impl ImageRecord {
    /// Scan that owns the stored bytes
    pub fn owner_scan_id<'a>(&'a self, importing_scan_id: &'a str) -> &'a str {
        self.origin_scan_id.as_deref().unwrap_or(importing_scan_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageCoord {
    pub i: f32,
    pub j: f32,
}

/// Beam (i,j) for each location of one scan, in scan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBeamSet {
    pub image_name: String,
    pub scan_id: String,
    pub locations: Vec<Option<ImageCoord>>,
}

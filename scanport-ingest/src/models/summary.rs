//! Scan summary document and user overlay metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::scan::{InstrumentKind, SpectraCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTypeKind {
    #[serde(rename = "XRF")]
    Xrf,
    #[serde(rename = "IMAGE")]
    Image,
    #[serde(rename = "RGBU")]
    Rgbu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeCount {
    pub kind: DataTypeKind,
    pub count: u32,
}

/// One per scan, indexed by downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub instrument: InstrumentKind,
    pub instrument_config: String,
    pub metadata: BTreeMap<String, String>,
    pub counts: SpectraCounts,
    pub data_type_counts: Vec<DataTypeCount>,
    #[serde(default)]
    pub default_context_image: String,
    pub timestamp_unix_sec: i64,
    pub complete_timestamp_unix_sec: i64,
    #[serde(default)]
    pub previous_import_times_unix_sec: Vec<i64>,
    pub creator_id: String,
}

impl ScanSummary {
    pub fn data_type_count(&self, kind: DataTypeKind) -> u32 {
        self.data_type_counts
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(|s| s.as_str()).unwrap_or("")
    }
}

/// `<overlayRoot>/<scanId>/custom-meta.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub default_context_image: Option<String>,
}

impl CustomMeta {
    /// Title to apply, ignoring empty and single-space values
    pub fn usable_title(&self) -> Option<&str> {
        match self.title.as_deref() {
            Some(t) if !t.is_empty() && t != " " => Some(t),
            _ => None,
        }
    }
}

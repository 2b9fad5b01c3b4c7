//! In-memory scan model produced by a converter
//!
//! The model is serialized with `bincode` as the published scan binary, so
//! every map is a `BTreeMap` and field order is part of the format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstrumentKind {
    Flight,
    Engineering,
    BenchA,
    BenchB,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Flight => "flight",
            InstrumentKind::Engineering => "engineering",
            InstrumentKind::BenchA => "benchA",
            InstrumentKind::BenchB => "benchB",
        }
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectrumKind {
    Normal,
    Dwell,
    BulkSum,
    MaxValue,
}

/// One detector reading at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Detector label, `A` or `B` for two-detector instruments
    pub detector: String,
    pub kind: SpectrumKind,
    pub counts: Vec<u32>,
    pub live_time_sec: f32,
    pub real_time_sec: f32,
    /// Energy calibration: eV = ev_start + channel * ev_per_channel
    pub ev_start: f32,
    pub ev_per_channel: f32,
}

impl Spectrum {
    pub fn channel_to_kev(&self, channel: usize) -> f32 {
        (self.ev_start + channel as f32 * self.ev_per_channel) / 1000.0
    }
}

/// Beam position for one PMC
///
/// `image_i`/`image_j` are pixel coordinates in the first primary-aligned
/// image; `context_locations[k-1]` holds them for primary image `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamCoord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub image_i: f32,
    pub image_j: f32,
    pub context_locations: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub pmc: i32,
    pub beam: Option<BeamCoord>,
    pub spectra: Vec<Spectrum>,
    pub pseudo_intensities: Option<Vec<f32>>,
    /// Per-location housekeeping values (SCLK, motor positions, voltages)
    pub meta: BTreeMap<String, String>,
}

impl Location {
    pub fn new(pmc: i32) -> Self {
        Self {
            pmc,
            beam: None,
            spectra: Vec::new(),
            pseudo_intensities: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn normal_spectra(&self) -> impl Iterator<Item = &Spectrum> {
        self.spectra.iter().filter(|s| s.kind == SpectrumKind::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageRole {
    /// Pixel frame is the reference for beam (i,j)
    PrimaryAligned,
    /// Carries a transform into a primary image's frame
    MatchedAligned,
    Unaligned,
    Multichannel,
}

/// Affine transform from a primary image's frame into a matched image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTransform {
    pub primary_name: String,
    pub x_offset: f32,
    pub y_offset: f32,
    pub x_scale: f32,
    pub y_scale: f32,
}

impl MatchTransform {
    pub const MAX_OFFSET: f32 = 10000.0;
    pub const MIN_SCALE: f32 = 0.01;
    pub const MAX_SCALE: f32 = 100.0;

    /// Offsets within ±10000 and scales within [0.01, 100]
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.x_offset.abs() > Self::MAX_OFFSET || self.y_offset.abs() > Self::MAX_OFFSET {
            return Err(format!(
                "Matched image offset out of range: ({}, {})",
                self.x_offset, self.y_offset
            ));
        }
        let scale_ok = |s: f32| (Self::MIN_SCALE..=Self::MAX_SCALE).contains(&s);
        if !scale_ok(self.x_scale) || !scale_ok(self.y_scale) {
            return Err(format!(
                "Matched image scale out of range: ({}, {})",
                self.x_scale, self.y_scale
            ));
        }
        Ok(())
    }

    /// Map a primary-frame coordinate into this image, rounding half-up
    pub fn apply(&self, i: f32, j: f32) -> (f32, f32) {
        let mi = (i * self.x_scale - self.x_offset + 0.5).floor();
        let mj = (j * self.y_scale - self.y_offset + 0.5).floor();
        (mi, mj)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// File name as delivered
    pub name: String,
    /// Path of the file relative to the working tree root
    pub source_path: String,
    pub role: ImageRole,
    pub match_transform: Option<MatchTransform>,
    pub size_hint_px: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectraCounts {
    pub normal_spectra: u32,
    pub dwell_spectra: u32,
    pub bulk_spectra: u32,
    pub max_spectra: u32,
    pub pseudo_intensities: u32,
}

impl SpectraCounts {
    /// Count spectra by kind and locations carrying pseudo-intensities
    pub fn tally(locations: &[Location]) -> Self {
        let mut counts = SpectraCounts::default();
        for loc in locations {
            for spectrum in &loc.spectra {
                match spectrum.kind {
                    SpectrumKind::Normal => counts.normal_spectra += 1,
                    SpectrumKind::Dwell => counts.dwell_spectra += 1,
                    SpectrumKind::BulkSum => counts.bulk_spectra += 1,
                    SpectrumKind::MaxValue => counts.max_spectra += 1,
                }
            }
            if loc.pseudo_intensities.as_ref().map(|p| !p.is_empty()).unwrap_or(false) {
                counts.pseudo_intensities += 1;
            }
        }
        counts
    }
}

/// One named channel range from the pseudo-intensity CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PseudoIntensityRange {
    pub name: String,
    pub start_channel: usize,
    pub end_channel: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanModel {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub instrument: InstrumentKind,
    pub instrument_config: String,
    pub metadata: BTreeMap<String, String>,
    pub locations: Vec<Location>,
    pub images: Vec<ImageDescriptor>,
    pub counts: SpectraCounts,
    /// Importing user, empty for automated imports
    pub creator_id: String,
    pub default_context_image: Option<String>,
    pub pseudo_intensity_ranges: Vec<PseudoIntensityRange>,
}

impl ScanModel {
    pub fn new(id: impl Into<String>, instrument: InstrumentKind) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            description: None,
            instrument,
            instrument_config: String::new(),
            metadata: BTreeMap::new(),
            locations: Vec::new(),
            images: Vec::new(),
            counts: SpectraCounts::default(),
            creator_id: String::new(),
            default_context_image: None,
            pseudo_intensity_ranges: Vec::new(),
        }
    }

    /// Primary-aligned images in model order; position is the primary index
    pub fn primary_images(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.images.iter().filter(|i| i.role == ImageRole::PrimaryAligned)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(kind: SpectrumKind) -> Spectrum {
        Spectrum {
            detector: "A".to_string(),
            kind,
            counts: vec![0; 8],
            live_time_sec: 1.0,
            real_time_sec: 1.0,
            ev_start: 0.0,
            ev_per_channel: 10.0,
        }
    }

    #[test]
    fn test_tally_counts_by_kind() {
        let mut a = Location::new(1);
        a.spectra = vec![spectrum(SpectrumKind::Normal), spectrum(SpectrumKind::Normal)];
        a.pseudo_intensities = Some(vec![1.0]);
        let mut b = Location::new(2);
        b.spectra = vec![spectrum(SpectrumKind::BulkSum), spectrum(SpectrumKind::MaxValue)];
        b.pseudo_intensities = Some(vec![]);

        let counts = SpectraCounts::tally(&[a, b]);
        assert_eq!(counts.normal_spectra, 2);
        assert_eq!(counts.bulk_spectra, 1);
        assert_eq!(counts.max_spectra, 1);
        assert_eq!(counts.dwell_spectra, 0);
        assert_eq!(counts.pseudo_intensities, 1);
    }

    #[test]
    fn test_match_transform_rounds_half_up() {
        let t = MatchTransform {
            primary_name: "p.png".to_string(),
            x_offset: 10.0,
            y_offset: 0.25,
            x_scale: 2.0,
            y_scale: 1.0,
        };
        // 5.25*2 - 10 = 0.5 -> 1; 3.0 - 0.25 = 2.75 -> 3
        assert_eq!(t.apply(5.25, 3.0), (1.0, 3.0));
        // 4.2*2 - 10 = -1.6 -> -2
        assert_eq!(t.apply(4.2, 0.75).0, -2.0);
    }

    #[test]
    fn test_match_transform_validation() {
        let mut t = MatchTransform {
            primary_name: "p.png".to_string(),
            x_offset: 0.0,
            y_offset: 0.0,
            x_scale: 1.0,
            y_scale: 1.0,
        };
        assert!(t.validate().is_ok());
        t.x_offset = 10001.0;
        assert!(t.validate().is_err());
        t.x_offset = 0.0;
        t.y_scale = 0.001;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_channel_to_kev() {
        let mut s = spectrum(SpectrumKind::Normal);
        s.ev_start = -20.0;
        s.ev_per_channel = 7.9;
        assert!((s.channel_to_kev(1000) - 7.88).abs() < 1e-4);
    }

    #[test]
    fn test_bincode_is_deterministic() {
        let mut model = ScanModel::new("048300551", InstrumentKind::Flight);
        model.metadata.insert("Sol".to_string(), "0125".to_string());
        model.metadata.insert("RTT".to_string(), "048300551".to_string());
        let a = model.to_bytes().unwrap();
        let b = model.clone().to_bytes().unwrap();
        assert_eq!(a, b);
        assert_eq!(ScanModel::from_bytes(&a).unwrap(), model);
    }
}

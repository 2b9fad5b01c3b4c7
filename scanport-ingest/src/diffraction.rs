//! Diffraction peak scanner
//!
//! Diffraction shows up as a local disagreement between the two detectors of
//! a location: one sees a bump the other does not. For each location with
//! exactly two normal spectra, a window slides over the log-count difference
//! and keeps positions where the difference is both significant and peaked.
//!
//! The result is serialized with `bincode` as the scan's diffraction DB.

use serde::{Deserialize, Serialize};

use crate::models::{ScanModel, Spectrum};

const HALF_RESOLUTION: usize = 15;
const WINDOW: usize = 2 * HALF_RESOLUTION;
const MIN_AVG_COUNT: f64 = 2.0;
const MIN_EFFECT: f64 = 6.0;
const MIN_CHANNEL: usize = 100;
const MAX_CHANNEL: usize = 2000;
const MIN_HEIGHT: f64 = 0.1;
/// Spectra shorter than this are zero-padded before scanning
const FULL_CHANNEL_COUNT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffractionPeak {
    pub pmc: i32,
    pub channel: usize,
    pub kev: f32,
    /// t-statistic of the windowed difference
    pub effect_size: f64,
    pub baseline_variation: f64,
    pub global_difference: f64,
    pub difference_sigma: f64,
    pub peak_height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffractionLocation {
    pub pmc: i32,
    pub peaks: Vec<DiffractionPeak>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffractionDb {
    pub scan_id: String,
    /// Only locations with at least one peak, in model order
    pub locations: Vec<DiffractionLocation>,
}

impl DiffractionDb {
    pub fn peaks(&self) -> impl Iterator<Item = &DiffractionPeak> {
        self.locations.iter().flat_map(|l| l.peaks.iter())
    }

    pub fn peak_count(&self) -> usize {
        self.locations.iter().map(|l| l.peaks.len()).sum()
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Scan every location of `model`; reads only PMCs and spectra
pub fn scan_model(model: &ScanModel) -> DiffractionDb {
    let mut db = DiffractionDb {
        scan_id: model.id.clone(),
        locations: Vec::new(),
    };

    for loc in &model.locations {
        let mut normals: Vec<&Spectrum> = loc.normal_spectra().collect();
        // Dwell and bulk locations have a different spectrum count
        if normals.len() != 2 {
            continue;
        }
        normals.sort_by(|a, b| a.detector.cmp(&b.detector));

        let peaks: Vec<DiffractionPeak> = scan_spectra(&normals[0].counts, &normals[1].counts)
            .into_iter()
            .map(|p| DiffractionPeak {
                pmc: loc.pmc,
                kev: normals[0].channel_to_kev(p.channel),
                ..p
            })
            .collect();

        if !peaks.is_empty() {
            db.locations.push(DiffractionLocation { pmc: loc.pmc, peaks });
        }
    }

    tracing::debug!(scan_id = %model.id, peaks = db.peak_count(), "Diffraction scan complete");
    db
}

fn padded(counts: &[u32]) -> Vec<u32> {
    let mut out = counts.to_vec();
    if out.len() < FULL_CHANNEL_COUNT {
        out.resize(FULL_CHANNEL_COUNT, 0);
    }
    out
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1)
fn std_dev(values: &[f64], mean: f64) -> f64 {
    let sum: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum / (values.len() as f64 - 1.0)).sqrt()
}

/// Peaks between two spectra of one location; `pmc` and `kev` are left zero
fn scan_spectra(a: &[u32], b: &[u32]) -> Vec<DiffractionPeak> {
    let a = padded(a);
    let b = padded(b);
    let channels = a.len().min(b.len());

    let log_a: Vec<f64> = a[..channels].iter().map(|&c| (c as f64).ln_1p()).collect();
    let log_b: Vec<f64> = b[..channels].iter().map(|&c| (c as f64).ln_1p()).collect();

    let all_diffs: Vec<f64> = log_a.iter().zip(&log_b).map(|(x, y)| x - y).collect();
    let norm = mean(&all_diffs);

    let mut candidates = Vec::new();
    for i in MIN_CHANNEL..MAX_CHANNEL.min(channels - WINDOW) {
        let window = i..i + WINDOW;
        let diffs: Vec<f64> = all_diffs[window.clone()].iter().map(|d| d - norm).collect();

        let mean_diff = mean(&diffs);
        let std_diff = std_dev(&diffs, mean_diff);
        let t = (mean_diff / (std_diff / (WINDOW as f64).sqrt())).abs();
        let height = diffs[HALF_RESOLUTION - 1].abs() + diffs[HALF_RESOLUTION].abs()
            - diffs[0].abs()
            - diffs[WINDOW - 1].abs();

        let mean_a = a[window.clone()].iter().map(|&c| c as f64).sum::<f64>() / WINDOW as f64;
        let mean_b = b[window.clone()].iter().map(|&c| c as f64).sum::<f64>() / WINDOW as f64;
        let avg_counts = 0.5 * (mean_a + mean_b);

        // Baseline is the detector that did not see the bump
        let baseline = if mean_a >= mean_b { &log_b[window] } else { &log_a[window] };
        let baseline_mean = mean(baseline);
        let baseline_variation = std_dev(baseline, baseline_mean) / baseline_mean;

        if avg_counts >= MIN_AVG_COUNT && t >= MIN_EFFECT && height >= MIN_HEIGHT {
            candidates.push(DiffractionPeak {
                pmc: 0,
                channel: i + HALF_RESOLUTION,
                kev: 0.0,
                effect_size: t,
                baseline_variation,
                global_difference: norm.abs(),
                difference_sigma: std_diff,
                peak_height: height,
            });
        }
    }

    prune_neighbors(candidates, HALF_RESOLUTION)
}

/// Drop candidates with a stronger neighbor within `boundary` channels, until
/// none remain. Equal neighbors keep the lower channel.
fn prune_neighbors(mut peaks: Vec<DiffractionPeak>, boundary: usize) -> Vec<DiffractionPeak> {
    loop {
        let keep: Vec<bool> = peaks
            .iter()
            .enumerate()
            .map(|(i, p)| {
                !peaks.iter().enumerate().any(|(j, q)| {
                    i != j
                        && p.channel.abs_diff(q.channel) <= boundary
                        && (q.effect_size > p.effect_size || (q.effect_size == p.effect_size && j < i))
                })
            })
            .collect();

        if keep.iter().all(|k| *k) {
            return peaks;
        }
        peaks = peaks
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect();
    }
}

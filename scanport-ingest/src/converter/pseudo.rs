//! Pseudo-intensity ranges
//!
//! The ranges CSV has one `name,start,end` row per element line, optionally
//! preceded by a `Name,StartChannel,EndChannel` header row.

use crate::models::{Location, PseudoIntensityRange};

const HEADER: [&str; 3] = ["Name", "StartChannel", "EndChannel"];

pub fn parse_ranges(text: &str) -> Result<Vec<PseudoIntensityRange>, String> {
    let mut ranges = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if idx == 0 && cols == HEADER {
            continue;
        }
        if cols.len() != 3 {
            return Err(format!(
                "Expected 3 columns in row {} of pseudointensity range file. Got: \"{}\"",
                idx, line
            ));
        }

        let start = cols[1].parse::<usize>().map_err(|_| {
            format!(
                "Failed to read start value from row {} of pseudointensity range file. Got: \"{}\"",
                idx, line
            )
        })?;
        let end = cols[2].parse::<usize>().map_err(|_| {
            format!(
                "Failed to read end value from row {} of pseudointensity range file. Got: \"{}\"",
                idx, line
            )
        })?;
        if end < start {
            return Err(format!("Pseudointensity range {} ends before it starts", cols[0]));
        }

        ranges.push(PseudoIntensityRange {
            name: cols[0].to_string(),
            start_channel: start,
            end_channel: end,
        });
    }

    Ok(ranges)
}

/// Sum of normal-spectrum counts in each range (inclusive), across detectors.
/// `None` when the location has no normal spectra.
pub fn compute_pseudo_intensities(location: &Location, ranges: &[PseudoIntensityRange]) -> Option<Vec<f32>> {
    if ranges.is_empty() {
        return None;
    }
    let spectra: Vec<_> = location.normal_spectra().collect();
    if spectra.is_empty() {
        return None;
    }

    let values = ranges
        .iter()
        .map(|range| {
            spectra
                .iter()
                .map(|s| {
                    let end = (range.end_channel + 1).min(s.counts.len());
                    if range.start_channel >= end {
                        return 0u64;
                    }
                    s.counts[range.start_channel..end].iter().map(|&c| c as u64).sum::<u64>()
                })
                .sum::<u64>() as f32
        })
        .collect();
    Some(values)
}

//! EMSA/MAS spectrum text files
//!
//! ```text
//! #NPOINTS     : 4096
//! #NCOLUMNS    : 2
//! #DATATYPE    : YY
//! #XPERCHAN    : 10.0, 10.0    eV per channel
//! #OFFSET      : 0.0, 0.0      eV of first channel
//! #LIVETIME    : 25.09, 25.08
//! #REALTIME    : 25.11, 25.11
//! #SPECTRUM    :
//! 0, 0
//! 12, 9
//! #ENDOFDATA   :
//! ```
//!
//! One column is a single detector (`#DETECTOR_ID` names it, `A` if absent).
//! Two columns are detectors A and B, with per-detector metadata written as
//! `a, b` pairs.

use std::collections::BTreeMap;

const SPECTRUM_START: &str = "#SPECTRUM";
const END_OF_DATA: &str = "#ENDOFDATA";

/// Metadata fields written once per detector in two-column files
const PER_DETECTOR_FIELDS: [&str; 4] = ["XPERCHAN", "OFFSET", "LIVETIME", "REALTIME"];

/// One detector's spectrum from an MSA file
#[derive(Debug, Clone, PartialEq)]
pub struct MsaSpectrum {
    pub detector: String,
    pub pmc: Option<i32>,
    pub counts: Vec<u32>,
    pub ev_per_channel: f32,
    pub ev_start: f32,
    pub live_time_sec: f32,
    pub real_time_sec: f32,
    pub meta: BTreeMap<String, String>,
}

/// Split `#FIELD : value` into its parts, dropping trailing free-text comments
pub fn parse_meta_line(line: &str) -> Result<(String, String), String> {
    if !line.starts_with('#') {
        return Err(format!("Expected # at start of metadata: {}", line));
    }
    let col = line
        .find(':')
        .ok_or_else(|| format!("Failed to parse metadata line: {}", line))?;

    let field = line[..col].trim().trim_start_matches('#').to_string();
    let raw = &line[col + 1..];

    // "0.0,   0.0    eV of first channel" is a float pair followed by a comment
    let bits: Vec<&str> = raw.split(',').collect();
    if bits.len() >= 2 {
        let first = bits[0].trim();
        let second = bits[1].trim().split(' ').next().unwrap_or("").trim();
        if first.parse::<f32>().is_ok() && second.parse::<f32>().is_ok() {
            return Ok((field, format!("{}, {}", first, second)));
        }
    }

    // Five or more leading spaces means the whole value is a comment
    if raw.len() > 5 && raw.starts_with("     ") {
        return Ok((field, String::new()));
    }
    let mut value = raw.trim_start_matches(' ');
    if let Some(pos) = value.find("  ") {
        if pos > 0 {
            value = &value[..pos];
        }
    }
    Ok((field, value.trim().to_string()))
}

fn parse_row(line: &str, line_no: usize, columns: usize) -> Result<Vec<u32>, String> {
    let items: Vec<&str> = line.split(',').collect();
    if items.len() != columns {
        return Err(format!(
            "Expected {} spectrum columns, got {} on line [{}]:{}",
            columns,
            items.len(),
            line_no,
            line
        ));
    }
    items
        .iter()
        .map(|v| {
            let v = v.trim();
            let n = v
                .parse::<i64>()
                .map_err(|_| format!("Failed to read spectra \"{}\" on line [{}]:{}", v, line_no, line))?;
            u32::try_from(n)
                .map_err(|_| format!("Spectra expected non-negative value \"{}\" on line [{}]:{}", v, line_no, line))
        })
        .collect()
}

fn float_field(meta: &BTreeMap<String, String>, field: &str) -> Result<f32, String> {
    match meta.get(field) {
        Some(v) => v
            .parse::<f32>()
            .map_err(|_| format!("Failed to read float for: {}, got: {}", field, v)),
        None => Ok(0.0),
    }
}

/// Read every detector's spectrum from the text of one MSA file
pub fn read_msa(text: &str) -> Result<Vec<MsaSpectrum>, String> {
    let mut meta: BTreeMap<String, String> = BTreeMap::new();
    let mut rows: Vec<Vec<u32>> = Vec::new();
    let mut columns = 0usize;
    let mut reading = false;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with(SPECTRUM_START) {
            if reading {
                return Err(format!("Unexpected spectrum start marker at {}", line_no));
            }
            reading = true;
            columns = verify_header(&meta)?;
        } else if line.starts_with(END_OF_DATA) {
            if !reading {
                return Err(format!("Unexpected end of data marker at {}", line_no));
            }
            break;
        } else if line.starts_with('#') {
            if reading {
                return Err("Unexpected # after started spectra read".to_string());
            }
            let (field, value) = parse_meta_line(line)?;
            match meta.get_mut(&field) {
                Some(existing) if field == "COMMENT" => {
                    existing.push(' ');
                    existing.push_str(&value);
                }
                Some(_) => return Err(format!("Duplicate meta data lines found for: {}", field)),
                None if !value.is_empty() => {
                    meta.insert(field, value);
                }
                None => {}
            }
        } else {
            if !reading {
                return Err(format!("Unexpected potential spectra found at {}: {}", line_no, line));
            }
            rows.push(parse_row(line, line_no, columns)?);
        }
    }

    if rows.is_empty() {
        return Err("No spectra data found to be read".to_string());
    }

    let npoints_text = meta.get("NPOINTS").cloned().unwrap_or_default();
    let npoints: usize = npoints_text
        .parse()
        .map_err(|_| format!("Failed to read NPOINTS, got: {}", npoints_text))?;
    if rows.len() != npoints {
        return Err(format!("Expected {} spectra, got {}", npoints, rows.len()));
    }

    let pmc = match meta.get("PMC") {
        Some(v) => Some(
            v.parse::<i32>()
                .map_err(|_| format!("Failed to read integer for: PMC, got: {}", v))?,
        ),
        None => None,
    };

    if columns == 1 {
        let detector = meta.get("DETECTOR_ID").cloned().unwrap_or_else(|| "A".to_string());
        return Ok(vec![MsaSpectrum {
            detector,
            pmc,
            counts: rows.into_iter().map(|r| r[0]).collect(),
            ev_per_channel: float_field(&meta, "XPERCHAN")?,
            ev_start: float_field(&meta, "OFFSET")?,
            live_time_sec: float_field(&meta, "LIVETIME")?,
            real_time_sec: float_field(&meta, "REALTIME")?,
            meta,
        }]);
    }

    let mut out = Vec::with_capacity(2);
    for (idx, detector) in ["A", "B"].iter().enumerate() {
        let mut det_meta = BTreeMap::new();
        for (k, v) in &meta {
            if PER_DETECTOR_FIELDS.contains(&k.as_str()) {
                let parts: Vec<&str> = v.split(", ").collect();
                if parts.len() != 2 {
                    return Err("Metadata row cannot be split for 2 detectors due to commas".to_string());
                }
                det_meta.insert(k.clone(), parts[idx].trim().to_string());
            } else {
                det_meta.insert(k.clone(), v.clone());
            }
        }
        det_meta.insert("DETECTOR_ID".to_string(), detector.to_string());

        out.push(MsaSpectrum {
            detector: detector.to_string(),
            pmc,
            counts: rows.iter().map(|r| r[idx]).collect(),
            ev_per_channel: float_field(&det_meta, "XPERCHAN")?,
            ev_start: float_field(&det_meta, "OFFSET")?,
            live_time_sec: float_field(&det_meta, "LIVETIME")?,
            real_time_sec: float_field(&det_meta, "REALTIME")?,
            meta: det_meta,
        });
    }
    Ok(out)
}

/// Check required fields; returns the column count
fn verify_header(meta: &BTreeMap<String, String>) -> Result<usize, String> {
    for field in ["NPOINTS", "DATATYPE", "NCOLUMNS"] {
        if !meta.contains_key(field) {
            return Err(format!("Failed to find {} in metadata", field));
        }
    }
    let ncols = meta.get("NCOLUMNS").map(String::as_str).unwrap_or("");
    let columns: usize = ncols
        .parse()
        .map_err(|_| format!("Failed to read NCOLUMNS, got: {}", ncols))?;

    let (expected_type, allowed) = match columns {
        1 => ("Y", true),
        2 => ("YY", !meta.contains_key("DETECTOR_ID")),
        _ => return Err(format!("Unsupported NCOLUMNS \"{}\" in MSA metadata", columns)),
    };
    if meta.get("DATATYPE").map(String::as_str) != Some(expected_type) {
        return Err(format!("Expected DATATYPE \"{}\" in MSA metadata", expected_type));
    }
    if !allowed {
        return Err("Unexpected DETECTOR_ID in multi-detector MSA".to_string());
    }
    Ok(columns)
}

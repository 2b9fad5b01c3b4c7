//! Instrument text-log tokenizer
//!
//! Turns the free-form instrument log into a lazy sequence of typed records.
//! Lines before the `:: SDF_Peek complete` marker are ignored. After it, each
//! line starts with a `YYYY-DDDTHH:MM:SS : ` timestamp; data lines continue
//! with a right-justified PMC and a category token.
//!
//! Multi-line records (`hk`, `mcc_trn`, `CenSLI_struct`) are read in one step,
//! so an entry's line number is that of its first line.

pub mod parse;

use std::collections::{HashSet, VecDeque};
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use parse::{
    float_after, hex_after, int_after, parse_timestamp, read_float, read_int, read_prefixed_hex, read_rtt,
    take_token, unix_to_sclk,
};

const BLOCK_START_MARKER: &str = ":: SDF_Peek complete";
const GV_SPOT_LIST_MARKER: &str = "Filename token: \"_MCC_SLI_SpotList_BF\"";
const MCC_RAM_DETECTOR_ID: &str = "00384";

const HK_FOLLOW_ON_LINES: usize = 23;
const TRN_FOLLOW_ON_LINES: usize = 7;
const CENTROID_FOLLOW_ON_LINES: usize = 2;

const DUST_COVER_MARKERS: [(&str, DustCoverState); 4] = [
    ("Open the Dust Cover\"", DustCoverState::Opening),
    ("Close the Dust Cover\"", DustCoverState::Closing),
    ("Termination of Cover Open\"", DustCoverState::Opened),
    ("Cover Close termination\"", DustCoverState::Closed),
];

/// Prefixes of data lines that never carry a record
const IGNORED_BODY_PREFIXES: [&str; 6] = ["fpga ", "inv ", "sen ", "LVL ", "... ", "0 "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScienceEvent {
    Begin,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DustCoverState {
    Opening,
    Opened,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detector {
    A,
    B,
    /// Detector word present but neither A nor B selected
    #[serde(rename = "0")]
    Zero,
}

impl Detector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Detector::A => "A",
            Detector::B => "B",
            Detector::Zero => "0",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingVoltages {
    pub sdd2_bias: f32,
    pub sdd1_bias: f32,
    pub arm_resistance: f32,
    pub sdd1_temp: f32,
    pub sdd2_temp: f32,
    pub fvmon: f32,
    pub fimon: f32,
    pub hvmon: f32,
    pub himon: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Housekeeping {
    pub pmc: i32,
    pub frame_count: i32,
    pub hk_time_hex: String,
    pub motor_positions: [i32; 6],
    pub voltages: HousekeepingVoltages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeamLocationSample {
    pub pmc: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub word1: u32,
    pub word2: u32,
    pub word3: u32,
    pub ref_pmc: i32,
    pub mask: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Centroid {
    pub pmc: i32,
    pub detector: Detector,
    pub pixel_x: f32,
    pub pixel_y: f32,
    pub intensity: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub id: u32,
    pub residual: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCounts {
    pub reference: i32,
    pub current: i32,
    pub matches: i32,
}

/// `x y z` plus distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub dist: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformEstimate {
    pub pmc: i32,
    pub ref_id: u32,
    pub flags: u32,
    pub feature_counts: FeatureCounts,
    pub ref_plane: Plane,
    pub current_plane: Plane,
    pub trn_solution: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GvSample {
    pub pmc: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SdfRecord {
    BlockStart,
    /// RTT as upper-case hex
    NewRtt(String),
    Science(ScienceEvent),
    DustCover(DustCoverState),
    SciencePlacement(String),
    Housekeeping(Housekeeping),
    BeamLocation(BeamLocationSample),
    Centroid(Centroid),
    TransformEstimate(TransformEstimate),
    Gv(GvSample),
}

/// One record with the (1-based) line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct SdfEntry {
    pub line: usize,
    /// `None` only for `BlockStart`
    pub sclk: Option<i64>,
    pub record: SdfRecord,
}

/// Lazy record cursor over an instrument log
///
/// Stops for good after the first error.
pub struct SdfTokenizer<R: BufRead> {
    reader: R,
    line_no: usize,
    started: bool,
    finished: bool,
    max_time: i64,
    seen_rtts: HashSet<i64>,
    detector: Option<Detector>,
    in_gv_spot_list: bool,
    pending: VecDeque<SdfEntry>,
}

/// A timestamped line split into its parts
struct TimedLine {
    unix: i64,
    body: String,
}

impl<R: BufRead> SdfTokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            started: false,
            finished: false,
            max_time: i64::MIN,
            seen_rtts: HashSet::new(),
            detector: None,
            in_gv_spot_list: false,
            pending: VecDeque::new(),
        }
    }

    /// Detector selected by the most recent detector word
    pub fn detector(&self) -> Option<Detector> {
        self.detector
    }

    fn syntax(&self, line: usize, message: impl Into<String>, literal: &str) -> IngestError {
        IngestError::TokenizerSyntax {
            line,
            message: message.into(),
            literal: literal.to_string(),
        }
    }

    fn read_raw_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        let text = String::from_utf8_lossy(&buf);
        Ok(Some(text.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// Split off and check the timestamp. `Ok(None)` means the line is noise.
    fn read_timed(&mut self, raw: &str) -> Result<Option<TimedLine>> {
        let (tok, body) = match take_token(raw, " : ") {
            Some(parts) => parts,
            None => return Ok(None),
        };

        // Startup noise and banner lines
        if tok.starts_with("2000-") || tok.starts_with("*** ") {
            return Ok(None);
        }

        let unix = parse_timestamp(tok)
            .map_err(|_| self.syntax(self.line_no, "Expected timestamp at start of line", raw))?;
        if unix < self.max_time {
            return Err(IngestError::NonMonotonicTime {
                line: self.line_no,
                literal: tok.to_string(),
            });
        }
        self.max_time = unix;

        Ok(Some(TimedLine {
            unix,
            body: body.to_string(),
        }))
    }

    fn push(&mut self, line: usize, sclk: Option<i64>, record: SdfRecord) {
        self.pending.push_back(SdfEntry { line, sclk, record });
    }

    fn process_line(&mut self, raw: String) -> Result<()> {
        let line = self.line_no;

        if raw.trim() == BLOCK_START_MARKER {
            if self.started {
                return Err(self.syntax(line, "Found duplicate start", &raw));
            }
            self.started = true;
            self.push(line, None, SdfRecord::BlockStart);
            return Ok(());
        }
        if !self.started || raw.trim().is_empty() {
            return Ok(());
        }

        let timed = match self.read_timed(&raw)? {
            Some(t) => t,
            None => return Ok(()),
        };
        let sclk = Some(unix_to_sclk(timed.unix));

        self.scan_events(line, sclk, &timed.body, &raw)?;
        if let Some(record) = self.scan_data(line, &timed.body, &raw)? {
            self.push(line, sclk, record);
        }
        Ok(())
    }

    /// Free-text events that may appear anywhere after the timestamp
    fn scan_events(&mut self, line: usize, sclk: Option<i64>, body: &str, raw: &str) -> Result<()> {
        if let Some(tok) = parse::find_token(body, " RTT: ", " ") {
            let rtt = read_rtt(tok).map_err(|e| self.syntax(line, e, raw))?;
            if rtt > 0 && self.seen_rtts.insert(rtt) {
                self.push(line, sclk, SdfRecord::NewRtt(format!("{:X}", rtt)));
            }
        }

        if body.contains("\"Science Placement\"") {
            self.push(line, sclk, SdfRecord::Science(ScienceEvent::Begin));
        }
        if body.contains("termination of Science Placement\"") {
            self.push(line, sclk, SdfRecord::Science(ScienceEvent::End));
        }

        for (marker, state) in DUST_COVER_MARKERS {
            if body.contains(marker) {
                self.push(line, sclk, SdfRecord::DustCover(state));
            }
        }

        if let Some(pos) = body.find("Sci_Place: ") {
            let label = body[pos + "Sci_Place: ".len()..].trim().to_string();
            self.push(line, sclk, SdfRecord::SciencePlacement(label));
        }
        Ok(())
    }

    /// `<pmc> <category> <body>` lines. Returns at most one record.
    fn scan_data(&mut self, line: usize, body: &str, raw: &str) -> Result<Option<SdfRecord>> {
        let body = body.trim();
        if IGNORED_BODY_PREFIXES.iter().any(|p| body.starts_with(p)) {
            return Ok(None);
        }

        let (pmc, rest) = match read_int(body) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let (category, rest) = match take_token(rest, " ") {
            Some(v) => v,
            None => return Ok(None),
        };
        let rest = rest.trim();

        if category != "gv" {
            self.in_gv_spot_list = false;
        }

        match category {
            "hk" => self.read_housekeeping(line, pmc, rest, raw).map(|r| Some(SdfRecord::Housekeeping(r))),
            "mcc_trn" => self
                .read_transform(line, pmc, rest, raw)
                .map(|r| Some(SdfRecord::TransformEstimate(r))),
            "CenSLI_struct" => self.read_centroid(line, pmc, rest, raw),
            "mcc_ram" => {
                self.read_detector(line, rest, raw)?;
                Ok(None)
            }
            "gv" => self.read_gv(line, pmc, rest, raw),
            "scanlog" => read_beam_location(pmc, rest)
                .map(|r| Some(SdfRecord::BeamLocation(r)))
                .map_err(|e| self.syntax(line, e, raw)),
            _ => Ok(None),
        }
    }

    /// Read `count` lines that must repeat `pmc` and `category`; returns their bodies
    fn read_follow_on(&mut self, first_line: usize, pmc: i32, category: &str, count: usize) -> Result<Vec<String>> {
        let mut bodies = Vec::with_capacity(count);
        while bodies.len() < count {
            let raw = match self.read_raw_line()? {
                Some(raw) => raw,
                None => {
                    return Err(self.syntax(
                        self.line_no,
                        format!(
                            "Failed while reading ahead {} lines (from line {})",
                            count, first_line
                        ),
                        "",
                    ))
                }
            };

            let timed = self
                .read_timed(&raw)?
                .ok_or_else(|| self.syntax(self.line_no, "Expected timestamp at start of line", &raw))?;

            let body = timed.body.trim();
            let matches = read_int(body)
                .ok()
                .filter(|(p, _)| *p == pmc)
                .and_then(|(_, rest)| take_token(rest, " "))
                .filter(|(cat, _)| *cat == category);

            match matches {
                Some((_, rest)) => bodies.push(rest.trim().to_string()),
                None => {
                    return Err(self.syntax(
                        self.line_no,
                        format!("Expected {} {} line", pmc, category),
                        &raw,
                    ))
                }
            }
        }
        Ok(bodies)
    }

    fn read_housekeeping(&mut self, line: usize, pmc: i32, first: &str, raw: &str) -> Result<Housekeeping> {
        let (hk_time, _) = hex_after(first, "HK Time: 0x", " ").map_err(|e| self.syntax(line, e, raw))?;
        if hk_time == 0 {
            return Err(self.syntax(line, "hk start didn't contain hk time", raw));
        }
        let (frame_count, _) = int_after(first, "fcnt:", " ").map_err(|e| self.syntax(line, e, raw))?;

        let lines = self.read_follow_on(line, pmc, "hk", HK_FOLLOW_ON_LINES)?;
        let hk = parse_housekeeping_lines(pmc, frame_count, hk_time, &lines).map_err(|e| self.syntax(line, e, raw))?;
        Ok(hk)
    }

    fn read_transform(&mut self, line: usize, pmc: i32, first: &str, raw: &str) -> Result<TransformEstimate> {
        if !first.contains("---> Flags: ") {
            return Err(self.syntax(line, "mcc_trn start line missing flags", raw));
        }
        let (ref_id, rest) = hex_after(first, "Reference: 0x", " ").map_err(|e| self.syntax(line, e, raw))?;
        let (flags, _) = hex_after(rest, "---> Flags: 0x", " ").map_err(|e| self.syntax(line, e, raw))?;

        let lines = self.read_follow_on(line, pmc, "mcc_trn", TRN_FOLLOW_ON_LINES)?;
        parse_transform_lines(pmc, ref_id, flags, &lines).map_err(|e| self.syntax(line, e, raw))
    }

    fn read_centroid(&mut self, line: usize, pmc: i32, first: &str, raw: &str) -> Result<Option<SdfRecord>> {
        let lines = self.read_follow_on(line, pmc, "CenSLI_struct", CENTROID_FOLLOW_ON_LINES)?;

        let detector = match self.detector {
            Some(d) => d,
            None => {
                tracing::warn!(line, pmc, "Dropping centroid seen before any detector word");
                return Ok(None);
            }
        };

        parse_centroid_lines(pmc, detector, first, &lines)
            .map(|c| Some(SdfRecord::Centroid(c)))
            .map_err(|e| self.syntax(line, e, raw))
    }

    /// `00384 : <8 words>`; the 5th word selects the detector
    fn read_detector(&mut self, line: usize, body: &str, raw: &str) -> Result<()> {
        let (id, words) = match take_token(body, ":") {
            Some(v) => v,
            None => return Ok(()),
        };
        if id.trim() != MCC_RAM_DETECTOR_ID {
            return Ok(());
        }

        let mut parts = Vec::with_capacity(8);
        for word in words.split(' ').filter(|w| !w.is_empty()) {
            if word.len() != 8 {
                return Err(self.syntax(line, format!("Read invalid word: {}", word), raw));
            }
            parts.push(word);
        }
        if parts.len() != 8 {
            return Err(self.syntax(line, "Failed to read detector config", raw));
        }

        self.detector = Some(match parts[4].get(4..6) {
            Some("00") => Detector::Zero,
            Some("25") => Detector::A,
            Some("2A") => Detector::B,
            _ => return Err(self.syntax(line, format!("Invalid detector: {}", parts[4]), raw)),
        });
        Ok(())
    }

    fn read_gv(&mut self, line: usize, pmc: i32, body: &str, raw: &str) -> Result<Option<SdfRecord>> {
        if !self.in_gv_spot_list {
            if body.ends_with(GV_SPOT_LIST_MARKER) {
                self.in_gv_spot_list = true;
            }
            return Ok(None);
        }

        let parsed = (|| -> std::result::Result<GvSample, String> {
            let (x, rest) = read_float(body)?;
            let (y, rest) = read_float(rest)?;
            let (z, _) = read_float(rest)?;
            Ok(GvSample { pmc, x, y, z })
        })();
        parsed.map(|g| Some(SdfRecord::Gv(g))).map_err(|e| self.syntax(line, e, raw))
    }
}

impl<R: BufRead> Iterator for SdfTokenizer<R> {
    type Item = Result<SdfEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            if self.finished {
                return None;
            }

            let step = match self.read_raw_line() {
                Ok(Some(raw)) => self.process_line(raw),
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => Err(e),
            };

            if let Err(e) = step {
                self.finished = true;
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

fn parse_housekeeping_lines(
    pmc: i32,
    frame_count: i32,
    hk_time: u32,
    lines: &[String],
) -> std::result::Result<Housekeeping, String> {
    let (label, mut rest) = take_token(&lines[15], ":").ok_or("Failed to read motor positions")?;
    if label != "Motor Pos" {
        return Err(format!("Expected Motor Pos, got: {}", label));
    }
    let mut motor_positions = [0i32; 6];
    for pos in motor_positions.iter_mut() {
        let (v, r) = read_int(rest)?;
        *pos = v;
        rest = r;
    }

    let float = |idx: usize, name: &str| -> std::result::Result<f32, String> {
        float_after(&lines[idx], name, " ").map(|(v, _)| v)
    };

    let voltages = HousekeepingVoltages {
        sdd2_bias: float(2, "SDD2 Bias:")?,
        sdd1_bias: float(3, "SDD1 Bias:")?,
        arm_resistance: float(4, "Arm Resistance:")?,
        sdd1_temp: float(5, "SDD 1 Tmp:")?,
        sdd2_temp: float(6, "SDD 2 Tmp:")?,
        fvmon: float(11, "FVMON:")?,
        fimon: float(12, "FIMON:")?,
        hvmon: float(13, "HVMON:")?,
        himon: float(14, "HIMON:")?,
    };

    Ok(Housekeeping {
        pmc,
        frame_count,
        hk_time_hex: format!("{:X}", hk_time),
        motor_positions,
        voltages,
    })
}

fn read_plane(line: &str, label: &str, with_dist: bool) -> std::result::Result<Plane, String> {
    let (tok, rest) = take_token(line, ":").ok_or_else(|| format!("Failed to read {}", label))?;
    if tok != label {
        return Err(format!("Expected {}, got: {}", label, tok));
    }
    let (x, rest) = read_float(rest)?;
    let (y, rest) = read_float(rest)?;
    let (z, rest) = read_float(rest)?;
    let mut plane = Plane { x, y, z, dist: 0.0 };

    if with_dist {
        let (tok, rest) = take_token(rest, ":").ok_or("Failed to read Dist")?;
        if tok.trim() != "Dist" {
            return Err(format!("Expected Dist, got: {}", tok));
        }
        plane.dist = read_float(rest)?.0;
    }
    Ok(plane)
}

fn parse_transform_lines(
    pmc: i32,
    ref_id: u32,
    flags: u32,
    lines: &[String],
) -> std::result::Result<TransformEstimate, String> {
    let (reference, rest) = int_after(&lines[0], "Reference: ", " ")?;
    let (current, rest) = int_after(rest, "Current: ", " ")?;
    let (matches, _) = int_after(rest, "Matches: ", " ")?;

    let mut ref_plane = read_plane(&lines[1], "Reference Plane", true)?;
    let mut current_plane = read_plane(&lines[2], "Current Plane", true)?;
    let solution = read_plane(&lines[3], "TRN Solution", false)?;

    // Planes are logged offset by 2 along X
    if ref_plane.x > 0.0 {
        ref_plane.x -= 2.0;
    }
    if 2.0 - current_plane.x < 0.1 {
        current_plane.x -= 2.0;
    }

    Ok(TransformEstimate {
        pmc,
        ref_id,
        flags,
        feature_counts: FeatureCounts {
            reference,
            current,
            matches,
        },
        ref_plane,
        current_plane,
        trn_solution: [solution.x, solution.y, solution.z],
    })
}

/// `<n> -- pixel x,y,intensity: [..] [..] [0xHHHH] | <x> <y>`, then two lines
/// tagged with the same `<n>`: `| <x> <y> <z>` and `ID: 0x.., Residual: 0x..`
fn parse_centroid_lines(
    pmc: i32,
    detector: Detector,
    first: &str,
    lines: &[String],
) -> std::result::Result<Centroid, String> {
    let (sli_num, rest) = read_int(first)?;
    let pos = rest
        .find("-- pixel x,y,intensity: ")
        .ok_or("Failed to find centroid pixel data")?;
    let rest = &rest[pos + "-- pixel x,y,intensity: ".len()..];

    let (_, rest) = take_token(rest, " ").ok_or("Failed to read centroid pixel data")?;
    let (_, rest) = take_token(rest, " ").ok_or("Failed to read centroid pixel data")?;
    let (intensity_tok, rest) = take_token(rest, " ").ok_or("Failed to read centroid intensity")?;
    let intensity_hex = intensity_tok
        .strip_prefix("[0x")
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("Failed to read centroid intensity: {}", intensity_tok))?;
    let intensity =
        u32::from_str_radix(intensity_hex, 16).map_err(|e| format!("Failed to read centroid intensity: {}", e))?;

    let (bar, rest) = take_token(rest, " ").ok_or("Expected | in centroid line")?;
    if bar != "|" {
        return Err(format!("Expected | in centroid line, got: {}", bar));
    }
    let (pixel_x, rest) = read_float(rest)?;
    let (pixel_y, _) = read_float(rest)?;

    let mut follow = Vec::with_capacity(2);
    for line in lines {
        let (n, rest) = read_int(line)?;
        if n != sli_num {
            return Err(format!("Centroid number mismatch: {} vs {}", n, sli_num));
        }
        follow.push(rest);
    }

    let xyz = follow[0]
        .find('|')
        .map(|p| &follow[0][p + 1..])
        .ok_or("Expected | in centroid position line")?;
    let (x, rest) = read_float(xyz)?;
    let (y, rest) = read_float(rest)?;
    let (z, _) = read_float(rest)?;

    let (id, _) = hex_after(follow[1], "ID: 0x", ",")?;
    let (residual, _) = hex_after(follow[1], "Residual: 0x", " ")?;

    Ok(Centroid {
        pmc,
        detector,
        pixel_x,
        pixel_y,
        intensity,
        x,
        y,
        z,
        id,
        residual: residual as f32 / 10.0,
    })
}

/// `<x> <y> <z> 0x<w1> 0x<w2> 0x<w3> <refPmc> 0x<mask>`
fn read_beam_location(pmc: i32, body: &str) -> std::result::Result<BeamLocationSample, String> {
    let (x, rest) = read_float(body)?;
    let (y, rest) = read_float(rest)?;
    let (z, rest) = read_float(rest)?;
    let (word1, rest) = read_prefixed_hex(rest)?;
    let (word2, rest) = read_prefixed_hex(rest)?;
    let (word3, rest) = read_prefixed_hex(rest)?;
    let (ref_pmc, rest) = read_int(rest)?;
    let (mask, _) = read_prefixed_hex(rest)?;
    Ok(BeamLocationSample {
        pmc,
        x,
        y,
        z,
        word1,
        word2,
        word3,
        ref_pmc,
        mask,
    })
}

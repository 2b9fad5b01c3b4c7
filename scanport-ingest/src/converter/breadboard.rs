//! Lab bench ("breadboard") datasets
//!
//! Layout under the working tree:
//! - `import.json` (optional) with title, target, site, group and directory names
//! - `<msaDir>/*.msa`, one file per PMC
//! - `<beamFile>`: `PMC,x,y,z,image_i,image_j[,image_i,image_j]...`
//! - `<contextImgDir>/*_<PMC>.<ext>` context images
//! - `MATCHED/*.json` matched-image descriptors next to the images they name
//! - `UNALIGNED/*` images with no beam alignment
//! - `<instrumentLog>` instrument text log, for per-PMC housekeeping

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::Path;

use super::msa::{read_msa, MsaSpectrum};
use super::pseudo::compute_pseudo_intensities;
use super::Converter;
use crate::error::{IngestError, Result};
use crate::job_log::JobLog;
use crate::models::{
    BeamCoord, ImageDescriptor, ImageRole, InstrumentKind, Location, MatchTransform, PseudoIntensityRange, ScanModel,
    SpectraCounts, Spectrum, SpectrumKind,
};
use crate::sdf::{SdfRecord, SdfTokenizer};

const IMPORT_PARAMS_FILE: &str = "import.json";
const MATCHED_DIR: &str = "MATCHED";
const UNALIGNED_DIR: &str = "UNALIGNED";
const JPL_GROUP: &str = "JPL Breadboard";
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "tif", "tiff", "img", "unc"];

fn default_detector_config() -> String {
    "Breadboard".to_string()
}

fn default_msa_dir() -> String {
    "spectra".to_string()
}

fn default_true() -> bool {
    true
}

fn default_group() -> String {
    JPL_GROUP.to_string()
}

fn default_target_id() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportParams {
    #[serde(default, rename = "datasetId")]
    dataset_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    site: String,
    #[serde(default = "default_target_id")]
    target_id: String,
    #[serde(default)]
    site_id: i32,
    #[serde(default)]
    drive_id: i32,
    #[serde(default)]
    sol: String,
    #[serde(default = "default_group")]
    group: String,
    #[serde(default = "default_detector_config")]
    detector_config: String,
    #[serde(default)]
    creator_user_id: String,
    #[serde(default = "default_msa_dir")]
    msa_dir: String,
    #[serde(default)]
    context_img_dir: String,
    #[serde(default)]
    beam_file: String,
    #[serde(default = "default_true")]
    gen_bulk_max: bool,
    #[serde(default)]
    instrument_log: String,
}

impl Default for ImportParams {
    fn default() -> Self {
        Self {
            dataset_id: String::new(),
            title: String::new(),
            target: String::new(),
            site: String::new(),
            target_id: default_target_id(),
            site_id: 0,
            drive_id: 0,
            sol: String::new(),
            group: default_group(),
            detector_config: default_detector_config(),
            creator_user_id: String::new(),
            msa_dir: default_msa_dir(),
            context_img_dir: String::new(),
            beam_file: String::new(),
            gen_bulk_max: true,
            instrument_log: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MatchedImageMeta {
    #[serde(rename = "aligned-beam-pmc")]
    aligned_beam_pmc: i32,
    #[serde(rename = "matched-image")]
    matched_image: String,
    #[serde(rename = "x-offset")]
    x_offset: f32,
    #[serde(rename = "y-offset")]
    y_offset: f32,
    #[serde(rename = "x-scale")]
    x_scale: f32,
    #[serde(rename = "y-scale")]
    y_scale: f32,
}

pub struct BreadboardConverter;

impl Converter for BreadboardConverter {
    fn name(&self) -> &str {
        "breadboard"
    }

    fn convert(
        &self,
        tree: &Path,
        ranges: &[PseudoIntensityRange],
        scan_id: &str,
        log: &JobLog,
    ) -> Result<ScanModel> {
        let params = read_params(tree, scan_id, log)?;

        let context_images = if params.context_img_dir.is_empty() {
            Vec::new()
        } else {
            list_context_images(&tree.join(&params.context_img_dir))?
        };

        let beams = if params.beam_file.is_empty() {
            BTreeMap::new()
        } else {
            log.info(format!("  Reading Beam Locations: \"{}\"", params.beam_file));
            read_beam_file(&tree.join(&params.beam_file)).map_err(IngestError::Converter)?
        };

        let mut spectra = read_spectra_dir(&tree.join(&params.msa_dir), log)?;
        if params.gen_bulk_max {
            add_bulk_max(&mut spectra);
        }

        let mut locations: BTreeMap<i32, Location> = BTreeMap::new();
        for (pmc, list) in spectra {
            locations.entry(pmc).or_insert_with(|| Location::new(pmc)).spectra = list;
        }
        for (pmc, beam) in &beams {
            locations.entry(*pmc).or_insert_with(|| Location::new(*pmc)).beam = Some(beam.clone());
        }

        let mut model_meta = scan_metadata(&params, scan_id);
        if !params.instrument_log.is_empty() {
            log.info(format!("  Reading instrument log: {}", params.instrument_log));
            apply_instrument_log(&tree.join(&params.instrument_log), &mut locations, &mut model_meta)?;
        }

        let instrument = if params.group == JPL_GROUP {
            InstrumentKind::BenchA
        } else {
            InstrumentKind::BenchB
        };

        let mut model = ScanModel::new(scan_id, instrument);
        if !params.title.is_empty() {
            model.title = params.title.clone();
        }
        model.instrument_config = params.detector_config.clone();
        model.creator_id = params.creator_user_id.clone();
        model.pseudo_intensity_ranges = ranges.to_vec();

        model.metadata = model_meta;

        model.locations = locations.into_values().collect();
        for loc in model.locations.iter_mut() {
            loc.pseudo_intensities = compute_pseudo_intensities(loc, ranges);
        }
        model.counts = SpectraCounts::tally(&model.locations);

        for (_, name) in &context_images {
            model.images.push(ImageDescriptor {
                name: name.clone(),
                source_path: format!("{}/{}", params.context_img_dir, name),
                role: ImageRole::PrimaryAligned,
                match_transform: None,
                size_hint_px: None,
            });
        }
        model.default_context_image = context_images.first().map(|(_, name)| name.clone());

        model
            .images
            .extend(read_matched_images(tree, &beams, &context_images, log)?);
        model.images.extend(list_unaligned_images(tree)?);

        log.info(format!(
            "Breadboard import read {} locations, {} images",
            model.locations.len(),
            model.images.len()
        ));

        Ok(model)
    }
}

fn read_params(tree: &Path, scan_id: &str, log: &JobLog) -> Result<ImportParams> {
    let path = tree.join(IMPORT_PARAMS_FILE);
    if !path.exists() {
        log.info("Warning: No import.json found, defaults will be used");
        return Ok(ImportParams::default());
    }

    let bytes = fs::read(&path)?;
    let params: ImportParams = serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::Converter(format!("Failed to read {}: {}", IMPORT_PARAMS_FILE, e)))?;

    if !params.dataset_id.is_empty() && params.dataset_id != scan_id {
        return Err(IngestError::Converter(format!(
            "Expected dataset ID {}, read {}",
            scan_id, params.dataset_id
        )));
    }
    if params.group.is_empty() {
        return Err(IngestError::Converter(
            "Import parameter file did not specify a Group".to_string(),
        ));
    }
    Ok(params)
}

fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// PMC from the last `_`-separated number of a file name, if any
fn pmc_from_file_name(name: &str) -> Option<i32> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    stem.rsplit('_').next()?.parse().ok()
}

/// Sorted file names directly inside `dir`
fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Context images ordered by PMC; a name without a PMC counts as PMC 1
fn list_context_images(dir: &Path) -> Result<Vec<(i32, String)>> {
    let mut images: Vec<(i32, String)> = list_file_names(dir)?
        .into_iter()
        .filter(|n| is_image_file(n))
        .map(|n| (pmc_from_file_name(&n).unwrap_or(1), n))
        .collect();
    images.sort();
    Ok(images)
}

/// `PMC,x,y,z,image_i,image_j` plus optional `i,j` pairs for later context images
fn read_beam_file(path: &Path) -> std::result::Result<BTreeMap<i32, BeamCoord>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read beam file {}: {}", path.display(), e))?;
    let mut beams = BTreeMap::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || (idx == 0 && line.starts_with("PMC")) {
            continue;
        }
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() < 6 || cols.len() % 2 != 0 {
            return Err(format!("Unexpected column count in beam file row {}: {}", idx, line));
        }

        let pmc = cols[0]
            .parse::<i32>()
            .map_err(|_| format!("Failed to read PMC in beam file row {}: {}", idx, line))?;
        let floats = cols[1..]
            .iter()
            .map(|c| c.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|_| format!("Failed to read value in beam file row {}: {}", idx, line))?;

        let context_locations = floats[5..].chunks(2).map(|p| (p[0], p[1])).collect();
        beams.insert(
            pmc,
            BeamCoord {
                x: floats[0],
                y: floats[1],
                z: floats[2],
                image_i: floats[3],
                image_j: floats[4],
                context_locations,
            },
        );
    }
    Ok(beams)
}

fn read_kind(file_name: &str) -> SpectrumKind {
    match file_name.split('_').next() {
        Some("BulkSum") => SpectrumKind::BulkSum,
        Some("MaxValue") => SpectrumKind::MaxValue,
        Some("Dwell") => SpectrumKind::Dwell,
        _ => SpectrumKind::Normal,
    }
}

fn to_spectrum(msa: MsaSpectrum, kind: SpectrumKind) -> Spectrum {
    Spectrum {
        detector: msa.detector,
        kind,
        counts: msa.counts,
        live_time_sec: msa.live_time_sec,
        real_time_sec: msa.real_time_sec,
        ev_start: msa.ev_start,
        ev_per_channel: msa.ev_per_channel,
    }
}

/// Spectra per PMC. The PMC comes from `#PMC`, else the file name, else the
/// file's position in sorted order.
fn read_spectra_dir(dir: &Path, log: &JobLog) -> Result<BTreeMap<i32, Vec<Spectrum>>> {
    let all = list_file_names(dir)?;
    let files: Vec<&String> = all.iter().filter(|n| n.to_ascii_lowercase().ends_with(".msa")).collect();
    log.info(format!("  Reading {} files from spectrum directory...", all.len()));

    let mut by_pmc: BTreeMap<i32, Vec<Spectrum>> = BTreeMap::new();
    for (idx, name) in files.iter().enumerate() {
        let path = dir.join(name.as_str());
        let text = fs::read_to_string(&path)?;
        let parsed = read_msa(&text)
            .map_err(|e| IngestError::Converter(format!("Error in {}: {}", path.display(), e)))?;

        let kind = read_kind(name);
        for msa in parsed {
            let pmc = msa
                .pmc
                .or_else(|| pmc_from_file_name(name))
                .unwrap_or(idx as i32 + 1);
            by_pmc.entry(pmc).or_default().push(to_spectrum(msa, kind));
        }
    }

    log.info(format!("  Found {} usable spectrum files...", files.len()));
    Ok(by_pmc)
}

/// Append one bulk-sum and one max-value spectrum per detector, at the PMC
/// after the highest one read
fn add_bulk_max(spectra: &mut BTreeMap<i32, Vec<Spectrum>>) {
    let next_pmc = match spectra.keys().next_back() {
        Some(max) => max + 1,
        None => return,
    };

    let mut generated = Vec::new();
    for detector in ["A", "B"] {
        let normals: Vec<&Spectrum> = spectra
            .values()
            .flatten()
            .filter(|s| s.kind == SpectrumKind::Normal && s.detector == detector)
            .collect();
        if normals.is_empty() {
            continue;
        }

        let channels = normals.iter().map(|s| s.counts.len()).max().unwrap_or(0);
        let mut bulk = vec![0u32; channels];
        let mut max = vec![0u32; channels];
        for s in &normals {
            for (ch, &c) in s.counts.iter().enumerate() {
                bulk[ch] = bulk[ch].saturating_add(c);
                max[ch] = max[ch].max(c);
            }
        }

        let n = normals.len() as f32;
        let ev_per_channel = normals.iter().map(|s| s.ev_per_channel).sum::<f32>() / n;
        let ev_start = normals.iter().map(|s| s.ev_start).sum::<f32>() / n;
        let live: f32 = normals.iter().map(|s| s.live_time_sec).sum();
        let real: f32 = normals.iter().map(|s| s.real_time_sec).sum();

        for (kind, counts) in [(SpectrumKind::BulkSum, bulk), (SpectrumKind::MaxValue, max)] {
            generated.push(Spectrum {
                detector: detector.to_string(),
                kind,
                counts,
                live_time_sec: live,
                real_time_sec: real,
                ev_start,
                ev_per_channel,
            });
        }
    }

    if !generated.is_empty() {
        spectra.insert(next_pmc, generated);
    }
}

/// Scan-level metadata keys every breadboard scan carries. The RTT is the
/// scan id; the instrument log may later supply SCLK.
fn scan_metadata(params: &ImportParams, scan_id: &str) -> BTreeMap<String, String> {
    let title = if params.title.is_empty() { scan_id } else { params.title.as_str() };
    [
        ("RTT", scan_id.to_string()),
        ("SCLK", "0".to_string()),
        ("Sol", params.sol.clone()),
        ("DriveId", params.drive_id.to_string()),
        ("SiteId", params.site_id.to_string()),
        ("Site", params.site.clone()),
        ("Target", params.target.clone()),
        ("TargetId", params.target_id.clone()),
        ("Title", title.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Attach housekeeping from the instrument log to locations. The clock at
/// the first RTT announcement becomes the scan SCLK.
fn apply_instrument_log(
    path: &Path,
    locations: &mut BTreeMap<i32, Location>,
    model_meta: &mut BTreeMap<String, String>,
) -> Result<()> {
    let file = fs::File::open(path)?;
    let mut rtt_seen = false;
    for entry in SdfTokenizer::new(BufReader::new(file)) {
        let entry = entry?;
        match entry.record {
            SdfRecord::NewRtt(_) if !rtt_seen => {
                rtt_seen = true;
                if let Some(sclk) = entry.sclk {
                    model_meta.insert("SCLK".to_string(), sclk.to_string());
                }
            }
            SdfRecord::Housekeeping(hk) => {
                // Later frames for the same PMC replace earlier ones
                if let Some(loc) = locations.get_mut(&hk.pmc) {
                    let v = &hk.voltages;
                    let meta = &mut loc.meta;
                    if let Some(sclk) = entry.sclk {
                        meta.insert("SCLK".to_string(), sclk.to_string());
                    }
                    meta.insert("HK_TIME".to_string(), hk.hk_time_hex.clone());
                    meta.insert("FCNT".to_string(), hk.frame_count.to_string());
                    meta.insert(
                        "MOTOR_POS".to_string(),
                        hk.motor_positions
                            .iter()
                            .map(|p| p.to_string())
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                    for (key, value) in [
                        ("SDD1_BIAS", v.sdd1_bias),
                        ("SDD2_BIAS", v.sdd2_bias),
                        ("SDD1_TMP", v.sdd1_temp),
                        ("SDD2_TMP", v.sdd2_temp),
                        ("ARM_RESISTANCE", v.arm_resistance),
                        ("FVMON", v.fvmon),
                        ("FIMON", v.fimon),
                        ("HVMON", v.hvmon),
                        ("HIMON", v.himon),
                    ] {
                        meta.insert(key.to_string(), value.to_string());
                    }
                }
            }
            SdfRecord::SciencePlacement(label) => {
                model_meta.insert("SciPlace".to_string(), label);
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_matched_images(
    tree: &Path,
    beams: &BTreeMap<i32, BeamCoord>,
    context_images: &[(i32, String)],
    log: &JobLog,
) -> Result<Vec<ImageDescriptor>> {
    let dir = tree.join(MATCHED_DIR);
    if !dir.is_dir() {
        log.info("readMatchedImages: directory not found, SKIPPING");
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for json_name in list_file_names(&dir)? {
        if !json_name.to_ascii_lowercase().ends_with(".json") {
            continue;
        }
        let json_path = dir.join(&json_name);
        let meta: MatchedImageMeta = serde_json::from_slice(&fs::read(&json_path)?)
            .map_err(|e| IngestError::Converter(format!("Failed to read {}: {}", json_path.display(), e)))?;

        // No beams at all is a dataset without spatial data; skip the check
        if !beams.is_empty() && !beams.contains_key(&meta.aligned_beam_pmc) {
            return Err(IngestError::Converter(format!(
                "Matched image {} references beam locations for PMC which cannot be found: {}",
                json_path.display(),
                meta.aligned_beam_pmc
            )));
        }
        if !dir.join(&meta.matched_image).is_file() {
            return Err(IngestError::Converter(format!(
                "Matched image {} references image which cannot be found: {}",
                json_path.display(),
                meta.matched_image
            )));
        }

        let primary_name = context_images
            .iter()
            .find(|(pmc, _)| *pmc == meta.aligned_beam_pmc)
            .map(|(_, name)| name.clone())
            .unwrap_or_default();

        let transform = MatchTransform {
            primary_name,
            x_offset: meta.x_offset,
            y_offset: meta.y_offset,
            x_scale: meta.x_scale,
            y_scale: meta.y_scale,
        };
        transform
            .validate()
            .map_err(|e| IngestError::Converter(format!("{}: {}", json_path.display(), e)))?;

        out.push(ImageDescriptor {
            name: meta.matched_image.clone(),
            source_path: format!("{}/{}", MATCHED_DIR, meta.matched_image),
            role: ImageRole::MatchedAligned,
            match_transform: Some(transform),
            size_hint_px: None,
        });
    }
    Ok(out)
}

fn list_unaligned_images(tree: &Path) -> Result<Vec<ImageDescriptor>> {
    Ok(list_file_names(&tree.join(UNALIGNED_DIR))?
        .into_iter()
        .filter(|n| is_image_file(n))
        .map(|name| ImageDescriptor {
            source_path: format!("{}/{}", UNALIGNED_DIR, name),
            name,
            role: ImageRole::Unaligned,
            match_transform: None,
            size_hint_px: None,
        })
        .collect())
}

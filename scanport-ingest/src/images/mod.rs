//! Image extraction
//!
//! Turns the image descriptors of a scan model into storable records: reads
//! dimensions, converts `.img` and `.unc` sources to PNG, classifies each
//! image and computes beam positions for aligned images. Nothing is written
//! here; the publisher persists the result.

pub mod beams;
pub mod instrument_name;
pub mod unc;
pub mod vicar;

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::job_log::JobLog;
use crate::models::{
    DataTypeCount, DataTypeKind, ImageBeamSet, ImageDescriptor, ImagePurpose, ImageRecord, ImageRole, ImageSource,
    ScanModel,
};

pub use instrument_name::InstrumentFileName;

/// 8-bit RGBA pixels
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let buffer = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| IngestError::ImageDecode("Pixel buffer does not match image size".to_string()))?;
        let mut out = Cursor::new(Vec::new());
        buffer
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| IngestError::ImageDecode(format!("Failed to encode PNG: {}", e)))?;
        Ok(out.into_inner())
    }
}

/// An image ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub record: ImageRecord,
    pub bytes: Vec<u8>,
    pub beam_set: Option<ImageBeamSet>,
}

/// All images of one scan, in model order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedImages {
    pub images: Vec<PreparedImage>,
}

impl PreparedImages {
    /// IMAGE is every image; RGBU is the multichannel ones
    pub fn data_type_counts(&self) -> Vec<DataTypeCount> {
        let multichannel = self
            .images
            .iter()
            .filter(|i| i.record.purpose == ImagePurpose::Multichannel)
            .count() as u32;

        [
            (DataTypeKind::Image, self.images.len() as u32),
            (DataTypeKind::Rgbu, multichannel),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(kind, count)| DataTypeCount { kind, count })
        .collect()
    }
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_tiff(name: &str) -> bool {
    matches!(extension(name).as_str(), "tif" | "tiff")
}

fn with_png_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) => format!("{}.png", &name[..dot]),
        None => format!("{}.png", name),
    }
}

/// Bytes to store and their dimensions, if the decoder could read them
fn load_image(name: &str, bytes: Vec<u8>) -> Result<(Vec<u8>, Option<(u32, u32)>)> {
    match extension(name).as_str() {
        "img" => {
            let decoded = vicar::decode_img(&bytes)
                .map_err(|e| IngestError::ImageDecode(format!("Failed to read {}: {}", name, e)))?;
            Ok((decoded.to_png()?, Some((decoded.width, decoded.height))))
        }
        "unc" => {
            let decoded = unc::decode_unc(&bytes)?;
            Ok((decoded.to_png()?, Some((decoded.width, decoded.height))))
        }
        _ => {
            let dims = image::ImageReader::new(Cursor::new(&bytes))
                .with_guessed_format()
                .ok()
                .and_then(|r| r.into_dimensions().ok());
            Ok((bytes, dims))
        }
    }
}

fn classify(desc: &ImageDescriptor, scan_id: &str) -> (ImagePurpose, ImageSource, Option<String>) {
    match desc.role {
        ImageRole::PrimaryAligned => match InstrumentFileName::parse(&desc.name) {
            Some(meta) if instrument_name::is_from_scan(&desc.name, scan_id) => {
                (ImagePurpose::Viewing, ImageSource::Instrument, Some(meta.rtt))
            }
            _ => (ImagePurpose::Viewing, ImageSource::Upload, Some(scan_id.to_string())),
        },
        ImageRole::MatchedAligned if is_tiff(&desc.name) => {
            (ImagePurpose::Multichannel, ImageSource::Upload, Some(scan_id.to_string()))
        }
        ImageRole::Multichannel => (ImagePurpose::Multichannel, ImageSource::Upload, Some(scan_id.to_string())),
        ImageRole::MatchedAligned | ImageRole::Unaligned => {
            (ImagePurpose::Viewing, ImageSource::Upload, Some(scan_id.to_string()))
        }
    }
}

/// Stored name: instrument names kept, others prefixed, VICAR and UNC as PNG
pub fn final_name(name: &str, scan_id: &str) -> String {
    let stored = instrument_name::stored_name(name, scan_id);
    match extension(name).as_str() {
        "img" | "unc" => with_png_extension(&stored),
        _ => stored,
    }
}

/// Prepare every image of `model`. `base` is the directory the converter read,
/// which `source_path` is relative to.
pub fn prepare_images(model: &ScanModel, base: &Path, images_root: &str, log: &JobLog) -> Result<PreparedImages> {
    let scan_id = model.id.as_str();
    let primaries: Vec<&ImageDescriptor> = model.primary_images().collect();

    // Primaries first, so matched images can borrow their sizes and beams
    let mut order: Vec<&ImageDescriptor> = primaries.clone();
    order.extend(model.images.iter().filter(|i| i.role != ImageRole::PrimaryAligned));

    let mut primary_dims: HashMap<&str, (u32, u32)> = HashMap::new();
    let mut primary_beams: HashMap<&str, ImageBeamSet> = HashMap::new();
    let mut stored_primary: HashMap<&str, String> = HashMap::new();
    let mut prepared = Vec::with_capacity(order.len());

    for desc in order {
        let mut transform = desc.match_transform.clone();
        if let Some(t) = &transform {
            if !primaries.iter().any(|p| p.name == t.primary_name) {
                log.warn(format!(
                    "Matched image {} references missing primary image {}, skipping",
                    desc.name, t.primary_name
                ));
                continue;
            }
        }

        let path = base.join(&desc.source_path);
        let raw = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestError::NotFound(format!("Image not found: {}", path.display())),
            _ => IngestError::Io(e),
        })?;
        let (bytes, dims) = load_image(&desc.name, raw)?;

        let (width, height) = match dims {
            Some(d) => d,
            None => {
                let sibling = transform.as_ref().and_then(|t| primary_dims.get(t.primary_name.as_str()));
                match (sibling, desc.size_hint_px) {
                    (Some(d), _) if is_tiff(&desc.name) => {
                        log.info(format!(
                            "Using dimensions of aligned image for {}: {}x{}",
                            desc.name, d.0, d.1
                        ));
                        *d
                    }
                    (_, Some(hint)) => hint,
                    _ => {
                        return Err(IngestError::ImageDecode(format!(
                            "Failed to read dimensions of image: {}",
                            desc.name
                        )))
                    }
                }
            }
        };

        let name = final_name(&desc.name, scan_id);
        let (purpose, source, origin) = classify(desc, scan_id);

        let mut beam_set = None;
        if desc.role == ImageRole::PrimaryAligned {
            let index = primaries.iter().position(|p| p.name == desc.name).unwrap_or(0);
            let set = beams::primary_beam_set(&name, scan_id, index, &model.locations);
            primary_dims.insert(desc.name.as_str(), (width, height));
            primary_beams.insert(desc.name.as_str(), set.clone());
            stored_primary.insert(desc.name.as_str(), name.clone());
            beam_set = Some(set);
        } else if let Some(t) = transform.as_mut() {
            if let Some(primary) = primary_beams.get(t.primary_name.as_str()) {
                beam_set = Some(beams::matched_beam_set(&name, primary, t));
            }
            if let Some(stored) = stored_primary.get(t.primary_name.as_str()) {
                t.primary_name = stored.clone();
            }
        }

        prepared.push(PreparedImage {
            record: ImageRecord {
                storage_path: format!("{}/{}/{}", images_root, scan_id, name),
                name,
                scan_ids_associated: vec![scan_id.to_string()],
                origin_scan_id: origin,
                source,
                purpose,
                width,
                height,
                byte_size: bytes.len() as u64,
                match_transform: transform,
            },
            bytes,
            beam_set,
        });
    }

    // Back to model order
    prepared.sort_by_key(|p: &PreparedImage| {
        model
            .images
            .iter()
            .position(|d| final_name(&d.name, scan_id) == p.record.name)
            .unwrap_or(usize::MAX)
    });

    log.info(format!("Prepared {} images for scan {}", prepared.len(), scan_id));
    Ok(PreparedImages { images: prepared })
}

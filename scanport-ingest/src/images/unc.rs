//! Camera `.unc` frames
//!
//! Layout (little endian): a 4-byte header of two words; when word 2 is
//! `0xFFFF` a 14-byte hexapod record follows, then the real 4-byte header.
//! Next is the frame metadata block, then the payload. Only JPEG payloads
//! (compression code 3) are decoded.

use super::DecodedImage;
use crate::error::IngestError;

const HEXAPOD_MARKER: u16 = 0xFFFF;
const HEADER_LEN: usize = 4;
const HEXAPOD_LEN: usize = 14;
/// Smallest metadata block; the JPEG SOI marker is searched for after it
const METADATA_LEN: usize = 28;
const COMPRESSION_OFFSET: usize = 1;
const JPEG_COMPRESSION: u8 = 3;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

fn compression_name(code: u8) -> &'static str {
    match code {
        0 => "unc",
        1 => "cen",
        2 => "roi",
        3 => "jp0",
        4 => "nonStlOb",
        32 => "CC",
        33 => "TRN",
        34 => "sli",
        _ => "unknown",
    }
}

/// Offset of the metadata block
fn metadata_start(bytes: &[u8]) -> Result<usize, IngestError> {
    let truncated = || IngestError::ImageDecode("UNC header truncated".to_string());
    let word2 = bytes.get(2..4).ok_or_else(truncated)?;

    if u16::from_le_bytes([word2[0], word2[1]]) == HEXAPOD_MARKER {
        let start = HEADER_LEN + HEXAPOD_LEN + HEADER_LEN;
        if bytes.len() < start {
            return Err(truncated());
        }
        Ok(start)
    } else {
        Ok(HEADER_LEN)
    }
}

/// The embedded JPEG stream of a compression-3 frame
pub fn extract_jpeg(bytes: &[u8]) -> Result<&[u8], IngestError> {
    let meta = metadata_start(bytes)?;
    let block = bytes
        .get(meta..meta + METADATA_LEN)
        .ok_or_else(|| IngestError::ImageDecode("UNC metadata truncated".to_string()))?;

    let code = block[COMPRESSION_OFFSET];
    if code != JPEG_COMPRESSION {
        return Err(IngestError::UnsupportedImageCompression(format!(
            "Unsupported image type: {}",
            compression_name(code)
        )));
    }

    let search_from = meta + METADATA_LEN;
    let soi = bytes[search_from..]
        .windows(2)
        .position(|w| w == JPEG_SOI)
        .ok_or_else(|| IngestError::ImageDecode("No JPEG data found in UNC frame".to_string()))?;
    Ok(&bytes[search_from + soi..])
}

pub fn decode_unc(bytes: &[u8]) -> Result<DecodedImage, IngestError> {
    let jpeg = extract_jpeg(bytes)?;
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| IngestError::ImageDecode(format!("Failed to read jpeg: {}", e)))?
        .to_rgba8();

    Ok(DecodedImage {
        width: img.width(),
        height: img.height(),
        rgba: img.into_raw(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([200, 100, 50]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    /// Frame with the 30-byte metadata block the camera writes
    pub(crate) fn build_unc(compression: u8, hexapod: bool, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if hexapod {
            out.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
            out.extend_from_slice(&[0u8; HEXAPOD_LEN]);
        }
        out.extend_from_slice(&[0x10, 0x00, 0x20, 0x00]);
        let mut meta = [0u8; 30];
        meta[COMPRESSION_OFFSET] = compression;
        out.extend_from_slice(&meta);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_decode_embedded_jpeg() {
        for hexapod in [false, true] {
            let img = decode_unc(&build_unc(3, hexapod, &tiny_jpeg())).unwrap();
            assert_eq!((img.width, img.height), (3, 2));
            assert_eq!(img.rgba.len(), 3 * 2 * 4);
        }
    }

    #[test]
    fn test_other_compression_is_unsupported() {
        let err = decode_unc(&build_unc(34, false, &[1, 2, 3])).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedImageCompression(_)));
        assert_eq!(err.to_string(), "Unsupported image type: sli");
    }

    #[test]
    fn test_truncated_frame() {
        assert!(matches!(decode_unc(&[0, 0]), Err(IngestError::ImageDecode(_))));
        assert!(matches!(
            decode_unc(&build_unc(3, false, &[])),
            Err(IngestError::ImageDecode(_))
        ));
    }
}

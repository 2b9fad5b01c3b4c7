//! PDS `.img` files: ODL header, VICAR label, then 12-bit BSQ pixels
//!
//! ```text
//! ODL_VERSION_ID = ODL3
//! RECORD_TYPE = FIXED_LENGTH
//! RECORD_BYTES = 3296
//! LABEL_RECORDS = 6
//! ^IMAGE = 7
//! ...
//! LBLSIZE=19776  FORMAT='HALF'  TYPE='IMAGE'  DIM=3  EOL=0  ORG='BSQ'  NL=1200  NS=1648  NB=3
//! ```

use std::collections::HashMap;

use super::DecodedImage;

const LBLSIZE: &str = "LBLSIZE=";
const MAX_PIXEL: f64 = 4096.0;

/// Byte offset of the VICAR label: `RECORD_BYTES * LABEL_RECORDS`
fn find_vicar(bytes: &[u8]) -> Result<usize, String> {
    let mut fields: HashMap<String, String> = HashMap::new();

    for (line_no, raw) in bytes.split(|b| *b == b'\n' || *b == b'\r').enumerate() {
        let line = String::from_utf8_lossy(raw);
        if line_no == 0 && !line.starts_with("ODL_VERSION_ID") {
            return Err("Expected to start with ODL_VERSION_ID".to_string());
        }
        if line.starts_with("^IMAGE") {
            break;
        }
        let parts: Vec<&str> = line.split('=').collect();
        if parts.len() == 2 {
            fields.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
        }
    }

    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| format!("{} not found", name))
    };

    let version = field("ODL_VERSION_ID")?;
    if version != "ODL3" {
        return Err(format!("Unexpected ODL_VERSION_ID: {}", version));
    }
    let record_type = field("RECORD_TYPE")?;
    if record_type != "FIXED_LENGTH" {
        return Err(format!("Unexpected RECORD_TYPE: {}", record_type));
    }

    let record_bytes: usize = field("RECORD_BYTES")?
        .parse()
        .map_err(|e| format!("Invalid RECORD_BYTES: {}", e))?;
    let label_records: usize = field("LABEL_RECORDS")?
        .parse()
        .map_err(|e| format!("Invalid LABEL_RECORDS: {}", e))?;

    Ok(record_bytes * label_records)
}

/// The VICAR label text, cut at its first NUL
fn read_vicar_label(bytes: &[u8], vicar_pos: usize) -> Result<&str, String> {
    let start = bytes
        .get(vicar_pos..vicar_pos + 50)
        .ok_or_else(|| "VICAR header seems to be missing".to_string())?;
    let start = String::from_utf8_lossy(start);

    let rest = start
        .strip_prefix(LBLSIZE)
        .ok_or_else(|| format!("Expected VICAR header to start with LBLSIZE, got {}", start))?;
    let size_text = rest
        .split(' ')
        .next()
        .filter(|_| rest.contains(' '))
        .ok_or_else(|| "Failed to read VICAR LBLSIZE".to_string())?;

    let label_size: usize = match size_text.parse() {
        Ok(n) if n > 200 => n,
        _ => return Err(format!("Read invalid VICAR label size {}", size_text)),
    };

    let label = bytes
        .get(vicar_pos..vicar_pos + label_size)
        .ok_or_else(|| "File seems truncated, VICAR label not complete".to_string())?;
    let end = label.iter().position(|b| *b == 0).unwrap_or(label.len());
    std::str::from_utf8(&label[..end]).map_err(|e| format!("VICAR label is not text: {}", e))
}

#[derive(Debug, Default, PartialEq)]
struct VicarLayout {
    label_size: usize,
    width: usize,
    height: usize,
    channels: usize,
}

fn parse_vicar_label(label: &str) -> Result<VicarLayout, String> {
    let mut layout = VicarLayout::default();
    let mut have_format = false;

    let expect = |item: &str, value: &str, wanted: &str, message: String| {
        if value == wanted {
            Ok(())
        } else {
            Err(format!("{} ({})", message, item))
        }
    };

    for item in label.split(' ').filter(|i| !i.is_empty()) {
        let (key, value) = match item.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        let number = || {
            value
                .parse::<usize>()
                .map_err(|e| format!("Invalid VICAR label item: {}. Error: {}", item, e))
        };

        match key {
            "LBLSIZE" => layout.label_size = number()?,
            "NL" => layout.height = number()?,
            "NS" => layout.width = number()?,
            "NB" => layout.channels = number()?,
            "EOL" => expect(item, value, "0", "Expected EOL=0".into())?,
            "NBB" => expect(item, value, "0", "Expected NBB=0".into())?,
            "NLB" => expect(item, value, "0", "Expected NLB=0".into())?,
            "DIM" => expect(item, value, "3", "Expected DIM=3".into())?,
            "BITS" => expect(item, value, "12", format!("Unexpected BITS {}", value))?,
            "ORG" => expect(item, value, "'BSQ'", format!("Unexpected ORG {}", value))?,
            "TYPE" => expect(item, value, "'IMAGE'", format!("Unexpected TYPE {}", value))?,
            "FORMAT" => {
                if value != "'HALF'" && value != "'WORD'" {
                    return Err(format!("Unsupported VICAR pixel format: {}", value));
                }
                have_format = true;
            }
            _ => {}
        }
    }

    if layout.width == 0 || layout.height == 0 || !have_format {
        return Err("Invalid VICAR label, missing expected fields".to_string());
    }
    if layout.channels != 1 && layout.channels != 3 {
        return Err("Expected 1 or 3 channels in image".to_string());
    }
    Ok(layout)
}

/// Decode to RGBA, rescaling 12-bit samples to 8 bits
pub fn decode_img(bytes: &[u8]) -> Result<DecodedImage, String> {
    let vicar_pos = find_vicar(bytes)?;
    let label = read_vicar_label(bytes, vicar_pos)?;
    let layout = parse_vicar_label(label)?;

    let VicarLayout {
        label_size,
        width,
        height,
        channels,
    } = layout;
    let band_size = width * height * 2;
    let image_pos = vicar_pos + label_size;
    let pixels = bytes
        .get(image_pos..image_pos + band_size * channels)
        .ok_or_else(|| {
            format!(
                "Failed to read VICAR image of {} bytes, got {} bytes",
                band_size * channels,
                bytes.len().saturating_sub(image_pos)
            )
        })?;

    let mut rgba = vec![0u8; width * height * 4];
    for ch in 0..channels {
        let band = &pixels[ch * band_size..(ch + 1) * band_size];
        for (px, sample) in band.chunks_exact(2).enumerate() {
            let raw = u16::from_be_bytes([sample[0], sample[1]]);
            let value = (255.0 * raw as f64 / MAX_PIXEL).round().min(255.0) as u8;

            let out = &mut rgba[px * 4..px * 4 + 4];
            if channels == 1 {
                out[..3].fill(value);
            } else {
                out[ch] = value;
            }
            out[3] = 255;
        }
    }

    Ok(DecodedImage {
        width: width as u32,
        height: height as u32,
        rgba,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal `.img` with 100-byte records and the given samples per band
    pub(crate) fn build_img(width: usize, height: usize, bands: &[Vec<u16>]) -> Vec<u8> {
        let mut out = Vec::new();
        let header = "ODL_VERSION_ID = ODL3\nRECORD_TYPE = FIXED_LENGTH\nRECORD_BYTES = 100\nLABEL_RECORDS = 2\n^IMAGE = 3\n";
        out.extend_from_slice(header.as_bytes());
        out.resize(200, b' ');

        let label = format!(
            "LBLSIZE=300  FORMAT='HALF'  TYPE='IMAGE'  DIM=3  EOL=0  ORG='BSQ'  NL={}  NS={}  NB={}  BITS=12 ",
            height,
            width,
            bands.len()
        );
        let mut label = label.into_bytes();
        label.resize(300, 0);
        out.extend_from_slice(&label);

        for band in bands {
            for v in band {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out
    }

    #[test]
    fn test_decode_three_band() {
        let bytes = build_img(2, 1, &[vec![4095, 0], vec![2048, 0], vec![0, 16]]);
        let img = decode_img(&bytes).unwrap();
        assert_eq!((img.width, img.height), (2, 1));
        // 255*4095/4096 = 254.94 -> 255; 255*2048/4096 = 127.5 -> 128; 255*16/4096 = 0.996 -> 1
        assert_eq!(img.rgba, vec![255, 128, 0, 255, 0, 0, 1, 255]);
    }

    #[test]
    fn test_single_band_replicates_grey() {
        let bytes = build_img(1, 2, &[vec![1024, 4096]]);
        let img = decode_img(&bytes).unwrap();
        assert_eq!(img.rgba, vec![64, 64, 64, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert_eq!(
            decode_img(b"PDS_VERSION_ID = PDS3\n").unwrap_err(),
            "Expected to start with ODL_VERSION_ID"
        );

        let mut bytes = build_img(1, 1, &[vec![0], vec![0]]);
        assert_eq!(decode_img(&bytes).unwrap_err(), "Expected 1 or 3 channels in image");

        bytes = build_img(2, 2, &[vec![0; 4]]);
        bytes.truncate(bytes.len() - 2);
        assert!(decode_img(&bytes).unwrap_err().starts_with("Failed to read VICAR image"));
    }

    #[test]
    fn test_rejects_unsupported_format() {
        let label = "LBLSIZE=300  FORMAT='REAL'  NL=1  NS=1  NB=1";
        assert_eq!(
            parse_vicar_label(label).unwrap_err(),
            "Unsupported VICAR pixel format: 'REAL'"
        );
    }
}

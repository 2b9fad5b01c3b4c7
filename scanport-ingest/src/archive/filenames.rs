//! Bundle file names: `<scanId>-DD-MM-YYYY-HH-MM-SS.zip`

use chrono::NaiveDateTime;

use crate::error::{IngestError, Result};

const TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

/// A decoded bundle file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleName {
    pub scan_id: String,
    /// Embedded timestamp, read as UTC
    pub timestamp_unix_sec: i64,
}

/// Last `/`-separated component of a key
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Decode a bundle key or file name. Leading path components are ignored.
pub fn decode_bundle_name(key: &str) -> Result<BundleName> {
    let name = base_name(key);

    let Some((scan_id, rest)) = name.split_once('-') else {
        return Err(IngestError::BadBundleName(format!(
            "DecodeArchiveFileName unexpected file name: {}",
            name
        )));
    };

    // Drop the extension, whatever it is
    let stamp = match rest.rfind('.') {
        Some(dot) => &rest[..dot],
        None => rest,
    };

    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|e| {
        IngestError::BadBundleName(format!("DecodeArchiveFileName \"{}\" error: {}", name, e))
    })?;

    Ok(BundleName {
        scan_id: scan_id.to_string(),
        timestamp_unix_sec: parsed.and_utc().timestamp(),
    })
}

/// Canonical bundle file name for a scan and UTC timestamp
pub fn encode_bundle_name(scan_id: &str, timestamp_unix_sec: i64) -> Option<String> {
    let when = scanport_common::time::from_unix_sec(timestamp_unix_sec)?;
    Some(format!("{}-{}.zip", scan_id, when.format(TIMESTAMP_FORMAT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_example_bundle() {
        let decoded = decode_bundle_name("048300551-27-06-2021-09-52-25.zip").unwrap();
        assert_eq!(decoded.scan_id, "048300551");
        // 2021-06-27T09:52:25Z
        assert_eq!(decoded.timestamp_unix_sec, 1624787545);
    }

    #[test]
    fn test_decode_strips_leading_path() {
        let decoded = decode_bundle_name("Archive/048300551/048300551-27-06-2021-09-52-25.zip").unwrap();
        assert_eq!(decoded.scan_id, "048300551");
    }

    #[test]
    fn test_decode_without_separator() {
        let err = decode_bundle_name("readme.txt").unwrap_err();
        assert!(matches!(err, IngestError::BadBundleName(_)));
        assert_eq!(err.to_string(), "DecodeArchiveFileName unexpected file name: readme.txt");
    }

    #[test]
    fn test_decode_bad_timestamp() {
        let err = decode_bundle_name("161677829-12-06-2022-06-41.zip").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("DecodeArchiveFileName \"161677829-12-06-2022-06-41.zip\" error:"));
    }

    #[test]
    fn test_encode_decode_agree() {
        for (scan_id, ts) in [("048300551", 1624787545), ("test1234sbu", 0), ("983561", 1654843260)] {
            let name = encode_bundle_name(scan_id, ts).unwrap();
            let decoded = decode_bundle_name(&name).unwrap();
            assert_eq!(decoded.scan_id, scan_id);
            assert_eq!(decoded.timestamp_unix_sec, ts);
        }
        assert_eq!(
            encode_bundle_name("161677829", 1655016060).unwrap(),
            "161677829-12-06-2022-06-41-00.zip"
        );
    }
}

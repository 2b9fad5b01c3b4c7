//! Instrument product file names
//!
//! Fixed-width, 58 characters including a 3-letter extension:
//!
//! ```text
//! PCW_0125_0678031992_000RCM_N00417120483005510091075J02.png
//! ^^                                 ^^^^^^^^^^^^^
//! instrument                         RTT      PMC
//! ```

const NAME_LEN: usize = 58;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentFileName {
    pub instrument: String,
    pub rtt: String,
    pub pmc: Option<i32>,
}

impl InstrumentFileName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let name = file_name.rsplit('/').next().unwrap_or(file_name);
        if name.len() != NAME_LEN || !name.is_ascii() {
            return None;
        }

        let rtt = &name[35..44];
        if !rtt.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            instrument: name[0..2].to_string(),
            rtt: rtt.to_string(),
            pmc: name[44..48].parse().ok(),
        })
    }

    /// RTT with leading zeros dropped, for comparing against scan ids
    pub fn rtt_number(&self) -> Option<u64> {
        self.rtt.parse().ok()
    }
}

/// True when `file_name` parses and carries this scan's RTT
pub fn is_from_scan(file_name: &str, scan_id: &str) -> bool {
    match (InstrumentFileName::parse(file_name), scan_id.parse::<u64>()) {
        (Some(meta), Ok(id)) => meta.rtt_number() == Some(id),
        (Some(meta), Err(_)) => meta.rtt == scan_id,
        _ => false,
    }
}

/// Stored name for an image of `scan_id`: instrument names keep their name,
/// anything else gets a `<scanId>-` prefix
pub fn stored_name(file_name: &str, scan_id: &str) -> String {
    if InstrumentFileName::parse(file_name).is_some() {
        file_name.to_string()
    } else {
        format!("{}-{}", scan_id, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "PCW_0125_0678031992_000RCM_N00417120483005510091075J02.png";

    #[test]
    fn test_parse_fields() {
        let meta = InstrumentFileName::parse(NAME).unwrap();
        assert_eq!(meta.instrument, "PC");
        assert_eq!(meta.rtt, "048300551");
        assert_eq!(meta.pmc, Some(91));
        assert!(InstrumentFileName::parse(&format!("dir/{}", NAME)).is_some());
    }

    #[test]
    fn test_other_names_do_not_parse() {
        assert!(InstrumentFileName::parse("context.png").is_none());
        assert!(InstrumentFileName::parse(&NAME.replace("048300551", "04830055X")).is_none());
    }

    #[test]
    fn test_is_from_scan_ignores_leading_zeros() {
        assert!(is_from_scan(NAME, "048300551"));
        assert!(is_from_scan(NAME, "48300551"));
        assert!(!is_from_scan(NAME, "048300552"));
        assert!(!is_from_scan("watson.png", "048300551"));
    }

    #[test]
    fn test_stored_name() {
        assert_eq!(stored_name(NAME, "048300551"), NAME);
        assert_eq!(stored_name("watson.png", "048300551"), "048300551-watson.png");
    }
}

//! What changed since the previous import of a scan

use crate::models::{ChangeKind, DataTypeKind, ScanSummary};

const HOUSEKEEPING_FIELDS: [&str; 4] = ["DriveId", "Site", "Target", "Title"];

/// Compare a freshly built summary with the stored one.
///
/// Spectra increases win over image count changes, which win over
/// housekeeping changes. A first import (no prior summary) is `Unknown`;
/// `None` is left for jobs that published nothing.
pub fn classify_change(new: &ScanSummary, prior: Option<&ScanSummary>) -> Option<ChangeKind> {
    let Some(prior) = prior else {
        return Some(ChangeKind::Unknown);
    };

    let (n, p) = (&new.counts, &prior.counts);
    if n.normal_spectra > p.normal_spectra
        || n.bulk_spectra > p.bulk_spectra
        || n.dwell_spectra > p.dwell_spectra
        || n.max_spectra > p.max_spectra
    {
        return Some(ChangeKind::Spectra);
    }

    if new.data_type_count(DataTypeKind::Image) != prior.data_type_count(DataTypeKind::Image) {
        return Some(ChangeKind::Image);
    }

    if HOUSEKEEPING_FIELDS.iter().any(|f| new.meta(f) != prior.meta(f)) {
        return Some(ChangeKind::Housekeeping);
    }

    Some(ChangeKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataTypeCount, InstrumentKind, SpectraCounts};
    use std::collections::BTreeMap;

    fn summary() -> ScanSummary {
        ScanSummary {
            id: "048300551".to_string(),
            title: "Naltsos".to_string(),
            description: String::new(),
            instrument: InstrumentKind::Flight,
            instrument_config: "PIXL".to_string(),
            metadata: BTreeMap::from([
                ("Title".to_string(), "Naltsos".to_string()),
                ("Site".to_string(), "4".to_string()),
            ]),
            counts: SpectraCounts {
                normal_spectra: 242,
                dwell_spectra: 0,
                bulk_spectra: 2,
                max_spectra: 2,
                pseudo_intensities: 121,
            },
            data_type_counts: vec![DataTypeCount {
                kind: DataTypeKind::Image,
                count: 5,
            }],
            default_context_image: String::new(),
            timestamp_unix_sec: 1624787545,
            complete_timestamp_unix_sec: 0,
            previous_import_times_unix_sec: vec![],
            creator_id: String::new(),
        }
    }

    #[test]
    fn test_first_import_is_unknown() {
        assert_eq!(classify_change(&summary(), None), Some(ChangeKind::Unknown));

        // Even a scan with plenty of spectra and images has nothing to compare against
        let mut new = summary();
        new.counts.normal_spectra = 1000;
        assert_eq!(classify_change(&new, None), Some(ChangeKind::Unknown));
    }

    #[test]
    fn test_identical_is_unknown() {
        assert_eq!(classify_change(&summary(), Some(&summary())), Some(ChangeKind::Unknown));
    }

    #[test]
    fn test_more_normal_spectra_is_spectra() {
        let mut new = summary();
        new.counts.normal_spectra += 2;
        // Also changes images and housekeeping; spectra takes precedence
        new.data_type_counts[0].count = 6;
        new.metadata.insert("Site".to_string(), "5".to_string());
        assert_eq!(classify_change(&new, Some(&summary())), Some(ChangeKind::Spectra));
    }

    #[test]
    fn test_fewer_spectra_is_not_spectra() {
        let mut new = summary();
        new.counts.normal_spectra -= 2;
        assert_eq!(classify_change(&new, Some(&summary())), Some(ChangeKind::Unknown));
    }

    #[test]
    fn test_image_count_either_direction() {
        let mut new = summary();
        new.data_type_counts[0].count = 4;
        assert_eq!(classify_change(&new, Some(&summary())), Some(ChangeKind::Image));
        new.data_type_counts.clear();
        assert_eq!(classify_change(&new, Some(&summary())), Some(ChangeKind::Image));
    }

    #[test]
    fn test_housekeeping_fields() {
        for field in HOUSEKEEPING_FIELDS {
            let mut new = summary();
            new.metadata.insert(field.to_string(), "changed".to_string());
            assert_eq!(classify_change(&new, Some(&summary())), Some(ChangeKind::Housekeeping), "{}", field);
        }
    }
}

//! Beam positions in image pixel coordinates

use crate::models::{ImageBeamSet, ImageCoord, Location, MatchTransform};

/// Beam `(i, j)` of every location for the primary-aligned image at
/// `primary_index`, in location order. Locations without a beam, or without
/// coordinates for that image, give `None`.
pub fn primary_beam_set(image_name: &str, scan_id: &str, primary_index: usize, locations: &[Location]) -> ImageBeamSet {
    let coords = locations
        .iter()
        .map(|loc| {
            let beam = loc.beam.as_ref()?;
            let (i, j) = if primary_index == 0 {
                (beam.image_i, beam.image_j)
            } else {
                *beam.context_locations.get(primary_index - 1)?
            };
            Some(ImageCoord { i, j })
        })
        .collect();

    ImageBeamSet {
        image_name: image_name.to_string(),
        scan_id: scan_id.to_string(),
        locations: coords,
    }
}

/// Beam set of a primary image carried into a matched image's frame
pub fn matched_beam_set(image_name: &str, primary: &ImageBeamSet, transform: &MatchTransform) -> ImageBeamSet {
    ImageBeamSet {
        image_name: image_name.to_string(),
        scan_id: primary.scan_id.clone(),
        locations: primary
            .locations
            .iter()
            .map(|c| {
                c.map(|c| {
                    let (i, j) = transform.apply(c.i, c.j);
                    ImageCoord { i, j }
                })
            })
            .collect(),
    }
}

//! Synthetic breadboard bundles

use std::io::{Cursor, Write};
use zip::write::FileOptions;

/// What goes into one bundle
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub pmcs: Vec<i32>,
    pub title: String,
    /// Leave out `detector.json`, so no converter can claim the tree
    pub without_detector: bool,
    pub with_context_image: bool,
}

impl Default for BundleSpec {
    fn default() -> Self {
        Self {
            pmcs: vec![1, 2],
            title: "Bench run 12".to_string(),
            without_detector: false,
            with_context_image: true,
        }
    }
}

/// Two-detector MSA file for one PMC
pub fn msa(pmc: i32, a: &[u32], b: &[u32]) -> String {
    let mut text = format!(
        "#PMC: {}\n#DATATYPE: YY\n#NCOLUMNS: 2\n#NPOINTS : {}\n#XPERCHAN : 10.0, 10.0\n#OFFSET : 0.0, 0.0\n\
         #LIVETIME : 10.0, 10.0\n#SPECTRUM\n",
        pmc,
        a.len()
    );
    for (x, y) in a.iter().zip(b) {
        text.push_str(&format!("{}, {}\n", x, y));
    }
    text.push_str("#ENDOFDATA\n");
    text
}

/// Small opaque PNG
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 80, 120, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Loose files of a breadboard dataset, as (relative path, bytes)
pub fn breadboard_files(spec: &BundleSpec) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    if !spec.without_detector {
        files.push(("detector.json".to_string(), br#"{"detector":"jpl-breadboard"}"#.to_vec()));
    }

    let import = serde_json::json!({
        "title": spec.title,
        "target": "Basalt",
        "site": "Lab",
        "group": "JPL Breadboard",
        "contextImgDir": if spec.with_context_image { "context" } else { "" },
        "beamFile": "beams.csv",
        "creatorUserId": "u-42",
    });
    files.push(("import.json".to_string(), import.to_string().into_bytes()));

    let mut beams = String::from("PMC,x,y,z,image_i,image_j\n");
    for pmc in &spec.pmcs {
        let name = format!("spectra/Normal_A_{:04}.msa", pmc);
        let counts: Vec<u32> = (0..8).map(|c| (c as u32 + *pmc as u32) % 5).collect();
        files.push((name, msa(*pmc, &counts, &counts).into_bytes()));
        beams.push_str(&format!("{},0.1,0.2,0.3,{}.5,{}.5\n", pmc, pmc, pmc + 1));
    }
    files.push(("beams.csv".to_string(), beams.into_bytes()));

    if spec.with_context_image {
        files.push(("context/ctx_1.png".to_string(), png(8, 6)));
    }
    files
}

/// ZIP holding `files`
pub fn zip_files(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(name.as_str(), FileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn breadboard_bundle(spec: &BundleSpec) -> Vec<u8> {
    zip_files(&breadboard_files(spec))
}

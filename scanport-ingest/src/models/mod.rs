//! Data models for scanport-ingest

pub mod image;
pub mod job;
pub mod ownership;
pub mod scan;
pub mod summary;

pub use image::{ImageBeamSet, ImageCoord, ImagePurpose, ImageRecord, ImageSource};
pub use job::{ChangeKind, IngestResult, JobRecord, JobState};
pub use ownership::{AutoShareRule, ObjectType, Ownership};
pub use scan::{
    BeamCoord, ImageDescriptor, ImageRole, InstrumentKind, Location, MatchTransform,
    PseudoIntensityRange, ScanModel, SpectraCounts, Spectrum, SpectrumKind,
};
pub use summary::{CustomMeta, DataTypeCount, DataTypeKind, ScanSummary};

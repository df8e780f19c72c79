pub mod analyze;
pub mod batch;
pub mod errors;
pub mod file;
pub mod metadata;
pub mod rasterize;
pub mod report;
pub mod save;
pub mod structure_set;
pub mod study;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

pub use analyze::{analyze, AnalyzeError, BoundingBox, VolumeStatistics};
pub use batch::{extract, RoiFailure, RoiOutcome, Selection};
pub use errors::{DicomError, RoiError, TiffError};
pub use metadata::*;
pub use rasterize::{Rasterizer, RasterizerConfig, RoiMask, SpacingFallback};
pub use report::AnalysisReport;
pub use save::{load_mask, save_active_slices_png, MaskSaver, SupportedCompressor};
pub use structure_set::{Contour, RoiSelector, StructureSet};
pub use study::{Study, StudyError, StudyOptions};
pub use volume::{CtSlice, CtVolume, DuplicateZPolicy, SliceGeometry, VolumeError, VolumeGeometry};

pub mod dicom;
pub mod roi;
pub mod tiff;

pub use dicom::DicomError;
pub use roi::RoiError;
pub use tiff::TiffError;

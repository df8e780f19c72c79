pub use snafu::{Snafu, Whatever};
use std::path::PathBuf;
use tiff::ColorType;
use tiff::TiffError as BaseTiffError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TiffError {
    #[snafu(display("IO error on TIFF file {}", path.display()))]
    IOError {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },

    #[snafu(display("error reading TIFF file {}", path.display()))]
    ReadError {
        path: PathBuf,
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
    },

    #[snafu(display("error writing TIFF file {}", path.display()))]
    WriteError {
        path: PathBuf,
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
    },

    #[snafu(display("missing TIFF tag: {}", name))]
    MissingPropertyError { name: &'static str },

    #[snafu(display("unsupported color type: {:?}", color_type))]
    UnsupportedColorType { color_type: ColorType },

    #[snafu(display("tag {} has invalid length: {} (expected {})", name, actual, expected))]
    CardinalityError {
        name: &'static str,
        actual: usize,
        expected: usize,
    },

    #[snafu(display(
        "frame {} has dimensions {}x{}, expected {}x{}",
        frame,
        width,
        height,
        expected_width,
        expected_height
    ))]
    InconsistentFrameError {
        frame: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[snafu(display("error processing TIFF file: {:?}", source))]
    GeneralTiffError {
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
    },

    #[snafu(display("{}", message))]
    Other { message: String },
}

impl From<Whatever> for TiffError {
    fn from(source: Whatever) -> Self {
        Self::Other {
            message: source.to_string(),
        }
    }
}

impl From<BaseTiffError> for TiffError {
    fn from(source: BaseTiffError) -> Self {
        Self::GeneralTiffError {
            source: Box::new(source),
        }
    }
}

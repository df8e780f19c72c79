//! Persistence of ROI masks as multi-frame TIFFs, one Gray8 frame per slice.
//!
//! Voxels inside the ROI are written as 255 so the frames are viewable as-is. Reading a mask
//! back maps every nonzero value to 1.

use image::{GrayImage, Luma};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tiff::decoder::DecodingResult;
use tiff::encoder::colortype::Gray8;
use tiff::encoder::compression::{Compression, Compressor, Deflate, Lzw, Packbits, Uncompressed};
use tiff::encoder::TiffEncoder;
use tiff::TiffError as BaseTiffError;

use crate::errors::tiff::{ReadSnafu, TiffError};
use crate::file::TiffFileOperations;
use crate::metadata::{FrameCount, MaskMetadata, WriteTags};
use crate::rasterize::RoiMask;

const MASK_VALUE: u8 = 255;

#[derive(Debug, Snafu)]
pub enum SaveError {
    #[snafu(display("could not create file {}", path.display()))]
    CreateFile {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
        path: PathBuf,
    },
    #[snafu(display("could not open TIFF file {}", path.display()))]
    OpenTiff {
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
        path: PathBuf,
    },
    #[snafu(display("could not write TIFF frame: {}", source))]
    WriteToTiff {
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
    },
    #[snafu(display("could not write TIFF tags: {}", source))]
    WriteTags {
        #[snafu(source(from(BaseTiffError, Box::new)))]
        source: Box<BaseTiffError>,
    },
    #[snafu(display("mask has {} slices, at most {} can be stored", frames, u16::MAX))]
    TooManyFrames { frames: usize },
    #[snafu(display("could not write PNG {}", path.display()))]
    WritePng {
        #[snafu(source(from(image::ImageError, Box::new)))]
        source: Box<image::ImageError>,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, Default, PartialEq, Eq)]
pub enum SupportedCompressor {
    #[default]
    Packbits,
    Lzw,
    Deflate,
    #[value(name = "none")]
    Uncompressed,
}

impl From<SupportedCompressor> for Compressor {
    fn from(value: SupportedCompressor) -> Self {
        match value {
            SupportedCompressor::Packbits => Compressor::Packbits(Packbits),
            SupportedCompressor::Lzw => Compressor::Lzw(Lzw),
            SupportedCompressor::Deflate => Compressor::Deflate(Deflate::default()),
            SupportedCompressor::Uncompressed => Compressor::Uncompressed(Uncompressed),
        }
    }
}

impl fmt::Display for SupportedCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compressor_str = match self {
            SupportedCompressor::Packbits => "packbits",
            SupportedCompressor::Lzw => "lzw",
            SupportedCompressor::Deflate => "deflate",
            SupportedCompressor::Uncompressed => "none",
        };
        write!(f, "{}", compressor_str)
    }
}

fn write_frame<D: Compression>(
    encoder: &mut TiffEncoder<File>,
    frame: ArrayView2<u8>,
    metadata: &MaskMetadata,
    compression: D,
) -> Result<(), SaveError> {
    let (rows, cols) = frame.dim();
    let mut tiff = encoder
        .new_image_with_compression::<Gray8, D>(cols as u32, rows as u32, compression)
        .context(WriteToTiffSnafu)?;
    metadata.write_tags(&mut tiff).context(WriteTagsSnafu)?;
    let bytes: Vec<u8> = frame
        .iter()
        .map(|v| if *v != 0 { MASK_VALUE } else { 0 })
        .collect();
    tiff.write_data(bytes.as_slice()).context(WriteToTiffSnafu)?;
    Ok(())
}

pub struct MaskSaver {
    compressor: Compressor,
}

impl MaskSaver {
    pub fn new(compressor: Compressor) -> Self {
        Self { compressor }
    }

    fn save_frame(
        &self,
        encoder: &mut TiffEncoder<File>,
        frame: ArrayView2<u8>,
        metadata: &MaskMetadata,
    ) -> Result<(), SaveError> {
        match &self.compressor {
            Compressor::Uncompressed(c) => write_frame(encoder, frame, metadata, *c),
            Compressor::Packbits(c) => write_frame(encoder, frame, metadata, *c),
            Compressor::Lzw(c) => write_frame(encoder, frame, metadata, *c),
            Compressor::Deflate(c) => write_frame(encoder, frame, metadata, *c),
        }
    }

    /// Write a (rows, cols, slices) mask to `path`, one frame per slice
    pub fn save_array<P: AsRef<Path>>(
        &self,
        mask: ArrayView3<u8>,
        metadata: &MaskMetadata,
        path: P,
    ) -> Result<(), SaveError> {
        let path = path.as_ref();
        let frames = mask.len_of(Axis(2));
        if frames > u16::MAX as usize {
            return TooManyFramesSnafu { frames }.fail();
        }

        let file = File::create(path).context(CreateFileSnafu { path })?;
        let mut encoder = TiffEncoder::new(file).context(OpenTiffSnafu { path })?;
        for frame in mask.axis_iter(Axis(2)) {
            self.save_frame(&mut encoder, frame, metadata)?;
        }
        tracing::debug!("Wrote {} frame(s) to {}", frames, path.display());
        Ok(())
    }

    /// Write a rasterized ROI to `path`
    pub fn save<P: AsRef<Path>>(&self, mask: &RoiMask, path: P) -> Result<(), SaveError> {
        let metadata = MaskMetadata {
            roi: mask.label().clone(),
            spacing: *mask.spacing(),
            num_frames: FrameCount::from(mask.shape().2),
        };
        self.save_array(mask.mask(), &metadata, path)
    }
}

impl Default for MaskSaver {
    fn default() -> Self {
        Self::new(SupportedCompressor::default().into())
    }
}

/// Read a mask written by [`MaskSaver`]. Returns the (rows, cols, slices) mask with values
/// 0 or 1, and the metadata stored with it.
pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<(Array3<u8>, MaskMetadata), TiffError> {
    let path = path.as_ref();
    let mut decoder = path.tiffread().context(ReadSnafu { path })?;
    let metadata = MaskMetadata::try_from(&mut decoder)?;
    let num_frames: usize = metadata.num_frames.into();

    decoder.seek_to_image(0).context(ReadSnafu { path })?;
    let (width, height) = decoder.dimensions().context(ReadSnafu { path })?;
    let mut mask = Array3::<u8>::zeros((height as usize, width as usize, num_frames));

    for frame in 0..num_frames {
        decoder.seek_to_image(frame).context(ReadSnafu { path })?;
        let (frame_width, frame_height) = decoder.dimensions().context(ReadSnafu { path })?;
        if (frame_width, frame_height) != (width, height) {
            return Err(TiffError::InconsistentFrameError {
                frame,
                width: frame_width,
                height: frame_height,
                expected_width: width,
                expected_height: height,
            });
        }
        let color_type = decoder.colortype().context(ReadSnafu { path })?;
        let data = match decoder.read_image().context(ReadSnafu { path })? {
            DecodingResult::U8(data) => data,
            _ => return Err(TiffError::UnsupportedColorType { color_type }),
        };
        let plane = Array2::from_shape_vec((height as usize, width as usize), data).map_err(|e| {
            TiffError::Other {
                message: format!("frame {} of {}: {}", frame, path.display(), e),
            }
        })?;
        mask.index_axis_mut(Axis(2), frame)
            .assign(&plane.mapv(|v| u8::from(v != 0)));
    }
    Ok((mask, metadata))
}

/// Write a PNG preview named `slice_NNN.png` for every slice containing part of the mask.
/// Returns the number of files written.
pub fn save_active_slices_png<P: AsRef<Path>>(
    mask: ArrayView3<u8>,
    dir: P,
) -> Result<usize, SaveError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).context(CreateFileSnafu { path: dir })?;

    let mut written = 0;
    for (index, plane) in mask.axis_iter(Axis(2)).enumerate() {
        if plane.iter().all(|v| *v == 0) {
            continue;
        }
        let (rows, cols) = plane.dim();
        let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            match plane[[y as usize, x as usize]] {
                0 => Luma([0]),
                _ => Luma([MASK_VALUE]),
            }
        });
        let path = dir.join(format!("slice_{:03}.png", index));
        image.save(&path).context(WritePngSnafu { path: &path })?;
        written += 1;
    }
    Ok(written)
}

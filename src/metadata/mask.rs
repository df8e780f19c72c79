use std::io::{Read, Seek, Write};
use tiff::decoder::Decoder;
use tiff::encoder::colortype::ColorType;
use tiff::encoder::compression::Compression;
use tiff::encoder::{ImageEncoder, TiffKind};
use tiff::tags::Tag;
use tiff::TiffError;

use crate::metadata::{VoxelSpacing, WriteTags};

const VERSION: &str = concat!("dicom-rtstruct==", env!("CARGO_PKG_VERSION"), "\0");
pub const ROI_NUMBER: u16 = 50731;

#[derive(Debug, PartialEq)]
pub struct Version(String);

impl Version {
    const TAG: Tag = Tag::Software;
}

impl Default for Version {
    fn default() -> Self {
        Self(VERSION.to_string())
    }
}

impl WriteTags for Version {
    fn write_tags<W, C, K, D>(&self, tiff: &mut ImageEncoder<W, C, K, D>) -> Result<(), TiffError>
    where
        W: Write + Seek,
        C: ColorType,
        K: TiffKind,
        D: Compression,
    {
        tiff.encoder().write_tag(Self::TAG, self.0.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCount(u16);

impl FrameCount {
    // PageNumber
    const TAG: Tag = Tag::Unknown(297);
}

impl From<FrameCount> for u16 {
    fn from(frame_count: FrameCount) -> Self {
        frame_count.0
    }
}

impl From<u16> for FrameCount {
    fn from(num_frames: u16) -> Self {
        Self(num_frames)
    }
}

impl From<usize> for FrameCount {
    fn from(num_frames: usize) -> Self {
        Self(num_frames as u16)
    }
}

impl From<FrameCount> for usize {
    fn from(frame_count: FrameCount) -> Self {
        frame_count.0 as usize
    }
}

impl<T> TryFrom<&mut Decoder<T>> for FrameCount
where
    T: Read + Seek,
{
    type Error = TiffError;

    fn try_from(decoder: &mut Decoder<T>) -> Result<Self, Self::Error> {
        // First try the (page, total) tuple. The first value is always written as 0.
        let page_info = decoder.get_tag(Self::TAG)?.into_u16_vec().ok();
        if let Some(page_info) = page_info {
            if let [_, total] = page_info.as_slice() {
                return Ok(FrameCount(*total));
            }
        }

        // Otherwise, we scan the file for the number of frames
        let mut num_frames = 0;
        while decoder.seek_to_image(num_frames).is_ok() {
            num_frames += 1;
        }
        Ok(num_frames.into())
    }
}

impl WriteTags for FrameCount {
    fn write_tags<W, C, K, D>(&self, tiff: &mut ImageEncoder<W, C, K, D>) -> Result<(), TiffError>
    where
        W: Write + Seek,
        C: ColorType,
        K: TiffKind,
        D: Compression,
    {
        let page_info = vec![0, self.0];
        tiff.encoder().write_tag(Self::TAG, page_info.as_slice())?;
        Ok(())
    }
}

/// Identity of the ROI a mask was rasterized from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiLabel {
    pub number: i32,
    pub name: Option<String>,
}

impl RoiLabel {
    const NAME_TAG: Tag = Tag::Unknown(269); // DocumentName

    pub fn new(number: i32, name: Option<String>) -> Self {
        Self { number, name }
    }

    /// A label safe for use in file names. The ROI number is always included since
    /// ROI names are not guaranteed to be unique within a structure set.
    pub fn file_stem(&self) -> String {
        match &self.name {
            Some(name) => {
                let name: String = name
                    .trim()
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                    .collect();
                format!("{}_{}", self.number, name)
            }
            None => self.number.to_string(),
        }
    }
}

impl std::fmt::Display for RoiLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} (#{})", name, self.number),
            None => write!(f, "#{}", self.number),
        }
    }
}

impl WriteTags for RoiLabel {
    fn write_tags<W, C, K, D>(&self, tiff: &mut ImageEncoder<W, C, K, D>) -> Result<(), TiffError>
    where
        W: Write + Seek,
        C: ColorType,
        K: TiffKind,
        D: Compression,
    {
        let number = vec![self.number];
        tiff.encoder()
            .write_tag(Tag::Unknown(ROI_NUMBER), number.as_slice())?;
        if let Some(name) = &self.name {
            tiff.encoder().write_tag(Self::NAME_TAG, name.as_str())?;
        }
        Ok(())
    }
}

impl<T> TryFrom<&mut Decoder<T>> for RoiLabel
where
    T: Read + Seek,
{
    type Error = TiffError;

    fn try_from(decoder: &mut Decoder<T>) -> Result<Self, Self::Error> {
        let number = decoder.get_tag(Tag::Unknown(ROI_NUMBER))?.into_i32()?;
        let name = decoder
            .find_tag(Self::NAME_TAG)?
            .map(|value| value.into_string())
            .transpose()?
            .map(|name| name.trim_end_matches('\0').to_string());
        Ok(Self { number, name })
    }
}

/// Everything needed to interpret a persisted mask without the source DICOM files
#[derive(Debug, PartialEq)]
pub struct MaskMetadata {
    pub roi: RoiLabel,
    pub spacing: VoxelSpacing,
    pub num_frames: FrameCount,
}

impl WriteTags for MaskMetadata {
    fn write_tags<W, C, K, D>(&self, tiff: &mut ImageEncoder<W, C, K, D>) -> Result<(), TiffError>
    where
        W: Write + Seek,
        C: ColorType,
        K: TiffKind,
        D: Compression,
    {
        self.spacing.write_tags(tiff)?;
        self.roi.write_tags(tiff)?;
        Version::default().write_tags(tiff)?;
        self.num_frames.write_tags(tiff)?;
        Ok(())
    }
}

impl<T> TryFrom<&mut Decoder<T>> for MaskMetadata
where
    T: Read + Seek,
{
    type Error = crate::errors::TiffError;

    /// Read the mask metadata from the first frame of a TIFF file
    fn try_from(decoder: &mut Decoder<T>) -> Result<Self, Self::Error> {
        let spacing = VoxelSpacing::try_from(&mut *decoder)?;
        let roi = RoiLabel::try_from(&mut *decoder)?;
        // This has a fallback to scanning the file, so it should never fail
        let num_frames = FrameCount::try_from(&mut *decoder)?;
        Ok(Self {
            roi,
            spacing,
            num_frames,
        })
    }
}

use std::fmt;
use std::io::{Read, Seek, Write};
use tiff::decoder::Decoder;
use tiff::encoder::colortype::ColorType;
use tiff::encoder::compression::Compression;
use tiff::encoder::{ImageEncoder, Rational, TiffKind};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::TiffError;

use dicom::core::Tag as DicomTag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use serde::Serialize;

use crate::metadata::WriteTags;

const MM_PER_CM: f64 = 10.0;
const RESOLUTION_DENOMINATOR: u32 = 1000;
pub const DEFAULT_SPACING_MM: f64 = 1.0;
pub const VOXEL_SPACING: u16 = 50730;

/// The attribute a pixel spacing was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacingSource {
    PixelSpacing,
    ImagerPixelSpacing,
    Default,
}

impl fmt::Display for SpacingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source_str = match self {
            SpacingSource::PixelSpacing => "PixelSpacing",
            SpacingSource::ImagerPixelSpacing => "ImagerPixelSpacing",
            SpacingSource::Default => "default",
        };
        write!(f, "{source_str}")
    }
}

/// In-plane spacing of a slice in millimeters.
///
/// `row_mm` is the distance between adjacent rows (the Y direction) and `col_mm` the distance
/// between adjacent columns (the X direction), following the DICOM Pixel Spacing value order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    pub row_mm: f64,
    pub col_mm: f64,
    pub source: SpacingSource,
}

impl Default for PixelSpacing {
    fn default() -> Self {
        Self::isotropic(DEFAULT_SPACING_MM)
    }
}

impl PixelSpacing {
    const ATTRIBUTES: [(DicomTag, &'static str, SpacingSource); 2] = [
        (
            tags::PIXEL_SPACING,
            "Pixel Spacing",
            SpacingSource::PixelSpacing,
        ),
        (
            tags::IMAGER_PIXEL_SPACING,
            "Imager Pixel Spacing",
            SpacingSource::ImagerPixelSpacing,
        ),
    ];

    pub fn new(row_mm: f64, col_mm: f64, source: SpacingSource) -> Self {
        Self {
            row_mm,
            col_mm,
            source,
        }
    }

    /// A configured spacing that is not backed by any DICOM attribute
    pub fn isotropic(mm: f64) -> Self {
        Self::new(mm, mm, SpacingSource::Default)
    }

    pub fn is_fallback(&self) -> bool {
        self.source == SpacingSource::Default
    }

    /// Read the spacing, first from the Pixel Spacing tag, then from the Imager Pixel Spacing tag.
    /// Returns `None` when neither attribute holds a usable value. An attribute that is present
    /// but unusable (unparsable text, wrong cardinality, non-positive values) is skipped in favor
    /// of the next one.
    pub fn from_dicom(dcm: &InMemDicomObject) -> Option<Self> {
        for (tag, name, source) in Self::ATTRIBUTES {
            let Some(element) = dcm.get(tag) else {
                continue;
            };
            let values = match element.value().to_multi_float64() {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable {} value: {}", name, e);
                    continue;
                }
            };
            match values.as_slice() {
                [row_mm, col_mm, ..] if is_valid_spacing(*row_mm) && is_valid_spacing(*col_mm) => {
                    return Some(Self::new(*row_mm, *col_mm, source));
                }
                _ => {
                    tracing::warn!("Ignoring unusable {} value: {:?}", name, values);
                }
            }
        }
        None
    }
}

fn is_valid_spacing(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Physical size of a voxel in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoxelSpacing {
    pub row_mm: f64,
    pub col_mm: f64,
    pub slice_mm: f64,
}

impl Default for VoxelSpacing {
    fn default() -> Self {
        Self::new(DEFAULT_SPACING_MM, DEFAULT_SPACING_MM, DEFAULT_SPACING_MM)
    }
}

impl VoxelSpacing {
    const TAG_CARDINALITY: usize = 3;

    pub fn new(row_mm: f64, col_mm: f64, slice_mm: f64) -> Self {
        Self {
            row_mm,
            col_mm,
            slice_mm,
        }
    }

    pub fn from_pixel_spacing(spacing: &PixelSpacing, slice_mm: f64) -> Self {
        Self::new(spacing.row_mm, spacing.col_mm, slice_mm)
    }

    /// Volume of a single voxel in cubic millimeters
    pub fn voxel_volume_mm3(&self) -> f64 {
        self.row_mm * self.col_mm * self.slice_mm
    }

    fn pixels_per_cm(spacing_mm: f64) -> Rational {
        Rational {
            n: (MM_PER_CM / spacing_mm * RESOLUTION_DENOMINATOR as f64).round() as u32,
            d: RESOLUTION_DENOMINATOR,
        }
    }
}

impl WriteTags for VoxelSpacing {
    fn write_tags<W, C, K, D>(&self, tiff: &mut ImageEncoder<W, C, K, D>) -> Result<(), TiffError>
    where
        W: Write + Seek,
        C: ColorType,
        K: TiffKind,
        D: Compression,
    {
        // Standard resolution tags for viewers, exact spacing in a private tag
        tiff.x_resolution(Self::pixels_per_cm(self.col_mm));
        tiff.y_resolution(Self::pixels_per_cm(self.row_mm));
        tiff.resolution_unit(ResolutionUnit::Centimeter);
        let spacing = vec![self.row_mm, self.col_mm, self.slice_mm];
        tiff.encoder()
            .write_tag(Tag::Unknown(VOXEL_SPACING), spacing.as_slice())?;
        Ok(())
    }
}

impl<T> TryFrom<&mut Decoder<T>> for VoxelSpacing
where
    T: Read + Seek,
{
    type Error = crate::errors::TiffError;

    fn try_from(decoder: &mut Decoder<T>) -> Result<Self, Self::Error> {
        let spacing = decoder.get_tag_f64_vec(Tag::Unknown(VOXEL_SPACING))?;
        match spacing.as_slice() {
            [row_mm, col_mm, slice_mm] => Ok(Self::new(*row_mm, *col_mm, *slice_mm)),
            _ => Err(crate::errors::TiffError::CardinalityError {
                name: "VoxelSpacing",
                actual: spacing.len(),
                expected: Self::TAG_CARDINALITY,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{dicom_value, DataElement, VR};
    use rstest::rstest;
    use std::fs::File;

    use tempfile::tempdir;
    use tiff::decoder::Decoder as TiffDecoder;
    use tiff::encoder::TiffEncoder;

    fn object_with(elements: Vec<(DicomTag, &[&str])>) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(elements.into_iter().map(|(tag, values)| {
            let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            DataElement::new(tag, VR::DS, dicom::core::PrimitiveValue::Strs(values.into()))
        }))
    }

    #[rstest]
    #[case(vec![(tags::PIXEL_SPACING, &["0.5", "0.75"][..])], Some(PixelSpacing::new(0.5, 0.75, SpacingSource::PixelSpacing)))]
    #[case(vec![(tags::IMAGER_PIXEL_SPACING, &["0.2", "0.3"][..])], Some(PixelSpacing::new(0.2, 0.3, SpacingSource::ImagerPixelSpacing)))]
    #[case(
        vec![(tags::PIXEL_SPACING, &["0.5", "0.5"][..]), (tags::IMAGER_PIXEL_SPACING, &["0.2", "0.2"][..])],
        Some(PixelSpacing::new(0.5, 0.5, SpacingSource::PixelSpacing))
    )]
    #[case(
        vec![(tags::PIXEL_SPACING, &["0", "0"][..]), (tags::IMAGER_PIXEL_SPACING, &["0.2", "0.2"][..])],
        Some(PixelSpacing::new(0.2, 0.2, SpacingSource::ImagerPixelSpacing))
    )]
    #[case(
        vec![(tags::PIXEL_SPACING, &["abc", "0.5"][..]), (tags::IMAGER_PIXEL_SPACING, &["0.2", "0.2"][..])],
        Some(PixelSpacing::new(0.2, 0.2, SpacingSource::ImagerPixelSpacing))
    )]
    #[case(vec![(tags::PIXEL_SPACING, &["abc", "0.5"][..])], None)]
    #[case(vec![(tags::PIXEL_SPACING, &["0.5"][..])], None)]
    #[case(vec![], None)]
    fn test_from_dicom(
        #[case] elements: Vec<(DicomTag, &[&str])>,
        #[case] expected: Option<PixelSpacing>,
    ) {
        let dcm = object_with(elements);
        let result = PixelSpacing::from_dicom(&dcm);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_from_dicom_native_floats() {
        let dcm = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PIXEL_SPACING,
            VR::FD,
            dicom_value!(F64, [0.976, 0.977]),
        )]);
        let result = PixelSpacing::from_dicom(&dcm).unwrap();
        assert_eq!(result.row_mm, 0.976);
        assert_eq!(result.col_mm, 0.977);
    }

    #[test]
    fn test_default_is_fallback() {
        let spacing = PixelSpacing::default();
        assert!(spacing.is_fallback());
        assert_eq!(spacing.row_mm, DEFAULT_SPACING_MM);
        assert_eq!(spacing.col_mm, DEFAULT_SPACING_MM);
    }

    #[rstest]
    #[case(VoxelSpacing::new(1.0, 1.0, 1.0), 1.0)]
    #[case(VoxelSpacing::new(0.5, 0.5, 2.5), 0.625)]
    fn test_voxel_volume(#[case] spacing: VoxelSpacing, #[case] expected: f64) {
        assert!((spacing.voxel_volume_mm3() - expected).abs() < 1e-12);
    }

    #[rstest]
    #[case(VoxelSpacing::new(0.976, 0.976, 2.5))]
    #[case(VoxelSpacing::new(1.0, 0.5, 3.0))]
    fn test_write_tags(#[case] spacing: VoxelSpacing) {
        // Prepare the TIFF
        let temp_dir = tempdir().unwrap();
        let temp_file_path = temp_dir.path().join("temp.tif");
        let mut tiff = TiffEncoder::new(File::create(temp_file_path.clone()).unwrap()).unwrap();
        let mut img = tiff
            .new_image::<tiff::encoder::colortype::Gray8>(1, 1)
            .unwrap();

        // Write the tags
        spacing.write_tags(&mut img).unwrap();

        // Write some dummy image data
        let data: Vec<u8> = vec![0; 1];
        img.write_data(data.as_slice()).unwrap();

        // Read the TIFF back
        let mut tiff = TiffDecoder::new(File::open(temp_file_path).unwrap()).unwrap();
        let actual = VoxelSpacing::try_from(&mut tiff).unwrap();
        assert_eq!(actual, spacing);

        let actual_resolution_unit = tiff
            .get_tag(Tag::ResolutionUnit)
            .unwrap()
            .into_u16()
            .unwrap();
        assert_eq!(actual_resolution_unit, ResolutionUnit::Centimeter.to_u16());
    }
}

//! CT series geometry and pixel volume.
//!
//! Slices are sorted exactly once, by the Z component of Image Position (Patient), ascending.
//! After sorting, index `i` along the third axis of the volume always corresponds to the `i`-th
//! [`SliceGeometry`]. The geometry can be detached from the pixel data with
//! [`CtVolume::into_geometry`], which is all that rasterization requires.

use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, InMemDicomObject};
use dicom::pixeldata::PixelDecoder;
use ndarray::{s, Array2, Array3};
use snafu::{ResultExt, Snafu};
use std::fmt;

use crate::errors::dicom::{ConvertValueSnafu, DicomError, PixelDataSnafu};
use crate::metadata::{PixelSpacing, VoxelSpacing};

#[derive(Debug, Snafu)]
pub enum VolumeError {
    #[snafu(display("CT volume has no slices"))]
    NoSlices,

    #[snafu(display(
        "slice {} has dimensions {}x{}, expected {}x{}",
        index,
        rows,
        cols,
        expected_rows,
        expected_cols
    ))]
    InconsistentDimensions {
        index: usize,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[snafu(display("slices {} and {} share the same Z position {}", first, second, z))]
    DuplicateSliceZ { z: f64, first: usize, second: usize },
}

/// How to order slices whose Z positions are identical
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DuplicateZPolicy {
    /// Fail with [`VolumeError::DuplicateSliceZ`]
    #[default]
    Reject,
    /// Break the tie by Instance Number, then by input order
    InstanceNumber,
}

impl fmt::Display for DuplicateZPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy_str = match self {
            DuplicateZPolicy::Reject => "reject",
            DuplicateZPolicy::InstanceNumber => "instance-number",
        };
        write!(f, "{policy_str}")
    }
}

/// Physical placement of one CT slice
#[derive(Debug, Clone, PartialEq)]
pub struct SliceGeometry {
    /// Physical coordinates (mm) of the center of the top-left pixel
    pub image_position: [f64; 3],
    pub pixel_spacing: Option<PixelSpacing>,
    pub slice_thickness: Option<f64>,
    pub instance_number: Option<i32>,
}

impl SliceGeometry {
    pub fn new(image_position: [f64; 3], pixel_spacing: Option<PixelSpacing>) -> Self {
        Self {
            image_position,
            pixel_spacing,
            slice_thickness: None,
            instance_number: None,
        }
    }

    pub fn with_slice_thickness(self, slice_thickness: f64) -> Self {
        Self {
            slice_thickness: Some(slice_thickness),
            ..self
        }
    }

    pub fn with_instance_number(self, instance_number: i32) -> Self {
        Self {
            instance_number: Some(instance_number),
            ..self
        }
    }

    pub fn z(&self) -> f64 {
        self.image_position[2]
    }

    fn from_dicom(dcm: &InMemDicomObject) -> Result<Self, DicomError> {
        let position = dcm
            .get(tags::IMAGE_POSITION_PATIENT)
            .ok_or(DicomError::MissingPropertyError {
                name: "Image Position (Patient)",
            })?
            .value()
            .to_multi_float64()
            .context(ConvertValueSnafu {
                name: "Image Position (Patient)",
            })?;
        let image_position = match position.as_slice() {
            [x, y, z] => [*x, *y, *z],
            _ => {
                return Err(DicomError::InvalidValueError {
                    name: "Image Position (Patient)",
                    value: format!("{:?}", position),
                })
            }
        };
        let pixel_spacing = PixelSpacing::from_dicom(dcm);
        let slice_thickness = dcm
            .get(tags::SLICE_THICKNESS)
            .and_then(|e| e.value().to_float64().ok());
        let instance_number = dcm
            .get(tags::INSTANCE_NUMBER)
            .and_then(|e| e.value().to_int::<i32>().ok());
        Ok(Self {
            image_position,
            pixel_spacing,
            slice_thickness,
            instance_number,
        })
    }
}

/// One decoded CT image plane
#[derive(Debug, Clone)]
pub struct CtSlice {
    /// Pixel values, shape (rows, cols)
    pub pixels: Array2<i16>,
    pub geometry: SliceGeometry,
}

impl CtSlice {
    pub fn new(pixels: Array2<i16>, geometry: SliceGeometry) -> Self {
        Self { pixels, geometry }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }
}

impl TryFrom<&FileDicomObject<InMemDicomObject>> for CtSlice {
    type Error = DicomError;

    fn try_from(dcm: &FileDicomObject<InMemDicomObject>) -> Result<Self, Self::Error> {
        let rows = dcm
            .get(tags::ROWS)
            .ok_or(DicomError::MissingPropertyError { name: "Rows" })?
            .value()
            .to_int::<i32>()
            .context(ConvertValueSnafu { name: "Rows" })? as usize;
        let cols = dcm
            .get(tags::COLUMNS)
            .ok_or(DicomError::MissingPropertyError { name: "Columns" })?
            .value()
            .to_int::<i32>()
            .context(ConvertValueSnafu { name: "Columns" })? as usize;
        let geometry = SliceGeometry::from_dicom(dcm)?;

        // Only the first frame is used, CT series store one plane per instance
        let decoded = dcm.decode_pixel_data().context(PixelDataSnafu)?;
        let values = decoded.to_vec_frame::<i16>(0).context(PixelDataSnafu)?;
        let pixels = Array2::from_shape_vec((rows, cols), values).map_err(|e| {
            DicomError::InvalidValueError {
                name: "Pixel Data",
                value: e.to_string(),
            }
        })?;
        Ok(Self { pixels, geometry })
    }
}

/// Compute the order in which slices should appear, ascending by Z
fn sorted_order(slices: &[SliceGeometry], policy: DuplicateZPolicy) -> Result<Vec<usize>, VolumeError> {
    let mut order: Vec<usize> = (0..slices.len()).collect();
    // Stable sort so that full ties keep their input order
    order.sort_by(|&a, &b| {
        let (a, b) = (&slices[a], &slices[b]);
        a.z().total_cmp(&b.z()).then_with(|| match policy {
            DuplicateZPolicy::Reject => std::cmp::Ordering::Equal,
            DuplicateZPolicy::InstanceNumber => a.instance_number.cmp(&b.instance_number),
        })
    });

    if policy == DuplicateZPolicy::Reject {
        if let Some(pair) = order
            .windows(2)
            .find(|pair| slices[pair[0]].z() == slices[pair[1]].z())
        {
            return Err(VolumeError::DuplicateSliceZ {
                z: slices[pair[0]].z(),
                first: pair[0],
                second: pair[1],
            });
        }
    }
    Ok(order)
}

/// Geometry of a sorted CT series, independent of its pixel data
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    rows: usize,
    cols: usize,
    slices: Vec<SliceGeometry>,
}

impl VolumeGeometry {
    /// Build a geometry from slices in any order. Slices are sorted by Z.
    pub fn new(
        rows: usize,
        cols: usize,
        slices: Vec<SliceGeometry>,
        policy: DuplicateZPolicy,
    ) -> Result<Self, VolumeError> {
        if slices.is_empty() {
            return Err(VolumeError::NoSlices);
        }
        let order = sorted_order(&slices, policy)?;
        let mut slices: Vec<Option<SliceGeometry>> = slices.into_iter().map(Some).collect();
        let slices = order
            .into_iter()
            .filter_map(|i| slices[i].take())
            .collect();
        Ok(Self { rows, cols, slices })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    /// Shape of the volume as (rows, cols, slices)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.slices.len())
    }

    pub fn slices(&self) -> &[SliceGeometry] {
        &self.slices
    }

    pub fn slice(&self, index: usize) -> Option<&SliceGeometry> {
        self.slices.get(index)
    }

    /// Index of the slice whose Z is closest to `z`. Ties go to the lowest index.
    pub fn nearest_slice(&self, z: f64) -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, slice) in self.slices.iter().enumerate() {
            let distance = (slice.z() - z).abs();
            if distance < best_distance {
                best = i;
                best_distance = distance;
            }
        }
        best
    }

    /// Distance between slice centers. Uses the mean Z step for multi-slice volumes,
    /// otherwise the slice thickness, otherwise `default_mm`.
    pub fn slice_spacing(&self, default_mm: f64) -> f64 {
        if self.slices.len() >= 2 {
            let first = self.slices[0].z();
            let last = self.slices[self.slices.len() - 1].z();
            let step = (last - first).abs() / (self.slices.len() - 1) as f64;
            if step > 0.0 {
                return step;
            }
        }
        self.slices[0]
            .slice_thickness
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(default_mm)
    }

    /// Voxel size of the volume. In-plane spacing is taken from the first slice, falling
    /// back to `default_mm` when it is unknown.
    pub fn voxel_spacing(&self, default_mm: f64) -> VoxelSpacing {
        let in_plane = self.slices[0]
            .pixel_spacing
            .unwrap_or_else(|| PixelSpacing::isotropic(default_mm));
        VoxelSpacing::from_pixel_spacing(&in_plane, self.slice_spacing(default_mm))
    }
}

/// A sorted CT series, shape (rows, cols, slices)
#[derive(Debug, Clone)]
pub struct CtVolume {
    pixels: Array3<i16>,
    geometry: VolumeGeometry,
}

impl CtVolume {
    pub fn from_slices(slices: Vec<CtSlice>, policy: DuplicateZPolicy) -> Result<Self, VolumeError> {
        let (rows, cols) = slices.first().ok_or(VolumeError::NoSlices)?.dim();
        if let Some((index, slice)) = slices
            .iter()
            .enumerate()
            .find(|(_, slice)| slice.dim() != (rows, cols))
        {
            let (found_rows, found_cols) = slice.dim();
            return Err(VolumeError::InconsistentDimensions {
                index,
                rows: found_rows,
                cols: found_cols,
                expected_rows: rows,
                expected_cols: cols,
            });
        }

        let geometries: Vec<SliceGeometry> = slices.iter().map(|s| s.geometry.clone()).collect();
        let order = sorted_order(&geometries, policy)?;

        let mut pixels = Array3::<i16>::zeros((rows, cols, slices.len()));
        for (i, &source) in order.iter().enumerate() {
            pixels
                .slice_mut(s![.., .., i])
                .assign(&slices[source].pixels);
        }
        let slices = order
            .into_iter()
            .map(|i| geometries[i].clone())
            .collect();

        tracing::debug!("Built CT volume of shape {:?}", pixels.dim());
        Ok(Self {
            pixels,
            geometry: VolumeGeometry { rows, cols, slices },
        })
    }

    pub fn pixels(&self) -> &Array3<i16> {
        &self.pixels
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.geometry.shape()
    }

    /// Release the pixel data, keeping only the geometry
    pub fn into_geometry(self) -> VolumeGeometry {
        self.geometry
    }
}

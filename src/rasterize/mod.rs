//! Conversion of planar ROI contours into a voxel mask aligned with a CT volume.
//!
//! Each contour is assigned to the slice whose Z is nearest to the contour's Z, converted from
//! patient coordinates into pixel indices using that slice's origin and pixel spacing, and filled
//! into the slice. Contours on the same slice are combined by union, so overlapping contours
//! (including holes) never clear voxels.

mod polygon;

pub use polygon::{fill_polygon, PixelVertex};

use ndarray::{Array3, ArrayView3, Axis};
use std::collections::BTreeSet;

use crate::analyze::{analyze, AnalyzeError, VolumeStatistics};
use crate::errors::RoiError;
use crate::metadata::{PixelSpacing, RoiLabel, VoxelSpacing};
use crate::structure_set::{Contour, RoiSelector, StructureSet};
use crate::volume::{SliceGeometry, VolumeGeometry};

/// What to do when a slice has no usable pixel spacing
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacingFallback {
    /// Use the configured default spacing and record the fallback
    #[default]
    UseDefault,
    /// Fail the ROI with [`RoiError::MissingPixelSpacing`]
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RasterizerConfig {
    /// Spacing used for slices without Pixel Spacing or Imager Pixel Spacing
    pub default_spacing: PixelSpacing,
    pub spacing_fallback: SpacingFallback,
}

/// Why a contour was left out of a mask
#[derive(Debug, Clone, PartialEq)]
pub enum ContourIssue {
    /// Fewer points than needed to enclose an area
    Malformed { contour: usize, points: usize },
    /// A coordinate is NaN or infinite
    NonFinite { contour: usize },
}

impl std::fmt::Display for ContourIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContourIssue::Malformed { contour, points } => {
                write!(f, "contour {} has only {} point(s)", contour, points)
            }
            ContourIssue::NonFinite { contour } => {
                write!(f, "contour {} has non-finite coordinates", contour)
            }
        }
    }
}

/// Slices whose pixel transform used the configured default spacing
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryFallbackUsed {
    pub slices: Vec<usize>,
    pub spacing: PixelSpacing,
}

/// Non-fatal events recorded while rasterizing a ROI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterDiagnostics {
    pub contours_drawn: usize,
    pub skipped: Vec<ContourIssue>,
    pub geometry_fallback: Option<GeometryFallbackUsed>,
}

/// Binary voxel mask of one ROI, shape (rows, cols, slices), values 0 or 1
#[derive(Debug, Clone)]
pub struct RoiMask {
    label: RoiLabel,
    mask: Array3<u8>,
    spacing: VoxelSpacing,
    diagnostics: RasterDiagnostics,
}

impl RoiMask {
    pub fn number(&self) -> i32 {
        self.label.number
    }

    pub fn name(&self) -> Option<&str> {
        self.label.name.as_deref()
    }

    pub fn label(&self) -> &RoiLabel {
        &self.label
    }

    pub fn mask(&self) -> ArrayView3<u8> {
        self.mask.view()
    }

    pub fn into_mask(self) -> Array3<u8> {
        self.mask
    }

    pub fn spacing(&self) -> &VoxelSpacing {
        &self.spacing
    }

    pub fn diagnostics(&self) -> &RasterDiagnostics {
        &self.diagnostics
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.mask.dim()
    }

    pub fn analyze(&self) -> Result<VolumeStatistics, AnalyzeError> {
        analyze(self.mask.view(), &self.spacing)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rasterizer {
    config: RasterizerConfig,
}

impl Rasterizer {
    pub fn new(config: RasterizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RasterizerConfig {
        &self.config
    }

    /// Pixel spacing for a slice, and whether the configured default was used
    fn resolve_spacing(
        &self,
        index: usize,
        slice: &SliceGeometry,
    ) -> Result<(PixelSpacing, bool), RoiError> {
        match (slice.pixel_spacing, self.config.spacing_fallback) {
            (Some(spacing), _) => Ok((spacing, false)),
            (None, SpacingFallback::UseDefault) => Ok((self.config.default_spacing, true)),
            (None, SpacingFallback::Reject) => Err(RoiError::MissingPixelSpacing { slice: index }),
        }
    }

    /// Voxel spacing of the output mask, resolved the same way as the pixel transform
    fn voxel_spacing(&self, geometry: &VolumeGeometry) -> VoxelSpacing {
        let default_mm = self.config.default_spacing.row_mm;
        let in_plane = geometry
            .slices()
            .first()
            .and_then(|slice| slice.pixel_spacing)
            .unwrap_or(self.config.default_spacing);
        VoxelSpacing::from_pixel_spacing(&in_plane, geometry.slice_spacing(default_mm))
    }

    /// Rasterize the selected ROI into a mask with the shape of `geometry`
    pub fn rasterize(
        &self,
        geometry: &VolumeGeometry,
        structure_set: &StructureSet,
        selector: &RoiSelector,
    ) -> Result<RoiMask, RoiError> {
        let number = structure_set.resolve(selector)?;
        let label = RoiLabel::new(number, structure_set.name(number).map(str::to_string));
        let contours = structure_set.contours(number);
        tracing::debug!("Rasterizing ROI {} with {} contour(s)", label, contours.len());

        let mut mask = Array3::<u8>::zeros(geometry.shape());
        let mut diagnostics = RasterDiagnostics::default();
        let mut fallback_slices = BTreeSet::new();

        for (index, contour) in contours.iter().enumerate() {
            if let Some(issue) = check_contour(index, contour) {
                tracing::warn!("Skipping contour of ROI {}: {}", label, issue);
                diagnostics.skipped.push(issue);
                continue;
            }
            let Some(z) = contour.z() else {
                continue;
            };

            let slice_index = geometry.nearest_slice(z);
            let slice = &geometry.slices()[slice_index];
            let (spacing, fallback) = self.resolve_spacing(slice_index, slice)?;
            if fallback {
                fallback_slices.insert(slice_index);
            }

            let vertices = to_pixels(contour, slice, &spacing);
            let mut plane = mask.index_axis_mut(Axis(2), slice_index);
            fill_polygon(&mut plane, &vertices);
            diagnostics.contours_drawn += 1;
            tracing::trace!(
                "Contour {} of ROI {} at z={} drawn on slice {}",
                index,
                label,
                z,
                slice_index
            );
        }

        if !fallback_slices.is_empty() {
            tracing::warn!(
                "ROI {}: {} slice(s) have no pixel spacing, using default {}x{} mm",
                label,
                fallback_slices.len(),
                self.config.default_spacing.row_mm,
                self.config.default_spacing.col_mm
            );
            diagnostics.geometry_fallback = Some(GeometryFallbackUsed {
                slices: fallback_slices.into_iter().collect(),
                spacing: self.config.default_spacing,
            });
        }

        Ok(RoiMask {
            label,
            mask,
            spacing: self.voxel_spacing(geometry),
            diagnostics,
        })
    }
}

fn check_contour(index: usize, contour: &Contour) -> Option<ContourIssue> {
    if !contour.is_well_formed() {
        return Some(ContourIssue::Malformed {
            contour: index,
            points: contour.len(),
        });
    }
    if contour.points().iter().flatten().any(|v| !v.is_finite()) {
        return Some(ContourIssue::NonFinite { contour: index });
    }
    None
}

/// Convert patient coordinates to pixel indices. Image Position (Patient) is the center of the
/// first transmitted pixel, X runs along columns and Y along rows.
fn to_pixels(contour: &Contour, slice: &SliceGeometry, spacing: &PixelSpacing) -> Vec<PixelVertex> {
    let [origin_x, origin_y, _] = slice.image_position;
    contour
        .points()
        .iter()
        .map(|[x, y, _]| {
            let col = ((x - origin_x) / spacing.col_mm).trunc() as i64;
            let row = ((y - origin_y) / spacing.row_mm).trunc() as i64;
            PixelVertex::new(row, col)
        })
        .collect()
}

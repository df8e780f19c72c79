//! Volumetric and shape statistics of a binary voxel mask.
//!
//! Volumes are reported in cubic centimeters, while the bounding box and centroid are reported
//! in voxel index coordinates (row, col, slice).

use ndarray::{ArrayView3, Axis};
use serde::Serialize;
use snafu::Snafu;

use crate::metadata::VoxelSpacing;

const MM3_PER_CM3: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum AnalyzeError {
    #[snafu(display("mask of shape {:?} has no nonzero voxels", shape))]
    EmptyMask { shape: [usize; 3] },
}

/// Inclusive voxel index bounds of the nonzero region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
    pub slice_min: usize,
    pub slice_max: usize,
}

impl BoundingBox {
    fn point(row: usize, col: usize, slice: usize) -> Self {
        Self {
            row_min: row,
            row_max: row,
            col_min: col,
            col_max: col,
            slice_min: slice,
            slice_max: slice,
        }
    }

    fn include(&mut self, row: usize, col: usize, slice: usize) {
        self.row_min = self.row_min.min(row);
        self.row_max = self.row_max.max(row);
        self.col_min = self.col_min.min(col);
        self.col_max = self.col_max.max(col);
        self.slice_min = self.slice_min.min(slice);
        self.slice_max = self.slice_max.max(slice);
    }

    /// Extent along each axis as (rows, cols, slices)
    pub fn size(&self) -> [usize; 3] {
        [
            self.row_max - self.row_min + 1,
            self.col_max - self.col_min + 1,
            self.slice_max - self.slice_min + 1,
        ]
    }
}

/// Voxel counts over the slices that contain at least one nonzero voxel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActiveSliceSummary {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeStatistics {
    pub shape: [usize; 3],
    pub spacing: VoxelSpacing,
    pub total_voxels: usize,
    pub volume_mm3: f64,
    pub volume_cm3: f64,
    pub volume_ml: f64,
    pub voxels_per_slice: Vec<usize>,
    pub slices_active: usize,
    pub slice_range: [usize; 2],
    pub slice_extent: usize,
    pub voxels_per_active_slice: ActiveSliceSummary,
    pub centroid: [f64; 3],
    pub bbox: BoundingBox,
    pub bbox_size: [usize; 3],
}

/// Compute statistics of a mask with shape (rows, cols, slices). Any nonzero value counts as
/// part of the region.
pub fn analyze(
    mask: ArrayView3<u8>,
    spacing: &VoxelSpacing,
) -> Result<VolumeStatistics, AnalyzeError> {
    let (rows, cols, slices) = mask.dim();
    let shape = [rows, cols, slices];

    let mut total_voxels = 0_usize;
    let mut index_sum = [0_f64; 3];
    let mut bbox: Option<BoundingBox> = None;
    for ((row, col, slice), _) in mask.indexed_iter().filter(|(_, v)| **v != 0) {
        total_voxels += 1;
        index_sum[0] += row as f64;
        index_sum[1] += col as f64;
        index_sum[2] += slice as f64;
        match bbox.as_mut() {
            Some(bbox) => bbox.include(row, col, slice),
            None => bbox = Some(BoundingBox::point(row, col, slice)),
        }
    }
    let bbox = bbox.ok_or(AnalyzeError::EmptyMask { shape })?;

    let voxels_per_slice: Vec<usize> = mask
        .axis_iter(Axis(2))
        .map(|plane| plane.iter().filter(|v| **v != 0).count())
        .collect();
    let active: Vec<usize> = voxels_per_slice
        .iter()
        .copied()
        .filter(|count| *count > 0)
        .collect();
    let voxels_per_active_slice = ActiveSliceSummary {
        min: active.iter().copied().min().unwrap_or(0),
        max: active.iter().copied().max().unwrap_or(0),
        mean: total_voxels as f64 / active.len() as f64,
    };

    let volume_mm3 = total_voxels as f64 * spacing.voxel_volume_mm3();
    let volume_cm3 = volume_mm3 / MM3_PER_CM3;
    let count = total_voxels as f64;
    let bbox_size = bbox.size();

    Ok(VolumeStatistics {
        shape,
        spacing: *spacing,
        total_voxels,
        volume_mm3,
        volume_cm3,
        volume_ml: volume_cm3,
        slices_active: active.len(),
        slice_range: [bbox.slice_min, bbox.slice_max],
        slice_extent: bbox_size[2],
        voxels_per_slice,
        voxels_per_active_slice,
        centroid: [
            index_sum[0] / count,
            index_sum[1] / count,
            index_sum[2] / count,
        ],
        bbox,
        bbox_size,
    })
}

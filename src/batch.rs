//! Rasterize and analyze several ROIs of a structure set in parallel.

use rayon::prelude::*;
use snafu::Snafu;

use crate::analyze::{AnalyzeError, VolumeStatistics};
use crate::errors::RoiError;
use crate::rasterize::{Rasterizer, RoiMask};
use crate::structure_set::{RoiSelector, StructureSet};
use crate::volume::VolumeGeometry;

#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum RoiFailure {
    #[snafu(display("rasterization failed: {}", source))]
    Rasterize { source: RoiError },

    #[snafu(display("analysis failed: {}", source))]
    Analyze { source: AnalyzeError },
}

/// Which ROIs to extract
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Selection {
    #[default]
    All,
    Only(Vec<RoiSelector>),
}

impl Selection {
    /// An empty list of selectors selects every ROI
    pub fn from_selectors(selectors: Vec<RoiSelector>) -> Self {
        if selectors.is_empty() {
            Selection::All
        } else {
            Selection::Only(selectors)
        }
    }

    fn selectors(&self, structure_set: &StructureSet) -> Vec<RoiSelector> {
        match self {
            Selection::All => structure_set
                .roi_numbers()
                .into_iter()
                .map(RoiSelector::Number)
                .collect(),
            Selection::Only(selectors) => selectors.clone(),
        }
    }
}

#[derive(Debug)]
pub struct RoiOutcome {
    pub selector: RoiSelector,
    /// ROI number, when the selector could be resolved
    pub number: Option<i32>,
    pub name: Option<String>,
    pub result: Result<(RoiMask, VolumeStatistics), RoiFailure>,
}

impl RoiOutcome {
    /// Label used for report keys and log messages
    pub fn display_name(&self) -> String {
        match (&self.name, self.number) {
            (Some(name), _) => name.clone(),
            (None, Some(number)) => format!("ROI {number}"),
            (None, None) => self.selector.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn extract_one(
    geometry: &VolumeGeometry,
    structure_set: &StructureSet,
    rasterizer: &Rasterizer,
    selector: RoiSelector,
) -> RoiOutcome {
    let number = structure_set.resolve(&selector).ok();
    let name = number.and_then(|n| structure_set.name(n).map(str::to_string));
    let result = rasterizer
        .rasterize(geometry, structure_set, &selector)
        .map_err(|source| RoiFailure::Rasterize { source })
        .and_then(|mask| match mask.analyze() {
            Ok(stats) => Ok((mask, stats)),
            Err(source) => Err(RoiFailure::Analyze { source }),
        });
    if let Err(e) = &result {
        tracing::warn!("ROI {}: {}", selector, e);
    }
    RoiOutcome {
        selector,
        number,
        name,
        result,
    }
}

/// Extract the selected ROIs. Every selected ROI yields exactly one outcome, in ascending ROI
/// number for [`Selection::All`] and in selection order otherwise.
pub fn extract(
    geometry: &VolumeGeometry,
    structure_set: &StructureSet,
    rasterizer: &Rasterizer,
    selection: &Selection,
) -> Vec<RoiOutcome> {
    selection
        .selectors(structure_set)
        .into_par_iter()
        .map(|selector| extract_one(geometry, structure_set, rasterizer, selector))
        .collect()
}

//! RT Structure Set contents: ROI identities and their planar contours.
//!
//! The ROI Number is the primary key. ROI names are not guaranteed to be unique, so a lookup by
//! name fails explicitly when more than one ROI shares the requested name.

use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use itertools::Itertools;
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::dicom::{ConvertValueSnafu, DicomError};
use crate::errors::RoiError;

/// Identifies a ROI by number or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoiSelector {
    Number(i32),
    Name(String),
}

impl fmt::Display for RoiSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoiSelector::Number(number) => write!(f, "#{number}"),
            RoiSelector::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<i32> for RoiSelector {
    fn from(number: i32) -> Self {
        RoiSelector::Number(number)
    }
}

impl From<&str> for RoiSelector {
    fn from(name: &str) -> Self {
        RoiSelector::Name(name.to_string())
    }
}

/// One closed planar polygon in patient coordinates (mm).
/// The last point implicitly connects back to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    points: Vec<[f64; 3]>,
}

impl Contour {
    /// Minimum number of points for a contour to enclose an area
    pub const MIN_POINTS: usize = 3;

    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self { points }
    }

    /// Build a contour from flat DICOM Contour Data (x1, y1, z1, x2, ...).
    /// Values that do not complete a triplet are dropped.
    pub fn from_flat(values: &[f64]) -> Self {
        if values.len() % 3 != 0 {
            tracing::warn!(
                "Contour Data has {} values, dropping {} trailing value(s)",
                values.len(),
                values.len() % 3
            );
        }
        let points = values
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Z of the contour plane, taken from its first point
    pub fn z(&self) -> Option<f64> {
        self.points.first().map(|p| p[2])
    }

    pub fn is_well_formed(&self) -> bool {
        self.points.len() >= Self::MIN_POINTS
    }
}

/// Summary of one ROI, as listed by `rtstruct-rois`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiSummary {
    pub roi_number: i32,
    pub roi_name: Option<String>,
    pub num_contours: usize,
    pub num_planes: usize,
}

/// Parsed RT Structure Set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureSet {
    names: BTreeMap<i32, Option<String>>,
    contours: BTreeMap<i32, Vec<Contour>>,
}

impl StructureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roi(mut self, number: i32, name: &str) -> Self {
        self.names.insert(number, Some(name.to_string()));
        self
    }

    pub fn with_contours(mut self, number: i32, contours: Vec<Contour>) -> Self {
        self.contours.entry(number).or_default().extend(contours);
        self
    }

    /// All ROI numbers, from either the ROI definitions or the contour data, ascending
    pub fn roi_numbers(&self) -> Vec<i32> {
        self.names
            .keys()
            .chain(self.contours.keys())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect()
    }

    pub fn contains(&self, number: i32) -> bool {
        self.names.contains_key(&number) || self.contours.contains_key(&number)
    }

    pub fn name(&self, number: i32) -> Option<&str> {
        self.names.get(&number).and_then(|name| name.as_deref())
    }

    /// Contours of a ROI. A ROI without contour data has none.
    pub fn contours(&self, number: i32) -> &[Contour] {
        self.contours
            .get(&number)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolve a selector to a ROI number
    pub fn resolve(&self, selector: &RoiSelector) -> Result<i32, RoiError> {
        match selector {
            RoiSelector::Number(number) if self.contains(*number) => Ok(*number),
            RoiSelector::Number(_) => Err(RoiError::RoiNotFound {
                selector: selector.clone(),
            }),
            RoiSelector::Name(name) => {
                let numbers: Vec<i32> = self
                    .names
                    .iter()
                    .filter(|(_, n)| n.as_deref() == Some(name.as_str()))
                    .map(|(number, _)| *number)
                    .collect();
                match numbers.as_slice() {
                    [] => Err(RoiError::RoiNotFound {
                        selector: selector.clone(),
                    }),
                    [number] => Ok(*number),
                    _ => Err(RoiError::AmbiguousRoiName {
                        name: name.clone(),
                        numbers,
                    }),
                }
            }
        }
    }

    pub fn summaries(&self) -> Vec<RoiSummary> {
        self.roi_numbers()
            .into_iter()
            .map(|number| {
                let contours = self.contours(number);
                let num_planes = contours
                    .iter()
                    .filter_map(Contour::z)
                    .map(f64::to_bits)
                    .unique()
                    .count();
                RoiSummary {
                    roi_number: number,
                    roi_name: self.name(number).map(str::to_string),
                    num_contours: contours.len(),
                    num_planes,
                }
            })
            .collect()
    }
}

fn read_roi_number(item: &InMemDicomObject, tag: dicom::core::Tag, name: &'static str) -> Result<i32, DicomError> {
    item.get(tag)
        .ok_or(DicomError::MissingPropertyError { name })?
        .value()
        .to_int::<i32>()
        .context(ConvertValueSnafu { name })
}

/// Unreadable Contour Data yields an empty contour, which rasterization skips as malformed
fn read_contour(item: &InMemDicomObject, roi_number: i32, index: usize) -> Contour {
    let Some(element) = item.get(tags::CONTOUR_DATA) else {
        return Contour::new(Vec::new());
    };
    match element.value().to_multi_float64() {
        Ok(values) => Contour::from_flat(&values),
        Err(e) => {
            tracing::warn!(
                "ROI {} contour {}: unreadable Contour Data: {}",
                roi_number,
                index,
                e
            );
            Contour::new(Vec::new())
        }
    }
}

impl TryFrom<&InMemDicomObject> for StructureSet {
    type Error = DicomError;

    /// Read the Structure Set ROI Sequence and the ROI Contour Sequence. Absent sequences
    /// result in an empty structure set rather than an error. Items without a usable ROI
    /// number are skipped with a warning.
    fn try_from(dcm: &InMemDicomObject) -> Result<Self, Self::Error> {
        let mut structure_set = StructureSet::new();

        let rois = dcm
            .get(tags::STRUCTURE_SET_ROI_SEQUENCE)
            .and_then(|e| e.items())
            .unwrap_or_default();
        for item in rois {
            let number = match read_roi_number(item, tags::ROI_NUMBER, "ROI Number") {
                Ok(number) => number,
                Err(e) => {
                    tracing::warn!("Skipping Structure Set ROI item: {}", e);
                    continue;
                }
            };
            let name = item
                .get(tags::ROI_NAME)
                .and_then(|e| e.value().to_str().ok())
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
            if structure_set.names.insert(number, name).is_some() {
                tracing::warn!("ROI number {} defined more than once, keeping the last definition", number);
            }
        }

        let roi_contours = dcm
            .get(tags::ROI_CONTOUR_SEQUENCE)
            .and_then(|e| e.items())
            .unwrap_or_default();
        for item in roi_contours {
            let number =
                match read_roi_number(item, tags::REFERENCED_ROI_NUMBER, "Referenced ROI Number") {
                    Ok(number) => number,
                    Err(e) => {
                        tracing::warn!("Skipping ROI Contour item: {}", e);
                        continue;
                    }
                };
            let contours = item
                .get(tags::CONTOUR_SEQUENCE)
                .and_then(|e| e.items())
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(index, contour)| read_contour(contour, number, index));
            // A ROI may appear without any contour data
            structure_set.contours.entry(number).or_default().extend(contours);
        }

        tracing::debug!(
            "Parsed structure set with {} ROI(s)",
            structure_set.roi_numbers().len()
        );
        Ok(structure_set)
    }
}

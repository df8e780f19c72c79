//! Discovery of a CT series and its RT Structure Set in a directory.

use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

use crate::errors::DicomError;
use crate::file::{default_bar, DicomFileOperations, InodeSort};
use crate::structure_set::StructureSet;
use crate::volume::{CtSlice, CtVolume, DuplicateZPolicy, VolumeError};

const CT_MODALITY: &str = "CT";
const RTSTRUCT_MODALITY: &str = "RTSTRUCT";

#[derive(Debug, Snafu)]
pub enum StudyError {
    #[snafu(display("invalid study directory {}: {}", path.display(), source))]
    InvalidSourcePath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("no CT slices found in {}", path.display()))]
    NoCtSlices { path: PathBuf },

    #[snafu(display("no RT Structure Set found in {}", path.display()))]
    NoRtStruct { path: PathBuf },

    #[snafu(display("found {} CT slice(s), at least {} required", found, min))]
    TooFewSlices { found: usize, min: usize },

    #[snafu(display("error reading RT Structure Set {}: {}", path.display(), source))]
    StructureSet {
        path: PathBuf,
        #[snafu(source(from(DicomError, Box::new)))]
        source: Box<DicomError>,
    },

    #[snafu(display("error building CT volume: {}", source))]
    Volume {
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudyOptions {
    pub duplicate_z: DuplicateZPolicy,
    /// Minimum number of CT slices for a study to be accepted
    pub min_slices: usize,
}

impl Default for StudyOptions {
    fn default() -> Self {
        Self {
            duplicate_z: DuplicateZPolicy::default(),
            min_slices: 1,
        }
    }
}

/// A CT volume together with the structure set drawn on it
#[derive(Debug)]
pub struct Study {
    pub volume: CtVolume,
    pub structure_set: StructureSet,
    pub rtstruct_path: PathBuf,
}

enum Instance {
    Ct(Box<CtSlice>),
    RtStruct(PathBuf, DefaultDicomObject),
    Other,
}

fn modality(dcm: &DefaultDicomObject) -> Option<String> {
    dcm.get(tags::MODALITY)
        .and_then(|e| e.value().to_str().ok())
        .map(|m| m.trim().to_uppercase())
}

/// Read and classify one file. Unreadable files are logged and skipped.
fn read_instance(path: PathBuf) -> Option<Instance> {
    let dcm = match path.dcmread() {
        Ok(dcm) => dcm,
        Err(e) => {
            tracing::warn!("Skipping unreadable file {}: {}", path.display(), e);
            return None;
        }
    };
    match modality(&dcm).as_deref() {
        Some(CT_MODALITY) => match CtSlice::try_from(&dcm) {
            Ok(slice) => Some(Instance::Ct(Box::new(slice))),
            Err(e) => {
                tracing::warn!("Skipping CT file {}: {}", path.display(), e);
                None
            }
        },
        Some(RTSTRUCT_MODALITY) => Some(Instance::RtStruct(path, dcm)),
        _ => Some(Instance::Other),
    }
}

impl Study {
    /// Load every DICOM file below `dir`, building the CT volume and parsing the RT Structure
    /// Set. When several structure sets are present, the first by path is used.
    pub fn load<P: AsRef<Path>>(dir: P, options: &StudyOptions) -> Result<Self, StudyError> {
        let dir = dir.as_ref();
        let paths: Vec<PathBuf> = dir
            .find_dicoms()
            .context(InvalidSourcePathSnafu { path: dir })?
            .sorted_by_inode()
            .collect();
        tracing::info!("Found {} DICOM file(s) in {}", paths.len(), dir.display());

        let pb = default_bar(paths.len() as u64);
        pb.set_message("Reading DICOM files");
        let instances: Vec<Instance> = paths
            .into_par_iter()
            .progress_with(pb)
            .filter_map(read_instance)
            .collect();

        let mut slices = Vec::new();
        let mut rtstructs = Vec::new();
        for instance in instances {
            match instance {
                Instance::Ct(slice) => slices.push(*slice),
                Instance::RtStruct(path, dcm) => rtstructs.push((path, dcm)),
                Instance::Other => {}
            }
        }

        rtstructs.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut rtstructs = rtstructs.into_iter();
        let (rtstruct_path, rtstruct) = rtstructs
            .next()
            .ok_or_else(|| StudyError::NoRtStruct { path: dir.into() })?;
        let ignored = rtstructs.count();
        if ignored > 0 {
            tracing::warn!(
                "Found {} additional RT Structure Set(s), using {}",
                ignored,
                rtstruct_path.display()
            );
        }

        if slices.is_empty() {
            return NoCtSlicesSnafu { path: dir }.fail();
        }
        if slices.len() < options.min_slices {
            return TooFewSlicesSnafu {
                found: slices.len(),
                min: options.min_slices,
            }
            .fail();
        }

        let structure_set = StructureSet::try_from(&*rtstruct).context(StructureSetSnafu {
            path: rtstruct_path.as_path(),
        })?;
        let volume = CtVolume::from_slices(slices, options.duplicate_z).context(VolumeSnafu)?;
        tracing::info!(
            "Loaded CT volume of shape {:?} and {} ROI(s) from {}",
            volume.shape(),
            structure_set.roi_numbers().len(),
            rtstruct_path.display()
        );

        Ok(Self {
            volume,
            structure_set,
            rtstruct_path,
        })
    }
}

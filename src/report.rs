//! Aggregated per-ROI results, written as a JSON report and a per-slice CSV distribution.

use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::analyze::VolumeStatistics;
use crate::batch::RoiOutcome;
use crate::metadata::RoiLabel;
use crate::rasterize::{RasterDiagnostics, RoiMask};

pub const REPORT_FILENAME: &str = "analysis_report.json";
pub const DISTRIBUTION_FILENAME: &str = "slice_distribution.csv";

#[derive(Debug, Snafu)]
pub enum ReportError {
    #[snafu(display("could not create report {}", path.display()))]
    CreateReport {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("could not serialize report {}", path.display()))]
    SerializeReport {
        path: PathBuf,
        #[snafu(source(from(serde_json::Error, Box::new)))]
        source: Box<serde_json::Error>,
    },

    #[snafu(display("could not write CSV {}", path.display()))]
    WriteCsv {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },
}

/// How faithfully a mask reflects its contours. Absent for masks analyzed offline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterSummary {
    pub contours_drawn: usize,
    pub skipped_contours: Vec<String>,
    /// Slices rasterized with the configured default spacing instead of a DICOM attribute
    pub geometry_fallback_slices: Vec<usize>,
}

impl From<&RasterDiagnostics> for RasterSummary {
    fn from(diagnostics: &RasterDiagnostics) -> Self {
        Self {
            contours_drawn: diagnostics.contours_drawn,
            skipped_contours: diagnostics.skipped.iter().map(|i| i.to_string()).collect(),
            geometry_fallback_slices: diagnostics
                .geometry_fallback
                .as_ref()
                .map(|fallback| fallback.slices.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Statistics {
        roi_number: i32,
        roi_name: Option<String>,
        #[serde(flatten)]
        statistics: VolumeStatistics,
        #[serde(flatten)]
        rasterization: Option<RasterSummary>,
    },
    Failure {
        roi_number: Option<i32>,
        roi_name: Option<String>,
        error: String,
    },
}

/// Report entries keyed by ROI file stem, so that ROIs sharing a name stay separate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalysisReport {
    entries: BTreeMap<String, ReportEntry>,
}

#[derive(Debug, Serialize)]
struct SliceRow<'a> {
    roi: &'a str,
    slice: usize,
    voxels: usize,
}

impl AnalysisReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_statistics(&mut self, label: &RoiLabel, statistics: VolumeStatistics) {
        self.entries.insert(
            label.file_stem(),
            ReportEntry::Statistics {
                roi_number: label.number,
                roi_name: label.name.clone(),
                statistics,
                rasterization: None,
            },
        );
    }

    /// Insert the statistics of a freshly rasterized mask along with its diagnostics
    pub fn insert_mask_statistics(&mut self, mask: &RoiMask, statistics: VolumeStatistics) {
        let label = mask.label();
        self.entries.insert(
            label.file_stem(),
            ReportEntry::Statistics {
                roi_number: label.number,
                roi_name: label.name.clone(),
                statistics,
                rasterization: Some(mask.diagnostics().into()),
            },
        );
    }

    pub fn insert_failure<E: Display>(
        &mut self,
        key: String,
        roi_number: Option<i32>,
        roi_name: Option<String>,
        error: &E,
    ) {
        self.entries.insert(
            key,
            ReportEntry::Failure {
                roi_number,
                roi_name,
                error: error.to_string(),
            },
        );
    }

    pub fn from_outcomes(outcomes: &[RoiOutcome]) -> Self {
        let mut report = Self::new();
        for outcome in outcomes {
            match &outcome.result {
                Ok((mask, statistics)) => report.insert_mask_statistics(mask, statistics.clone()),
                Err(e) => {
                    let key = match outcome.number {
                        Some(number) => RoiLabel::new(number, outcome.name.clone()).file_stem(),
                        None => outcome.selector.to_string(),
                    };
                    report.insert_failure(key, outcome.number, outcome.name.clone(), e);
                }
            }
        }
        report
    }

    pub fn entries(&self) -> &BTreeMap<String, ReportEntry> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&ReportEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_failures(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, ReportEntry::Failure { .. }))
            .count()
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let path = path.as_ref();
        let file = File::create(path).context(CreateReportSnafu { path })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context(SerializeReportSnafu { path })?;
        tracing::info!("Wrote report with {} ROI(s) to {}", self.len(), path.display());
        Ok(())
    }

    /// Write one `roi,slice,voxels` row for every slice of every successfully analyzed ROI
    pub fn write_slice_distribution_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).context(WriteCsvSnafu { path })?;
        for (key, entry) in self.entries.iter() {
            let ReportEntry::Statistics { statistics, .. } = entry else {
                continue;
            };
            for (slice, voxels) in statistics.voxels_per_slice.iter().enumerate() {
                writer
                    .serialize(SliceRow {
                        roi: key,
                        slice,
                        voxels: *voxels,
                    })
                    .context(WriteCsvSnafu { path })?;
            }
        }
        writer
            .flush()
            .map_err(csv::Error::from)
            .context(WriteCsvSnafu { path })?;
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::Parser;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, Level};

use dicom_rtstruct::batch::{extract, RoiOutcome, Selection};
use dicom_rtstruct::file::default_bar;
use dicom_rtstruct::metadata::PixelSpacing;
use dicom_rtstruct::rasterize::{Rasterizer, RasterizerConfig, SpacingFallback};
use dicom_rtstruct::report::{
    AnalysisReport, ReportError, DISTRIBUTION_FILENAME, REPORT_FILENAME,
};
use dicom_rtstruct::save::{save_active_slices_png, MaskSaver, SaveError, SupportedCompressor};
use dicom_rtstruct::structure_set::RoiSelector;
use dicom_rtstruct::study::{Study, StudyError, StudyOptions};
use dicom_rtstruct::volume::DuplicateZPolicy;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display("Failed to create directory: {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Failed to load study: {}", source))]
    LoadStudy {
        #[snafu(source(from(StudyError, Box::new)))]
        source: Box<StudyError>,
    },

    #[snafu(display("Failed to save mask {}: {}", path.display(), source))]
    SaveMask {
        path: PathBuf,
        #[snafu(source(from(SaveError, Box::new)))]
        source: Box<SaveError>,
    },

    #[snafu(display("Failed to write report: {}", source))]
    WriteReport {
        #[snafu(source(from(ReportError, Box::new)))]
        source: Box<ReportError>,
    },

    #[snafu(display("Structure set contains no ROIs"))]
    NoRois,

    #[snafu(display("All {} ROI(s) failed", count))]
    AllRoisFailed { count: usize },
}

fn parse_spacing(s: &str) -> Result<f64, clap::Error> {
    match s.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(clap::Error::raw(
            ErrorKind::InvalidValue,
            "Spacing must be a positive number of millimeters",
        )),
    }
}

#[derive(Parser, Debug)]
#[command(author = "Scott Chase Waggener", version = env!("CARGO_PKG_VERSION"), about = "Rasterize RT Structure Set ROIs into voxel masks and report their volumes", long_about = None)]
struct Args {
    #[arg(help = "Directory containing the CT series and its RT Structure Set")]
    source: PathBuf,

    #[arg(help = "Output directory for masks and the analysis report")]
    output: PathBuf,

    #[arg(
        help = "ROI number to extract. May be repeated. Extracts all ROIs when no ROI is selected",
        long = "roi-number",
        short = 'r'
    )]
    roi_numbers: Vec<i32>,

    #[arg(
        help = "ROI name to extract. May be repeated. Fails for names shared by several ROIs",
        long = "roi-name",
        short = 'n'
    )]
    roi_names: Vec<String>,

    #[arg(
        help = "Compression type",
        long = "compressor",
        short = 'z',
        value_parser = clap::value_parser!(SupportedCompressor),
        default_value_t = SupportedCompressor::default(),
    )]
    compressor: SupportedCompressor,

    #[arg(
        help = "Also write a PNG for every slice containing the ROI",
        long = "png",
        default_value_t = false
    )]
    png: bool,

    #[arg(
        help = "Fail ROIs drawn on slices without pixel spacing instead of using the default spacing",
        long = "strict-spacing",
        default_value_t = false
    )]
    strict_spacing: bool,

    #[arg(
        help = "How to order slices sharing the same Z position",
        long = "duplicate-z",
        value_parser = clap::value_parser!(DuplicateZPolicy),
        default_value_t = DuplicateZPolicy::default(),
    )]
    duplicate_z: DuplicateZPolicy,

    #[arg(
        help = "Pixel spacing in mm for slices without spacing attributes",
        long = "default-spacing",
        value_parser = parse_spacing,
        default_value_t = 1.0
    )]
    default_spacing: f64,

    #[arg(
        help = "Minimum number of CT slices required",
        long = "min-slices",
        default_value_t = 1
    )]
    min_slices: usize,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
}

impl Args {
    fn study_options(&self) -> StudyOptions {
        StudyOptions {
            duplicate_z: self.duplicate_z,
            min_slices: self.min_slices,
        }
    }

    fn rasterizer_config(&self) -> RasterizerConfig {
        RasterizerConfig {
            default_spacing: PixelSpacing::isotropic(self.default_spacing),
            spacing_fallback: match self.strict_spacing {
                true => SpacingFallback::Reject,
                false => SpacingFallback::UseDefault,
            },
        }
    }

    fn selection(&self) -> Selection {
        let selectors = self
            .roi_numbers
            .iter()
            .map(|n| RoiSelector::Number(*n))
            .chain(self.roi_names.iter().map(|n| RoiSelector::Name(n.clone())))
            .collect();
        Selection::from_selectors(selectors)
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

fn save_outcome(outcome: &RoiOutcome, saver: &MaskSaver, dest: &Path, png: bool) -> Result<(), Error> {
    let Ok((mask, _)) = &outcome.result else {
        return Ok(());
    };
    let stem = mask.label().file_stem();
    let path = dest.join(format!("{stem}.tiff"));
    saver.save(mask, &path).context(SaveMaskSnafu { path: &path })?;
    if png {
        let dir = dest.join(format!("{stem}_slices"));
        save_active_slices_png(mask.mask(), &dir).context(SaveMaskSnafu { path: &dir })?;
    }
    Ok(())
}

fn print_summary(outcomes: &[RoiOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok((mask, stats)) => {
                println!(
                    "{}: {} voxels, {:.3} cm3, slices {}-{} ({} active)",
                    mask.label(),
                    stats.total_voxels,
                    stats.volume_cm3,
                    stats.slice_range[0],
                    stats.slice_range[1],
                    stats.slices_active
                );
                let diagnostics = mask.diagnostics();
                if !diagnostics.skipped.is_empty() {
                    println!("  {} contour(s) skipped", diagnostics.skipped.len());
                }
                if let Some(fallback) = &diagnostics.geometry_fallback {
                    println!(
                        "  default pixel spacing used on {} slice(s)",
                        fallback.slices.len()
                    );
                }
            }
            Err(e) => println!("{}: {}", outcome.display_name(), e),
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    if args.output.is_file() {
        return InvalidOutputPathSnafu { path: args.output }.fail();
    }
    std::fs::create_dir_all(&args.output).context(CreateDirSnafu {
        path: args.output.clone(),
    })?;

    let study = Study::load(&args.source, &args.study_options()).context(LoadStudySnafu)?;
    let structure_set = study.structure_set;
    // Only the geometry is needed from here on
    let geometry = study.volume.into_geometry();

    let rasterizer = Rasterizer::new(args.rasterizer_config());
    let outcomes = extract(&geometry, &structure_set, &rasterizer, &args.selection());
    if outcomes.is_empty() {
        return NoRoisSnafu.fail();
    }

    let saver = MaskSaver::new(args.compressor.into());
    let pb = default_bar(outcomes.len() as u64);
    pb.set_message("Saving masks");
    outcomes
        .par_iter()
        .progress_with(pb)
        .try_for_each(|outcome| save_outcome(outcome, &saver, &args.output, args.png))?;

    let report = AnalysisReport::from_outcomes(&outcomes);
    report
        .write_json(args.output.join(REPORT_FILENAME))
        .context(WriteReportSnafu)?;
    report
        .write_slice_distribution_csv(args.output.join(DISTRIBUTION_FILENAME))
        .context(WriteReportSnafu)?;
    print_summary(&outcomes);

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed == outcomes.len() {
        return AllRoisFailedSnafu { count: failed }.fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::{tags, uids};
    use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
    use dicom_rtstruct::save::load_mask;
    use rstest::rstest;
    use tempfile::tempdir;

    fn strs(values: &[f64]) -> PrimitiveValue {
        PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
    }

    fn write_file(dcm: InMemDicomObject, sop_class: &str, uid: &str, path: &Path) {
        dcm.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(uid),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
    }

    /// Eight 16x16 CT slices 2 mm apart, and an RT Structure Set with a 4x4 mm square on
    /// slices 2 and 3, an empty ROI, and two ROIs sharing a name.
    fn write_study(dir: &Path) {
        write_study_with_spacing(dir, true)
    }

    fn write_study_with_spacing(dir: &Path, pixel_spacing: bool) {
        for i in 0..8 {
            let mut dcm = InMemDicomObject::from_element_iter([
                DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
                DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
                DataElement::new(
                    tags::PHOTOMETRIC_INTERPRETATION,
                    VR::CS,
                    PrimitiveValue::from("MONOCHROME2"),
                ),
                DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
                DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)),
                DataElement::new(
                    tags::IMAGE_POSITION_PATIENT,
                    VR::DS,
                    strs(&[0.0, 0.0, 2.0 * i as f64]),
                ),
                DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(vec![0; 256].into())),
            ]);
            if pixel_spacing {
                dcm.put(DataElement::new(tags::PIXEL_SPACING, VR::DS, strs(&[1.0, 1.0])));
            }
            let uid = format!("1.2.3.{i}");
            write_file(dcm, uids::CT_IMAGE_STORAGE, &uid, &dir.join(format!("CT{i}.dcm")));
        }

        let roi = |number: i32, name: &str| {
            InMemDicomObject::from_element_iter([
                DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from(number.to_string())),
                DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from(name)),
            ])
        };
        let contour = |z: f64| {
            InMemDicomObject::from_element_iter([DataElement::new(
                tags::CONTOUR_DATA,
                VR::DS,
                strs(&[2.0, 2.0, z, 6.0, 2.0, z, 6.0, 6.0, z, 2.0, 6.0, z]),
            )])
        };
        let gtv = InMemDicomObject::from_element_iter([
            DataElement::new(tags::REFERENCED_ROI_NUMBER, VR::IS, PrimitiveValue::from("1")),
            DataElement::new(
                tags::CONTOUR_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![contour(4.0), contour(6.0)]),
            ),
        ]);
        let rtstruct = InMemDicomObject::from_element_iter([
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("RTSTRUCT")),
            DataElement::new(
                tags::STRUCTURE_SET_ROI_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![roi(1, "GTV"), roi(2, "Empty"), roi(3, "Lung"), roi(4, "Lung")]),
            ),
            DataElement::new(tags::ROI_CONTOUR_SEQUENCE, VR::SQ, DataSetSequence::from(vec![gtv])),
        ]);
        write_file(rtstruct, uids::RT_STRUCTURE_SET_STORAGE, "1.2.3.100", &dir.join("RS.dcm"));
    }

    fn report_has_error(output: &Path, key: &str) -> bool {
        let report: serde_json::Value = serde_json::from_reader(
            std::fs::File::open(output.join(REPORT_FILENAME)).unwrap(),
        )
        .unwrap();
        report[key]["error"].is_string()
    }

    fn args(source: &Path, output: &Path) -> Args {
        Args {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            roi_numbers: vec![],
            roi_names: vec![],
            compressor: SupportedCompressor::default(),
            png: false,
            strict_spacing: false,
            duplicate_z: DuplicateZPolicy::default(),
            default_spacing: 1.0,
            min_slices: 1,
            verbose: false,
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_run(#[case] png: bool) {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_study(source.path());

        let args = Args {
            png,
            ..args(source.path(), output.path())
        };
        run(args).unwrap();

        let (mask, metadata) = load_mask(output.path().join("1_GTV.tiff")).unwrap();
        assert_eq!(mask.dim(), (16, 16, 8));
        assert_eq!(mask.iter().filter(|v| **v == 1).count(), 50);
        assert_eq!(metadata.roi.name.as_deref(), Some("GTV"));
        assert_eq!(metadata.spacing.slice_mm, 2.0);
        assert_eq!(output.path().join("1_GTV_slices/slice_002.png").is_file(), png);

        // ROIs without contours are reported but have no mask
        assert!(!output.path().join("2_Empty.tiff").exists());
        assert!(!output.path().join("3_Lung.tiff").exists());
        assert!(report_has_error(output.path(), "4_Lung"));

        let report: serde_json::Value = serde_json::from_reader(
            std::fs::File::open(output.path().join(REPORT_FILENAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(report["1_GTV"]["total_voxels"], 50);
        assert_eq!(report["1_GTV"]["slice_range"], serde_json::json!([2, 3]));
        assert_eq!(report["1_GTV"]["contours_drawn"], 2);
        assert_eq!(report["1_GTV"]["skipped_contours"], serde_json::json!([]));
        assert_eq!(report["1_GTV"]["geometry_fallback_slices"], serde_json::json!([]));
        assert!(report["2_Empty"]["error"].is_string());
        assert!(output.path().join(DISTRIBUTION_FILENAME).is_file());
    }

    #[test]
    fn test_run_without_pixel_spacing() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_study_with_spacing(source.path(), false);

        run(args(source.path(), output.path())).unwrap();

        let report: serde_json::Value = serde_json::from_reader(
            std::fs::File::open(output.path().join(REPORT_FILENAME)).unwrap(),
        )
        .unwrap();
        // The default spacing matches the study's true spacing, so the mask is unchanged
        assert_eq!(report["1_GTV"]["total_voxels"], 50);
        assert_eq!(report["1_GTV"]["geometry_fallback_slices"], serde_json::json!([2, 3]));
    }

    #[test]
    fn test_run_without_pixel_spacing_strict() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_study_with_spacing(source.path(), false);

        let args = Args {
            roi_numbers: vec![1],
            strict_spacing: true,
            ..args(source.path(), output.path())
        };
        let result = run(args);
        assert!(matches!(result, Err(Error::AllRoisFailed { count: 1 })));
        assert!(report_has_error(output.path(), "1_GTV"));
    }

    #[test]
    fn test_run_selected_rois() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_study(source.path());

        let args = Args {
            roi_numbers: vec![1],
            roi_names: vec!["Lung".to_string()],
            ..args(source.path(), output.path())
        };
        run(args).unwrap();

        let report: serde_json::Value = serde_json::from_reader(
            std::fs::File::open(output.path().join(REPORT_FILENAME)).unwrap(),
        )
        .unwrap();
        let entries = report.as_object().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(report["'Lung'"]["error"]
            .as_str()
            .unwrap()
            .contains("shared by ROIs"));
    }

    #[test]
    fn test_run_all_failed() {
        let source = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_study(source.path());

        let args = Args {
            roi_numbers: vec![2, 42],
            ..args(source.path(), output.path())
        };
        let result = run(args);
        assert!(matches!(result, Err(Error::AllRoisFailed { count: 2 })));
    }

    #[test]
    fn test_run_missing_source() {
        let output = tempdir().unwrap();
        let result = run(args(&output.path().join("missing"), output.path()));
        assert!(matches!(result, Err(Error::LoadStudy { .. })));
    }

    #[rstest]
    #[case("1.5", true)]
    #[case("0", false)]
    #[case("-1", false)]
    #[case("abc", false)]
    fn test_parse_spacing(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(parse_spacing(value).is_ok(), ok);
    }

    #[test]
    fn test_rasterizer_config() {
        let output = tempdir().unwrap();
        let args = Args {
            strict_spacing: true,
            default_spacing: 0.5,
            ..args(output.path(), output.path())
        };
        let config = args.rasterizer_config();
        assert_eq!(config.spacing_fallback, SpacingFallback::Reject);
        assert_eq!(config.default_spacing.row_mm, 0.5);
    }
}

use clap::Parser;
use dicom_rtstruct::analyze::analyze;
use dicom_rtstruct::file::{default_bar, TiffFileOperations};
use dicom_rtstruct::report::{AnalysisReport, ReportError, DISTRIBUTION_FILENAME, REPORT_FILENAME};
use dicom_rtstruct::save::load_mask;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::{Path, PathBuf};
use tracing::{error, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("No TIFF files found in source path: {}", path.display()))]
    NoSources { path: PathBuf },

    #[snafu(display("Failed to write report: {}", source))]
    WriteReport {
        #[snafu(source(from(ReportError, Box::new)))]
        source: Box<ReportError>,
    },
}

#[derive(Parser, Debug)]
#[command(
    author = "Scott Chase Waggener",
    version = env!("CARGO_PKG_VERSION"),
    about = "Compute volume and shape statistics of ROI mask TIFFs",
    long_about = None
)]
struct Args {
    #[arg(help = "Directory containing mask TIFF files")]
    source: PathBuf,

    #[arg(
        help = "Output JSON report. Defaults to analysis_report.json in the source directory",
        long = "output",
        short = 'o'
    )]
    output: Option<PathBuf>,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
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

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Analyze every mask, collecting failures into the report rather than aborting
fn analyze_masks(sources: Vec<PathBuf>) -> AnalysisReport {
    let pb = default_bar(sources.len() as u64);
    pb.set_message("Analyzing masks");
    let results: Vec<_> = sources
        .into_par_iter()
        .progress_with(pb)
        .map(|path| {
            let result = load_mask(&path).map(|(mask, metadata)| {
                let statistics = analyze(mask.view(), &metadata.spacing);
                (metadata, statistics)
            });
            (path, result)
        })
        .collect();

    let mut report = AnalysisReport::new();
    for (path, result) in results {
        match result {
            Ok((metadata, Ok(statistics))) => report.insert_statistics(&metadata.roi, statistics),
            Ok((metadata, Err(e))) => {
                tracing::warn!("{}: {}", path.display(), e);
                report.insert_failure(
                    metadata.roi.file_stem(),
                    Some(metadata.roi.number),
                    metadata.roi.name.clone(),
                    &e,
                );
            }
            Err(e) => {
                error!("Error reading {}: {}", path.display(), e);
                report.insert_failure(file_stem(&path), None, None, &e);
            }
        }
    }
    report
}

fn run(args: Args) -> Result<(), Error> {
    if !args.source.is_dir() {
        return InvalidSourcePathSnafu { path: args.source }.fail();
    }
    let sources = args
        .source
        .find_tiffs()
        .map_err(|_| Error::InvalidSourcePath {
            path: args.source.clone(),
        })?;
    if sources.is_empty() {
        return NoSourcesSnafu { path: args.source }.fail();
    }
    tracing::info!("Number of masks found: {}", sources.len());

    let report = analyze_masks(sources);
    let output = args
        .output
        .unwrap_or_else(|| args.source.join(REPORT_FILENAME));
    report.write_json(&output).context(WriteReportSnafu)?;
    report
        .write_slice_distribution_csv(output.with_file_name(DISTRIBUTION_FILENAME))
        .context(WriteReportSnafu)?;

    println!(
        "Analyzed {} mask(s), {} failed. Report written to {}",
        report.len(),
        report.num_failures(),
        output.display()
    );
    Ok(())
}

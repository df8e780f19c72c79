use clap::Parser;
use dicom_rtstruct::errors::DicomError;
use dicom_rtstruct::file::DicomFileOperations;
use dicom_rtstruct::structure_set::{RoiSummary, StructureSet};
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("Error reading {}: {}", path.display(), source))]
    ReadDicom {
        path: PathBuf,
        #[snafu(source(from(dicom::object::ReadError, Box::new)))]
        source: Box<dicom::object::ReadError>,
    },

    #[snafu(display("Error parsing structure set {}: {}", path.display(), source))]
    ParseStructureSet {
        path: PathBuf,
        #[snafu(source(from(DicomError, Box::new)))]
        source: Box<DicomError>,
    },

    #[snafu(display("Error serializing ROI list: {:?}", source))]
    Serialize {
        #[snafu(source(from(serde_json::Error, Box::new)))]
        source: Box<serde_json::Error>,
    },

    #[snafu(display("IO error: {:?}", source))]
    IO {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

#[derive(Parser, Debug)]
#[command(
    author = "Scott Chase Waggener",
    version = env!("CARGO_PKG_VERSION"),
    about = "List the ROIs of an RT Structure Set",
    long_about = None
)]
struct Args {
    #[arg(help = "RT Structure Set file")]
    source: PathBuf,

    #[arg(help = "Print the ROI list as JSON", long = "json", default_value_t = false)]
    json: bool,

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

    run(args, &mut std::io::stdout()).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

fn load_summaries(path: &PathBuf) -> Result<Vec<RoiSummary>, Error> {
    if !path.is_file() {
        return InvalidSourcePathSnafu { path }.fail();
    }
    let dcm = path.dcmread().context(ReadDicomSnafu { path })?;
    let structure_set = StructureSet::try_from(&*dcm).context(ParseStructureSetSnafu { path })?;
    Ok(structure_set.summaries())
}

fn write_table<W: Write>(summaries: &[RoiSummary], out: &mut W) -> Result<(), Error> {
    writeln!(out, "{:>6}  {:<32}  {:>8}  {:>6}", "number", "name", "contours", "planes")
        .context(IOSnafu)?;
    for summary in summaries {
        writeln!(
            out,
            "{:>6}  {:<32}  {:>8}  {:>6}",
            summary.roi_number,
            summary.roi_name.as_deref().unwrap_or("-"),
            summary.num_contours,
            summary.num_planes
        )
        .context(IOSnafu)?;
    }
    Ok(())
}

fn run<W: Write>(args: Args, out: &mut W) -> Result<(), Error> {
    let summaries = load_summaries(&args.source)?;
    tracing::info!("Found {} ROI(s) in {}", summaries.len(), args.source.display());
    if args.json {
        serde_json::to_writer_pretty(&mut *out, &summaries).context(SerializeSnafu)?;
        writeln!(out).context(IOSnafu)?;
    } else {
        write_table(&summaries, out)?;
    }
    Ok(())
}

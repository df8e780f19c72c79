use dicom::object::{open_file, DefaultDicomObject, ReadError};
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use itertools::Itertools;
use rust_search::SearchBuilder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tiff::decoder::Decoder;
use tiff::TiffError;

const DICM_PREFIX: &[u8; 4] = b"DICM";
const DICM_PREFIX_LOCATION: u64 = 128;

const BAR_TEMPLATE: &str =
    "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec})";
const SPINNER_TEMPLATE: &str = "{spinner:.blue} {msg}";

type IOResult<T> = Result<T, std::io::Error>;

pub fn default_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len).with_style(style)
}

fn default_spinner() -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    ProgressBar::new_spinner().with_style(style)
}

/// Walk every file below `dir`, failing up front if `dir` is not a directory.
fn walk(dir: &Path) -> IOResult<impl Iterator<Item = PathBuf>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a directory: {}", dir.display()),
        ));
    }
    Ok(SearchBuilder::default()
        .location(dir)
        .build()
        .map(PathBuf::from))
}

/// Unreadable paths sort first.
fn inode_or_zero(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.ino()).unwrap_or(0)
}

/// Reading a series in inode order keeps disk seeks short on spinning storage.
pub trait InodeSort<P>
where
    P: AsRef<Path>,
    Self: Iterator<Item = P> + Sized,
{
    fn sorted_by_inode(self) -> impl Iterator<Item = P> {
        let pb = match self.size_hint() {
            (_, Some(total)) => default_bar(total as u64),
            (_, None) => default_spinner(),
        };
        pb.set_message("Sorting paths by inode");
        self.map(|p| (inode_or_zero(p.as_ref()), p))
            .progress_with(pb)
            .sorted_unstable_by_key(|(i, _)| *i)
            .map(|(_, p)| p)
    }
}

impl<P: AsRef<Path>, I: Iterator<Item = P>> InodeSort<P> for I {}

pub trait DicomFileOperations
where
    Self: AsRef<Path>,
{
    /// Check if a file has a DICM prefix after the 128 byte preamble.
    /// Only fails if the file cannot be opened; short files are not DICOM.
    fn has_dicm_prefix(&self) -> IOResult<bool> {
        let mut reader = File::open(self.as_ref())?;
        let mut buffer = [0; DICM_PREFIX.len()];
        let found = reader
            .seek(SeekFrom::Start(DICM_PREFIX_LOCATION))
            .and_then(|_| reader.read_exact(&mut buffer))
            .is_ok_and(|_| &buffer == DICM_PREFIX);
        Ok(found)
    }

    fn has_dicom_extension(&self) -> bool {
        matches!(
            self.as_ref().extension().and_then(|e| e.to_str()),
            Some("dcm" | "dicom" | "DCM" | "DICOM")
        )
    }

    /// Check if a path is a DICOM file. Treatment planning exports frequently omit the
    /// extension, in which case the DICM prefix decides.
    fn is_dicom_file(&self) -> IOResult<bool> {
        let path = self.as_ref();
        if self.has_dicom_extension() {
            Ok(path.is_file())
        } else if path.extension().is_some() || path.is_dir() {
            Ok(false)
        } else {
            self.has_dicm_prefix()
        }
    }

    /// Recursively find all DICOM files below a directory, ticking a spinner per match.
    fn find_dicoms(&self) -> IOResult<impl Iterator<Item = PathBuf>> {
        let spinner = default_spinner();
        spinner.set_message("Searching for DICOM files");
        let result = walk(self.as_ref())?
            .filter(|file| file.is_dicom_file().unwrap_or(false))
            .inspect(move |_| spinner.tick());
        Ok(result)
    }

    fn dcmread(&self) -> Result<DefaultDicomObject, ReadError> {
        open_file(self.as_ref())
    }
}

impl<P: AsRef<Path>> DicomFileOperations for P {}

pub trait TiffFileOperations
where
    Self: AsRef<Path>,
{
    fn has_tiff_extension(&self) -> bool {
        matches!(
            self.as_ref().extension().and_then(|e| e.to_str()),
            Some("tiff" | "tif" | "TIFF" | "TIF")
        )
    }

    /// Find all TIFF files below a directory, sorted by path so reports are reproducible.
    /// Extensionless TIFF files are not recognized.
    fn find_tiffs(&self) -> IOResult<Vec<PathBuf>> {
        let result = walk(self.as_ref())?
            .filter(|file| file.is_file() && file.has_tiff_extension())
            .sorted()
            .collect();
        Ok(result)
    }

    fn tiffread(&self) -> Result<Decoder<BufReader<File>>, TiffError> {
        let file = File::open(self.as_ref())?;
        Decoder::new(BufReader::new(file))
    }
}

impl<P: AsRef<Path>> TiffFileOperations for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ct_file;

    use rstest::rstest;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn write_ct(path: &Path) {
        ct_file(2, 2, [0.0, 0.0, 0.0], None, None, &[0, 1, 2, 3])
            .write_to_file(path)
            .unwrap();
    }

    #[rstest]
    #[case::empty_file(vec![], false)]
    #[case::dicm_prefix(b"DICM".to_vec(), true)]
    #[case::wrong_prefix(b"NOT_DICM".to_vec(), false)]
    fn test_has_dicm_prefix(#[case] contents: Vec<u8>, #[case] expected: bool) {
        let mut temp = NamedTempFile::new().unwrap();
        temp.seek(SeekFrom::Start(DICM_PREFIX_LOCATION)).unwrap();
        temp.write_all(&contents).unwrap();
        assert_eq!(temp.path().has_dicm_prefix().unwrap(), expected);
    }

    #[test]
    fn test_has_dicm_prefix_written_dicom() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ct");
        write_ct(&path);
        assert!(path.has_dicm_prefix().unwrap());
        assert!(path.is_dicom_file().unwrap());
    }

    #[rstest]
    #[case::no_extension("test", false)]
    #[case::wrong_extension("test.txt", false)]
    #[case::dcm_extension("test.dcm", true)]
    #[case::dicom_extension("test.dicom", true)]
    #[case::dcm_extension_uppercase("test.DCM", true)]
    #[case::mixed_case("test.DiCoM", false)]
    fn test_has_dicom_extension(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(PathBuf::from(path).has_dicom_extension(), expected);
    }

    #[rstest]
    #[case::tif("mask.tif", true)]
    #[case::tiff_uppercase("mask.TIFF", true)]
    #[case::png("mask.png", false)]
    fn test_has_tiff_extension(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(PathBuf::from(path).has_tiff_extension(), expected);
    }

    #[test]
    fn test_find_dicom_files() {
        let temp_dir = tempdir().unwrap();

        let dicom_dest = temp_dir.path().join("test.dcm");
        write_ct(&dicom_dest);
        std::fs::write(temp_dir.path().join("test.txt"), "not a DICOM file").unwrap();

        // Extensionless file in a subdirectory
        let sub_dir = temp_dir.path().join("subdir");
        std::fs::create_dir(&sub_dir).unwrap();
        let sub_dicom = sub_dir.join("RS1");
        write_ct(&sub_dicom);
        // Extensionless file without the DICM prefix
        std::fs::write(sub_dir.join("README"), "plain text").unwrap();

        let files: Vec<_> = temp_dir.path().find_dicoms().unwrap().collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p == &dicom_dest));
        assert!(files.iter().any(|p| p == &sub_dicom));
    }

    #[test]
    fn test_find_dicoms_not_a_directory() {
        let temp = NamedTempFile::new().unwrap();
        assert!(temp.path().find_dicoms().is_err());
    }

    #[test]
    fn test_find_tiffs_sorted() {
        let temp_dir = tempdir().unwrap();
        for name in ["b.tiff", "a.tif", "c.png"] {
            std::fs::write(temp_dir.path().join(name), "").unwrap();
        }
        let files = temp_dir.path().find_tiffs().unwrap();
        assert_eq!(
            files,
            vec![temp_dir.path().join("a.tif"), temp_dir.path().join("b.tiff")]
        );
    }

    #[test]
    fn test_inode_sort() {
        let temp_dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (1..=3)
            .map(|i| {
                let path = temp_dir.path().join(format!("file{i}.txt"));
                std::fs::write(&path, format!("file{i}")).unwrap();
                path
            })
            .collect();

        let missing = temp_dir.path().join("missing.txt");
        let shuffled = vec![paths[1].clone(), missing.clone(), paths[2].clone(), paths[0].clone()];
        let sorted: Vec<_> = shuffled.into_iter().sorted_by_inode().collect();

        assert_eq!(sorted.len(), 4);
        assert_eq!(sorted[0], missing);
        let inodes: Vec<u64> = sorted.iter().map(|p| inode_or_zero(p)).collect();
        assert!(inodes.windows(2).all(|w| w[0] <= w[1]));
    }
}

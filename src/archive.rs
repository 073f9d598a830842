//! Compressed archives of dumps and directory trees.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Display, Error, From)]
/// Errors on writing an archive.
pub enum ArchiveError {
    /// Reading a file to archive or writing the archive failed.
    #[display("Archive I/O failed: {_0}")]
    Io(io::Error),
    /// The zip writer failed.
    #[display("Zip error: {_0}")]
    Zip(ZipError),
    /// Walking the directory to archive failed.
    #[display("Walking the directory failed: {_0}")]
    Walk(walkdir::Error),
    /// An entry can't be expressed as a path relative to the archived root.
    #[display("Path {} can't be archived", _0.display())]
    #[from(ignore)]
    InvalidPath(#[error(ignore)] PathBuf),
}

/// Capabilities of an archive back-end.
pub trait ArchiveWriter {
    /// Adds the content of `src` as `name`.
    fn add_file(&mut self, src: &Path, name: &str) -> Result<(), ArchiveError>;

    /// Adds an (empty) directory entry.
    fn add_directory(&mut self, name: &str) -> Result<(), ArchiveError>;

    /// Finishes the archive, no entries can be added afterwards.
    fn finish(self: Box<Self>) -> Result<(), ArchiveError>;
}

/// Zip archive written in-process.
pub struct ZipArchiveWriter {
    zip: ZipWriter<BufWriter<File>>,
    options: SimpleFileOptions,
}

impl ZipArchiveWriter {
    /// Creates a new archive at `path`, failing if it already exists.
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::create_new(path)?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        Ok(Self {
            zip: ZipWriter::new(BufWriter::new(file)),
            options,
        })
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_file(&mut self, src: &Path, name: &str) -> Result<(), ArchiveError> {
        log::trace!(target: "archive", "Adding {} as {name}", src.display());
        let mut file = File::open(src)?;
        self.zip.start_file(name, self.options)?;
        io::copy(&mut file, &mut self.zip)?;
        Ok(())
    }

    fn add_directory(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.zip.add_directory(name, self.options)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), ArchiveError> {
        let writer = self.zip.finish()?;
        writer.into_inner().map_err(|e| e.into_error())?;
        Ok(())
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<String, ArchiveError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ArchiveError::InvalidPath(path.to_path_buf()))?;

    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(parts.join("/"))
}

fn is_same_file(path: &Path, canonical: &Path) -> bool {
    path.file_name() == canonical.file_name()
        && fs::canonicalize(path).is_ok_and(|path| path == canonical)
}

/// Recursively adds every file and directory below `root`, keeping paths
/// relative to `root`. Returns the number of files added.
///
/// `skip` is left out, e.g. the archive itself when it is written below `root`.
pub fn add_tree(
    archive: &mut dyn ArchiveWriter,
    root: &Path,
    skip: Option<&Path>,
) -> Result<usize, ArchiveError> {
    let skip = skip.and_then(|path| fs::canonicalize(path).ok());
    let mut files = 0;

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = entry_name(root, entry.path())?;

        if skip.as_deref().is_some_and(|skip| is_same_file(entry.path(), skip)) {
            log::debug!(target: "archive", "Skipping {}", entry.path().display());
        } else if entry.file_type().is_dir() {
            archive.add_directory(&format!("{name}/"))?;
        } else if entry.file_type().is_file() {
            archive.add_file(entry.path(), &name)?;
            files += 1;
        } else {
            log::debug!(target: "archive", "Skipping special file {}", entry.path().display());
        }
    }

    Ok(files)
}

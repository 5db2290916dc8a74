//! Unpacks downloaded archives into their destination.
//!
//! Hosting services wrap the repository contents in a single folder named
//! after the repository and branch. Extraction unpacks into a scratch
//! directory next to the downloaded archive, checks that exactly that one
//! folder is present and then moves its children into the destination.
//! Nothing outside the destination is written, and the destination is left
//! untouched until the archive has been unpacked and its layout checked.
use std::{
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use fs_err::{self as fs, File};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::instrument;

use crate::{
    access::AccessScope,
    consts,
    download::TemporaryArtifact,
    error::ExtractionError,
    progress::{NoProgressHandler, ProgressHandler},
    resolver::ArchiveFormat,
};

/// The destination directory after a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContentRoot {
    path: PathBuf,
    entries: Vec<String>,
}

impl ExtractedContentRoot {
    fn read(path: &Path) -> Result<Self, ExtractionError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            entries.push(entry?.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted names of the direct children of the content root.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Unpacks [`TemporaryArtifact`]s.
#[derive(Clone)]
pub struct ArchiveExtractor {
    progress: Arc<dyn ProgressHandler>,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self {
            progress: Arc::new(NoProgressHandler),
        }
    }
}

impl ArchiveExtractor {
    #[must_use]
    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = handler;
        self
    }

    /// Extracts `artifact` into `destination` on a blocking thread.
    ///
    /// The artifact is consumed and deleted once extraction finishes. `scope`
    /// ends when the blocking work ends, even if the returned future is
    /// dropped before that.
    pub async fn extract(
        &self,
        artifact: TemporaryArtifact,
        destination: &Path,
        scope: AccessScope,
    ) -> Result<ExtractedContentRoot, ExtractionError> {
        self.extract_holding(artifact, destination, scope).await
    }

    /// Like [`Self::extract`], but keeps `held` alive until the blocking work
    /// has stopped touching `destination`.
    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub(crate) async fn extract_holding<H: Send + 'static>(
        &self,
        artifact: TemporaryArtifact,
        destination: &Path,
        held: H,
    ) -> Result<ExtractedContentRoot, ExtractionError> {
        let destination = destination.to_path_buf();
        let handler = self.progress.clone();

        tokio::task::spawn_blocking(move || {
            let result = extract_artifact(&artifact, &destination, handler.as_ref());
            drop(held);
            result
        })
        .await
        .map_err(|err| ExtractionError::Filesystem(format!("the extraction task failed: {err}")))?
    }
}

/// Extracts `artifact` into `destination`, replacing its previous contents.
pub fn extract_artifact(
    artifact: &TemporaryArtifact,
    destination: &Path,
    handler: &dyn ProgressHandler,
) -> Result<ExtractedContentRoot, ExtractionError> {
    // Removed on drop, whichever way this function returns.
    let scratch = scratch_dir(artifact)?;

    match artifact.format() {
        ArchiveFormat::Zip => unpack_zip(artifact.path(), scratch.path(), handler)?,
        ArchiveFormat::TarGz => unpack_tar_gz(artifact.path(), scratch.path(), handler)?,
    }

    let wrapper = locate_wrapper(scratch.path())?;
    tracing::debug!(
        "moving the contents of {} into {}",
        wrapper.display(),
        destination.display()
    );

    prepare_destination(destination)?;
    move_children(&wrapper, destination)?;
    let root = ExtractedContentRoot::read(destination)?;

    scratch.close()?;
    Ok(root)
}

/// Creates a fresh scratch directory in the directory holding `artifact`.
///
/// The destination may be the only place the caller's access guard covers,
/// so its parent is never written to.
fn scratch_dir(artifact: &TemporaryArtifact) -> Result<TempDir, ExtractionError> {
    let parent = match artifact.path().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::temp_dir(),
    };

    Ok(tempfile::Builder::new()
        .prefix(consts::SCRATCH_PREFIX)
        .tempdir_in(parent)?)
}

fn bytes_progress_bar(handler: &dyn ProgressHandler, len: u64, prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(len).with_style(handler.default_bytes_style());
    bar.set_prefix(prefix.to_string());
    handler.add_progress_bar(bar)
}

fn unpack_zip(
    archive: &Path,
    target: &Path,
    handler: &dyn ProgressHandler,
) -> Result<(), ExtractionError> {
    let len = fs::metadata(archive)?.len();
    let progress_bar = bytes_progress_bar(handler, len, "Extracting zip");

    let file = File::open(archive)?;
    let buf_reader = BufReader::with_capacity(1024 * 1024, file);
    let wrapped = progress_bar.wrap_read(buf_reader);

    let mut archive = zip::ZipArchive::new(wrapped).map_err(zip_error)?;
    archive.extract(target).map_err(zip_error)?;

    progress_bar.finish_with_message("Extracted");
    Ok(())
}

fn unpack_tar_gz(
    archive: &Path,
    target: &Path,
    handler: &dyn ProgressHandler,
) -> Result<(), ExtractionError> {
    let len = fs::metadata(archive)?.len();
    let progress_bar = bytes_progress_bar(handler, len, "Extracting tar");

    let file = File::open(archive)?;
    let buf_reader = BufReader::with_capacity(1024 * 1024, file);
    let wrapped = progress_bar.wrap_read(buf_reader);

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(wrapped));
    archive.unpack(target).map_err(tar_error)?;

    progress_bar.finish_with_message("Extracted");
    Ok(())
}

fn zip_error(err: zip::result::ZipError) -> ExtractionError {
    match err {
        zip::result::ZipError::Io(err) => io_or_corrupt(err),
        err => ExtractionError::CorruptArchive(err.to_string()),
    }
}

fn tar_error(err: std::io::Error) -> ExtractionError {
    io_or_corrupt(err)
}

/// Decoding failures surface as I/O errors, only environment problems count
/// as file system failures.
fn io_or_corrupt(err: std::io::Error) -> ExtractionError {
    match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::StorageFull | ErrorKind::ReadOnlyFilesystem => {
            ExtractionError::Filesystem(err.to_string())
        }
        _ => ExtractionError::CorruptArchive(err.to_string()),
    }
}

/// Returns the single folder the archive wrapped its contents in.
fn locate_wrapper(scratch: &Path) -> Result<PathBuf, ExtractionError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(scratch)? {
        let entry = entry?;
        found.push((entry.file_name(), entry.file_type()?.is_dir()));
    }

    match found.as_slice() {
        [(name, true)] => Ok(scratch.join(name)),
        _ => {
            let mut names: Vec<String> = found
                .iter()
                .map(|(name, is_dir)| {
                    let mut name = name.to_string_lossy().into_owned();
                    if *is_dir {
                        name.push('/');
                    }
                    name
                })
                .collect();
            names.sort();
            Err(ExtractionError::UnexpectedLayout { found: names })
        }
    }
}

/// Empties `destination`, or creates it when it does not exist yet.
fn prepare_destination(destination: &Path) -> Result<(), ExtractionError> {
    match fs::symlink_metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {
            for entry in fs::read_dir(destination)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            Ok(())
        }
        Ok(_) => Err(ExtractionError::Filesystem(format!(
            "the destination {} exists but is not a directory",
            destination.display()
        ))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(fs::create_dir_all(destination)?),
        Err(err) => Err(err.into()),
    }
}

/// Moves every direct child of `src` into `dest`, keeping names.
fn move_children(src: &Path, dest: &Path) -> Result<(), ExtractionError> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        match fs::rename(entry.path(), &target) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                if entry.file_type()?.is_dir() {
                    let options = fs_extra::dir::CopyOptions::new();
                    fs_extra::dir::move_dir(entry.path(), dest, &options)?;
                } else {
                    let options = fs_extra::file::CopyOptions::new();
                    fs_extra::file::move_file(entry.path(), &target, &options)?;
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

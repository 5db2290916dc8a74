use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use fs_err::tokio as async_fs;
use futures::StreamExt;
use indicatif::ProgressBar;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

use crate::{
    access::AccessScope,
    consts,
    error::DownloadError,
    progress::{NoProgressHandler, ProgressHandler},
    resolver::{ArchiveFormat, ArchiveLocation},
};

/// A downloaded archive waiting to be extracted.
///
/// The file is removed when the artifact is dropped.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: TempPath,
    format: ArchiveFormat,
}

impl TemporaryArtifact {
    /// Wraps an archive that is already on disk.
    pub fn new(path: TempPath, format: ArchiveFormat) -> Self {
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }
}

/// Fetches archives into uniquely named temporary files.
#[derive(Clone)]
pub struct ArchiveDownloader {
    client: ClientWithMiddleware,
    temp_dir: PathBuf,
    progress: Arc<dyn ProgressHandler>,
}

impl Default for ArchiveDownloader {
    fn default() -> Self {
        Self::new(ClientBuilder::new(reqwest::Client::new()).build())
    }
}

impl ArchiveDownloader {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self {
            client,
            temp_dir: std::env::temp_dir(),
            progress: Arc::new(NoProgressHandler),
        }
    }

    /// Directory the temporary archives are created in.
    #[must_use]
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Set the [`ProgressHandler`] to use for downloads.
    #[must_use]
    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = handler;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn progress_bar(&self, prefix: &str, total: u64) -> ProgressBar {
        let bar = ProgressBar::new(total).with_style(self.progress.default_bytes_style());
        bar.set_prefix(prefix.to_string());
        self.progress.add_progress_bar(bar)
    }

    /// Downloads `location` with a single GET request.
    ///
    /// Failures are reported once and never retried. Whatever the outcome, no
    /// partially written file is left behind.
    #[instrument(skip_all, fields(url = %location.url()))]
    pub async fn download(
        &self,
        location: &ArchiveLocation,
        _scope: &AccessScope,
        cancel: &CancellationToken,
    ) -> Result<TemporaryArtifact, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        async_fs::create_dir_all(&self.temp_dir).await?;
        let suffix = format!(".{}", location.format().extension());
        let (file, path) = tempfile::Builder::new()
            .prefix(consts::ARTIFACT_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.temp_dir)?
            .into_parts();
        // Dropping `path` from here on deletes the partial download.
        let mut file = tokio::fs::File::from_std(file);

        let url = location.url();
        if url.scheme() == "file" {
            self.copy_local_file(url, &mut file, cancel).await?;
        } else {
            self.fetch_remote(url, &mut file, cancel).await?;
        }

        tracing::debug!("downloaded {} to {}", url, path.display());
        Ok(TemporaryArtifact {
            path,
            format: location.format(),
        })
    }

    /// Streams the response body into `file`.
    async fn fetch_remote(
        &self,
        url: &Url,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let request = self.client.get(url.clone()).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response.map_err(|err| DownloadError::from_middleware(url, err))?,
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{url} responded with {status}");
            return Err(DownloadError::from_status(url, status));
        }

        let total = response.content_length().unwrap_or(0);
        let progress_bar = self.progress_bar("Downloading", total);

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    progress_bar.abandon();
                    return Err(DownloadError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|err| DownloadError::from_reqwest(url, err))?;
            file.write_all(&chunk).await?;
            progress_bar.inc(chunk.len() as u64);
        }
        file.flush().await?;
        progress_bar.finish_with_message("Downloaded");

        Ok(())
    }

    /// Handles `file://` locations by copying the archive.
    async fn copy_local_file(
        &self,
        url: &Url,
        file: &mut tokio::fs::File,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let source = url.to_file_path().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid file url {url}"))
        })?;
        let mut reader = async_fs::File::open(&source).await?;
        let total = async_fs::metadata(&source).await?.len();
        let progress_bar = self.progress_bar("Copying", total);

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if cancel.is_cancelled() {
                progress_bar.abandon();
                return Err(DownloadError::Cancelled);
            }
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).await?;
            progress_bar.inc(read as u64);
        }
        file.flush().await?;
        progress_bar.finish_with_message("Copied");
        Ok(())
    }
}

use std::{path::PathBuf, sync::Arc};

use reqwest::StatusCode;
use reqwest_middleware::Error as ReqwestMiddlewareError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors that can occur while turning a repository reference into an archive
/// location. All of them mean the reference itself has to be corrected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("the repository reference is empty")]
    Empty,

    #[error("`{reference}` is not a {host} repository URL")]
    UnsupportedHost { reference: String, host: String },

    #[error("`{reference}` is not a well-formed URL ({reason})")]
    Malformed { reference: String, reason: String },

    #[error("`{reference}` does not name an owner and a repository")]
    MissingRepository { reference: String },

    #[error("`{0}` is not a valid branch name")]
    InvalidRef(String),
}

/// Errors that can occur while fetching an archive into a temporary file.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error(
        "the archive at {url} is unavailable ({status}), the repository may not exist, may be private or may not have the requested branch"
    )]
    Unavailable { url: Url, status: StatusCode },

    #[error("the server responded with {status} for {url}")]
    HttpStatus { url: Url, status: StatusCode },

    #[error("the request for {url} timed out")]
    Timeout { url: Url },

    #[error("could not reach {url}: {cause}")]
    Transport { url: Url, cause: Arc<reqwest::Error> },

    #[error(transparent)]
    Middleware(Arc<ReqwestMiddlewareError>),

    #[error("could not store the downloaded archive: {0}")]
    Io(Arc<std::io::Error>),

    #[error("the download was cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { url: url.clone() }
        } else {
            Self::Transport {
                url: url.clone(),
                cause: Arc::new(err),
            }
        }
    }

    pub(crate) fn from_middleware(url: &Url, err: ReqwestMiddlewareError) -> Self {
        match err {
            ReqwestMiddlewareError::Reqwest(err) => Self::from_reqwest(url, err),
            err => Self::Middleware(Arc::new(err)),
        }
    }

    pub(crate) fn from_status(url: &Url, status: StatusCode) -> Self {
        if status.is_client_error() {
            Self::Unavailable {
                url: url.clone(),
                status,
            }
        } else {
            Self::HttpStatus {
                url: url.clone(),
                status,
            }
        }
    }

    /// The HTTP status the server answered with, if the failure came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unavailable { status, .. } | Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Errors emitted while unpacking an archive into its destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("the archive could not be read: {0}")]
    CorruptArchive(String),

    #[error("{}", describe_layout(.found))]
    UnexpectedLayout { found: Vec<String> },

    #[error("{0}")]
    Filesystem(String),
}

fn describe_layout(found: &[String]) -> String {
    match found {
        [] => "the archive had no top-level folder".to_string(),
        [single] => format!("the archive had a single top-level file `{single}` instead of a folder"),
        entries => format!(
            "the archive had {} top-level entries ({}) instead of a single folder",
            entries.len(),
            entries.join(", ")
        ),
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        Self::Filesystem(err.to_string())
    }
}

impl From<fs_extra::error::Error> for ExtractionError {
    fn from(err: fs_extra::error::Error) -> Self {
        Self::Filesystem(err.to_string())
    }
}

/// Failures reported by a scoped-access guard.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("the access grant for the destination is stale or has expired")]
    Stale,

    #[error("access to the destination was refused: {0}")]
    Denied(String),
}

/// Returned by the tracker when another acquisition into the same destination
/// has not finished yet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("an acquisition into {} is already in progress", .destination.display())]
pub struct BusyError {
    pub destination: PathBuf,
}

impl BusyError {
    pub fn kind(&self) -> AcquisitionErrorKind {
        AcquisitionErrorKind::Busy
    }
}

/// The reason an acquisition attempt ended in the failed state.
#[derive(Debug, Clone, Error)]
pub enum AcquisitionError {
    #[error("could not resolve the repository: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("could not download the repository archive: {0}")]
    Download(DownloadError),

    #[error("could not extract the repository archive: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("could not access the destination: {0}")]
    Access(#[from] AccessError),

    #[error("the acquisition was cancelled")]
    Cancelled,
}

impl From<DownloadError> for AcquisitionError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Cancelled => Self::Cancelled,
            err => Self::Download(err),
        }
    }
}

impl AcquisitionError {
    pub fn kind(&self) -> AcquisitionErrorKind {
        match self {
            Self::Resolution(_) => AcquisitionErrorKind::ReferenceInvalid,
            Self::Download(_) => AcquisitionErrorKind::Network,
            Self::Extraction(_) => AcquisitionErrorKind::Extraction,
            Self::Access(_) => AcquisitionErrorKind::AccessDenied,
            Self::Cancelled => AcquisitionErrorKind::Cancelled,
        }
    }
}

/// Classification of acquisition failures, used by callers to decide how to
/// react (retry, ask the user to fix the reference, re-establish access...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionErrorKind {
    ReferenceInvalid,
    Network,
    Extraction,
    AccessDenied,
    Busy,
    Cancelled,
}

impl AcquisitionErrorKind {
    /// Whether trying again without changing any input may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Busy)
    }
}

//! Fetch hosted repositories as plain directory trees.
//!
//! The crate resolves a repository reference to the archive URL of one of its
//! branches, downloads that archive into a temporary file and unpacks it into
//! a destination directory with the archive's wrapper folder stripped. The
//! [`AcquisitionTracker`] ties the phases together and reports the outcome as
//! an [`AcquisitionAttempt`].

pub mod access;
mod attempt;
pub mod auth;
pub mod consts;
pub mod download;
mod error;
pub mod extract;
pub mod progress;
pub mod resolver;
pub mod tracker;
mod util;

pub use access::{AccessGuard, AccessScope, ExpiringAccessGuard, NoopAccessGuard};
pub use attempt::{AcquisitionAttempt, AcquisitionStatus};
pub use auth::BearerTokenMiddleware;
pub use download::{ArchiveDownloader, TemporaryArtifact};
pub use error::{
    AccessError, AcquisitionError, AcquisitionErrorKind, BusyError, DownloadError,
    ExtractionError, ResolutionError,
};
pub use extract::{ArchiveExtractor, ExtractedContentRoot};
pub use progress::{
    AcquisitionPhase, AcquisitionReporter, NoProgressHandler, NoopReporter, ProgressHandler,
};
pub use resolver::{ArchiveFormat, ArchiveLocation, ArchiveUrlResolver, RepositoryReference, resolve};
pub use tracker::{AcquireRequest, AcquisitionTracker};

pub use tokio_util::sync::CancellationToken;

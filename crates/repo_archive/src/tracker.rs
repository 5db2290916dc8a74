//! Runs acquisitions and enforces one acquisition per destination.
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    access::{AccessGuard, AccessScope, NoopAccessGuard},
    attempt::{AcquisitionAttempt, AcquisitionStatus},
    download::ArchiveDownloader,
    error::{AcquisitionError, BusyError},
    extract::{ArchiveExtractor, ExtractedContentRoot},
    progress::{AcquisitionPhase, AcquisitionReporter, NoopReporter},
    resolver::ArchiveUrlResolver,
    util::absolute_destination,
};

/// Everything a single call to [`AcquisitionTracker::acquire`] needs.
#[derive(Clone)]
pub struct AcquireRequest {
    reference: String,
    reference_name: Option<String>,
    destination: PathBuf,
    guard: Arc<dyn AccessGuard>,
    cancellation: CancellationToken,
}

impl AcquireRequest {
    pub fn new(reference: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            reference_name: None,
            destination: destination.into(),
            guard: Arc::new(NoopAccessGuard),
            cancellation: CancellationToken::new(),
        }
    }

    /// Fetch this branch instead of the resolver's default.
    #[must_use]
    pub fn with_ref(mut self, reference_name: impl Into<String>) -> Self {
        self.reference_name = Some(reference_name.into());
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: Arc<dyn AccessGuard>) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

}

impl fmt::Debug for AcquireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireRequest")
            .field("reference", &self.reference)
            .field("reference_name", &self.reference_name)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Removes a destination from the in-flight set when the acquisition ends,
/// including when the future is dropped halfway. Shared with the extraction
/// task, so the entry outlives a dropped future until files stop moving.
struct InFlight {
    set: Arc<DashSet<PathBuf>>,
    key: PathBuf,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Resolves, downloads and extracts repositories.
///
/// Clones share the set of in-flight destinations, so a second acquisition
/// into a destination that is still being filled is refused with a
/// [`BusyError`] whichever clone it goes through. Apart from that the tracker
/// keeps no state: every attempt is returned to the caller.
#[derive(Clone)]
pub struct AcquisitionTracker {
    resolver: ArchiveUrlResolver,
    downloader: ArchiveDownloader,
    extractor: ArchiveExtractor,
    in_flight: Arc<DashSet<PathBuf>>,
    reporter: Arc<dyn AcquisitionReporter>,
}

impl Default for AcquisitionTracker {
    fn default() -> Self {
        Self::new(
            ArchiveUrlResolver::default(),
            ArchiveDownloader::default(),
            ArchiveExtractor::default(),
        )
    }
}

impl AcquisitionTracker {
    pub fn new(
        resolver: ArchiveUrlResolver,
        downloader: ArchiveDownloader,
        extractor: ArchiveExtractor,
    ) -> Self {
        Self {
            resolver,
            downloader,
            extractor,
            in_flight: Arc::new(DashSet::new()),
            reporter: Arc::new(NoopReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn AcquisitionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// `InProgress` while an acquisition into `destination` runs,
    /// `NotStarted` otherwise.
    pub fn status(&self, destination: &Path) -> AcquisitionStatus {
        if self.in_flight.contains(&absolute_destination(destination)) {
            AcquisitionStatus::InProgress
        } else {
            AcquisitionStatus::NotStarted
        }
    }

    /// Acquires the repository into the requested destination.
    ///
    /// Returns `Err` only when another acquisition into the same destination
    /// is still running. Every other outcome, failures included, is reported
    /// through the returned attempt.
    #[instrument(skip_all, fields(reference = %request.reference, destination = %request.destination.display()))]
    pub async fn acquire(&self, request: AcquireRequest) -> Result<AcquisitionAttempt, BusyError> {
        let key = absolute_destination(&request.destination);
        if !self.in_flight.insert(key.clone()) {
            tracing::debug!("refusing to start, {} is busy", key.display());
            return Err(BusyError { destination: key });
        }
        let in_flight = Arc::new(InFlight {
            set: self.in_flight.clone(),
            key: key.clone(),
        });

        let mut attempt = AcquisitionAttempt::new(key.clone());
        attempt.begin();
        self.reporter
            .on_status_changed(&key, AcquisitionStatus::InProgress);

        match self.run(&request, &key, &in_flight).await {
            Ok(root) => {
                tracing::info!(
                    "acquired {} into {}",
                    request.reference,
                    root.path().display()
                );
                attempt.complete(root);
            }
            Err(err) => {
                tracing::warn!("acquisition of {} failed: {err}", request.reference);
                attempt.fail(&err);
            }
        }

        self.reporter.on_status_changed(&key, attempt.status());
        Ok(attempt)
    }

    async fn run(
        &self,
        request: &AcquireRequest,
        destination: &Path,
        in_flight: &Arc<InFlight>,
    ) -> Result<ExtractedContentRoot, AcquisitionError> {
        let cancel = &request.cancellation;
        let scope = AccessScope::begin(request.guard.clone())?;

        self.checkpoint(cancel)?;
        self.reporter
            .on_phase_started(destination, AcquisitionPhase::Resolve);
        let location = self
            .resolver
            .resolve(&request.reference, request.reference_name.as_deref())?;
        tracing::debug!("resolved {} to {}", request.reference, location);

        self.checkpoint(cancel)?;
        self.reporter
            .on_phase_started(destination, AcquisitionPhase::Download);
        let artifact = self.downloader.download(&location, &scope, cancel).await?;

        self.checkpoint(cancel)?;
        self.reporter
            .on_phase_started(destination, AcquisitionPhase::Extract);
        // The blocking extraction owns the scope and the in-flight entry.
        let root = self
            .extractor
            .extract_holding(artifact, destination, (scope, in_flight.clone()))
            .await?;

        Ok(root)
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), AcquisitionError> {
        if cancel.is_cancelled() {
            Err(AcquisitionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

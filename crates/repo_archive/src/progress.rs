use std::path::Path;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::attempt::AcquisitionStatus;

/// Abstraction over progress reporting so callers can hook into their own UI.
pub trait ProgressHandler: Send + Sync {
    /// Adds a progress bar to the underlying renderer, returning the wrapped bar.
    fn add_progress_bar(&self, bar: ProgressBar) -> ProgressBar;

    /// Returns the default style to use for byte-based progress.
    fn default_bytes_style(&self) -> ProgressStyle {
        default_bytes_style()
    }
}

/// A progress handler that never draws anything.
#[derive(Clone, Default)]
pub struct NoProgressHandler;

impl ProgressHandler for NoProgressHandler {
    fn add_progress_bar(&self, bar: ProgressBar) -> ProgressBar {
        bar.set_draw_target(ProgressDrawTarget::hidden());
        bar
    }
}

fn default_bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<18} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes}",
    )
    .expect("the progress template is valid")
    .progress_chars("━ ")
}

/// The phases of a single acquisition, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionPhase {
    Resolve,
    Download,
    Extract,
}

/// Receives the status transitions of acquisitions, e.g. to drive a status
/// display. Implementations must be cheap, they are called inline.
pub trait AcquisitionReporter: Send + Sync {
    fn on_status_changed(&self, _destination: &Path, _status: AcquisitionStatus) {}

    fn on_phase_started(&self, _destination: &Path, _phase: AcquisitionPhase) {}
}

#[derive(Clone, Default)]
pub struct NoopReporter;

impl AcquisitionReporter for NoopReporter {}

use std::{
    fmt::Write as _,
    io::{self, Write},
    path::Path,
    sync::LazyLock,
    time::Duration,
};

use indicatif::{
    HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle,
};
use repo_archive::{AcquisitionPhase, AcquisitionReporter, AcquisitionStatus, ProgressHandler};
use tracing_subscriber::fmt::MakeWriter;

/// Returns a global instance of [`indicatif::MultiProgress`].
///
/// Log output is routed through it, so bars added here are not torn by log
/// lines.
pub fn global_multi_progress() -> MultiProgress {
    static GLOBAL_MP: LazyLock<MultiProgress> = LazyLock::new(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));
        mp
    });
    GLOBAL_MP.clone()
}

/// Writes to stderr while the progress bars are suspended.
#[derive(Clone)]
pub struct IndicatifWriter {
    progress_bars: MultiProgress,
}

impl IndicatifWriter {
    pub fn new(pb: MultiProgress) -> Self {
        Self { progress_bars: pb }
    }
}

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress_bars.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.progress_bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn default_bytes_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.dim} {prefix:20!} [{elapsed_precise}] [{bar:20!.bright.yellow/dim.white}] {bytes:>8} @ {smoothed_bytes_per_sec:8}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╾─")
        .with_key(
            "smoothed_bytes_per_sec",
            |s: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = match (s.pos(), s.elapsed().as_millis()) {
                    (pos, elapsed_ms) if elapsed_ms > 0 => write!(
                        w,
                        "{}/s",
                        HumanBytes((pos as f64 * 1000_f64 / elapsed_ms as f64) as u64)
                    ),
                    _ => write!(w, "-"),
                };
            },
        )
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.green} {prefix:20!} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Draws download and extraction bars on the global multi progress.
#[derive(Clone, Default)]
pub struct CliProgressHandler;

impl ProgressHandler for CliProgressHandler {
    fn add_progress_bar(&self, bar: ProgressBar) -> ProgressBar {
        global_multi_progress().add(bar)
    }

    fn default_bytes_style(&self) -> ProgressStyle {
        default_bytes_style()
    }
}

/// Shows the phase an acquisition is in as a spinner.
pub struct SpinnerReporter {
    spinner: ProgressBar,
}

impl SpinnerReporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        let spinner = global_multi_progress().add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style());
        spinner.set_prefix(prefix.into());
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }
}

pub(crate) fn phase_label(phase: AcquisitionPhase) -> &'static str {
    match phase {
        AcquisitionPhase::Resolve => "resolving the archive url",
        AcquisitionPhase::Download => "downloading the archive",
        AcquisitionPhase::Extract => "extracting the archive",
    }
}

impl AcquisitionReporter for SpinnerReporter {
    fn on_status_changed(&self, destination: &Path, status: AcquisitionStatus) {
        tracing::debug!("{} is {status}", destination.display());
        if status.is_terminal() {
            self.spinner.finish_and_clear();
        }
    }

    fn on_phase_started(&self, _destination: &Path, phase: AcquisitionPhase) {
        self.spinner.set_message(phase_label(phase));
    }
}

impl Drop for SpinnerReporter {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

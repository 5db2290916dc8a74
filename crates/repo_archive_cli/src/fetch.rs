use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use miette::{IntoDiagnostic, miette};
use repo_archive::{
    AcquireRequest, AcquisitionAttempt, AcquisitionTracker, ArchiveDownloader, ArchiveExtractor,
    ArchiveUrlResolver, CancellationToken,
};
use repo_archive_config::{Config, ConfigCli};
use tokio_util::sync::DropGuard;

use crate::{
    client::build_reqwest_client,
    progress::{CliProgressHandler, SpinnerReporter},
};

/// Download a repository and unpack it into a directory.
///
/// The contents of the repository are placed directly in the destination,
/// anything already in it is removed first.
#[derive(Parser, Debug)]
pub struct Args {
    /// The repository to fetch, e.g. `https://github.com/owner/name`.
    pub repository: String,

    /// The branch to fetch, defaults to the configured default branch.
    #[arg(long = "ref", short = 'r')]
    pub reference_name: Option<String>,

    /// The directory to unpack the repository into.
    #[arg(long, short, conflicts_with = "output_root")]
    pub destination: Option<PathBuf>,

    /// Unpack into `<OUTPUT_ROOT>/<name>` instead, defaults to the current
    /// directory.
    #[arg(long, short)]
    pub output_root: Option<PathBuf>,

    /// Cancel the fetch when it takes longer than this, e.g. `30s` or `5m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Print the outcome as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub config: ConfigCli,
}

impl Args {
    /// The directory the repository is unpacked into.
    pub(crate) fn destination(&self, resolver: &ArchiveUrlResolver) -> miette::Result<PathBuf> {
        if let Some(destination) = &self.destination {
            return Ok(destination.clone());
        }
        let repository = resolver.parse_reference(&self.repository).into_diagnostic()?;
        let root = match &self.output_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().into_diagnostic()?,
        };
        Ok(root.join(repository.content_folder_name()))
    }
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let config = Config::with_cli_config(&args.config);
    let resolver = config.resolver();
    let destination = args.destination(&resolver)?;

    let client = build_reqwest_client(&config)?;
    let progress = Arc::new(CliProgressHandler);
    let downloader = ArchiveDownloader::new(client)
        .with_temp_dir(config.temp_dir())
        .with_progress_handler(progress.clone());
    let extractor = ArchiveExtractor::default().with_progress_handler(progress);
    let tracker = AcquisitionTracker::new(resolver, downloader, extractor)
        .with_reporter(Arc::new(SpinnerReporter::new("Fetching")));

    let cancel = CancellationToken::new();
    let _watchers = spawn_cancellation_watchers(&cancel, args.timeout);

    let mut request = AcquireRequest::new(&args.repository, &destination).with_cancellation(cancel);
    if let Some(reference_name) = &args.reference_name {
        request = request.with_ref(reference_name);
    }

    let attempt = tracker.acquire(request).await.into_diagnostic()?;
    report(&args, &attempt)
}

/// Cancels `cancel` on Ctrl-C or when `timeout` elapses. The watchers stop
/// when the returned guard is dropped.
fn spawn_cancellation_watchers(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> DropGuard {
    let stop = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        let stop = stop.clone();
        async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::warn!("received Ctrl-C, cancelling");
                        cancel.cancel();
                    }
                }
            }
        }
    });

    if let Some(timeout) = timeout {
        tokio::spawn({
            let cancel = cancel.clone();
            let stop = stop.clone();
            async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        tracing::warn!(
                            "the fetch did not finish within {}, cancelling",
                            humantime::format_duration(timeout)
                        );
                        cancel.cancel();
                    }
                }
            }
        });
    }

    stop.drop_guard()
}

fn report(args: &Args, attempt: &AcquisitionAttempt) -> miette::Result<()> {
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(attempt).into_diagnostic()?
        );
    }

    match attempt.error_message() {
        None => {
            if !args.json {
                eprintln!("{}", success_message(&args.repository, attempt));
            }
            Ok(())
        }
        Some(message) => Err(miette!("{message}")),
    }
}

fn success_message(repository: &str, attempt: &AcquisitionAttempt) -> String {
    let entries = attempt
        .content_root()
        .map(|root| root.entries().len())
        .unwrap_or_default();
    format!(
        "{}Fetched {} into {} ({} {})",
        console::style(console::Emoji("✔ ", "")).green(),
        console::style(repository).bold(),
        console::style(attempt.destination().display()).bold(),
        entries,
        if entries == 1 { "entry" } else { "entries" }
    )
}

//! # repo-archive CLI
//!
//! - The [`Command`] enum defines the available commands.
//! - [`execute_command`] dispatches a parsed command to its implementation.
#![deny(clippy::dbg_macro)]

use std::{env, io::IsTerminal};

use clap::Parser;
use indicatif::ProgressDrawTarget;
use miette::IntoDiagnostic;
use tracing::level_filters::LevelFilter;

use crate::progress::{IndicatifWriter, global_multi_progress};

pub mod client;
pub mod completion;
pub mod fetch;
pub mod progress;
pub mod resolve;

const CLAP_GLOBAL_OPTIONS: &str = "Global Options";

#[derive(Parser, Debug)]
#[command(
    name = "repo-archive",
    version,
    about = "Fetch hosted repositories as plain directory trees, without a version-control client."
)]
#[clap(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    #[clap(flatten)]
    global_options: GlobalOptions,
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Increase the logging verbosity (-v for warnings, -vv for info, ...).
    #[clap(short, long, action = clap::ArgAction::Count, global = true, help_heading = CLAP_GLOBAL_OPTIONS)]
    verbose: u8,

    /// Decrease the logging verbosity (quiet mode).
    #[clap(short, long, action = clap::ArgAction::Count, global = true, help_heading = CLAP_GLOBAL_OPTIONS)]
    quiet: u8,

    /// Whether the log needs to be colored.
    #[clap(long, default_value = "auto", global = true, env = "REPO_ARCHIVE_COLOR", help_heading = CLAP_GLOBAL_OPTIONS)]
    color: ColorOutput,

    /// Hide all progress bars.
    #[clap(long, default_value = "false", global = true, env = "REPO_ARCHIVE_NO_PROGRESS", help_heading = CLAP_GLOBAL_OPTIONS)]
    no_progress: bool,
}

impl Args {
    fn no_progress(&self) -> bool {
        !std::io::stderr().is_terminal() || self.global_options.no_progress
    }

    fn log_level_filter(&self) -> LevelFilter {
        log_level_filter(self.global_options.quiet, self.global_options.verbose)
    }
}

fn log_level_filter(quiet: u8, verbose: u8) -> LevelFilter {
    match (quiet, verbose) {
        // Quiet mode overrides verbose
        (q, _) if q > 0 => LevelFilter::OFF,
        (_, 0) => LevelFilter::ERROR,
        (_, 1) => LevelFilter::WARN,
        (_, 2) => LevelFilter::INFO,
        (_, 3) => LevelFilter::DEBUG,
        (_, _) => LevelFilter::TRACE,
    }
}

#[derive(Parser, Debug)]
pub enum Command {
    Completion(completion::Args),
    #[clap(visible_alias = "f")]
    Fetch(fetch::Args),
    Resolve(resolve::Args),
}

pub async fn execute() -> miette::Result<()> {
    let args = Args::parse();
    let no_progress = args.no_progress();

    set_console_colors(&args);
    let use_colors = console::colors_enabled_stderr();
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::default()
                .color(use_colors)
                .build(),
        )
    }))?;

    if no_progress {
        global_multi_progress().set_draw_target(ProgressDrawTarget::hidden());
    }

    setup_logging(&args, use_colors)?;

    execute_command(args.command).await
}

fn setup_logging(args: &Args, use_colors: bool) -> miette::Result<()> {
    use tracing_subscriber::{
        EnvFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
    };

    let level_filter = args.log_level_filter();
    // The libraries of this workspace log one level more than their dependencies.
    let own_level = match level_filter {
        LevelFilter::OFF => LevelFilter::OFF,
        LevelFilter::ERROR => LevelFilter::WARN,
        LevelFilter::WARN => LevelFilter::INFO,
        LevelFilter::INFO => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let own_directives = format!(
        "repo_archive={own_level},repo_archive_cli={own_level},repo_archive_config={own_level}"
    );

    // -v/-q take precedence over RUST_LOG
    let cli_verbosity_set = args.global_options.verbose > 0 || args.global_options.quiet > 0;
    let directives = match env::var("RUST_LOG") {
        Ok(env_directives) if !cli_verbosity_set && !env_directives.is_empty() => {
            format!("{own_directives},{env_directives}")
        }
        _ => own_directives,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .parse(&directives)
        .into_diagnostic()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(use_colors)
        .with_target(own_level >= LevelFilter::DEBUG)
        .with_writer(IndicatifWriter::new(global_multi_progress()))
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
    Ok(())
}

/// Maps command enum variants to their actual function handlers.
pub async fn execute_command(command: Command) -> miette::Result<()> {
    match command {
        Command::Completion(cmd) => completion::execute(cmd),
        Command::Fetch(cmd) => fetch::execute(cmd).await,
        Command::Resolve(cmd) => resolve::execute(cmd).await,
    }
}

/// Whether to use colored log format.
/// Option `Auto` enables color output only if the logging is done to a terminal
/// and `NO_COLOR` environment variable is not set.
#[derive(clap::ValueEnum, Debug, Clone, Default)]
pub enum ColorOutput {
    Always,
    Never,

    #[default]
    Auto,
}

fn set_console_colors(args: &Args) {
    // FORCE_COLOR and NO_COLOR take precedence over the flag
    let color = match env::var("FORCE_COLOR") {
        Ok(_) => &ColorOutput::Always,
        Err(_) => match env::var("NO_COLOR") {
            Ok(_) => &ColorOutput::Never,
            Err(_) => &args.global_options.color,
        },
    };

    match color {
        ColorOutput::Always => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        }
        ColorOutput::Never => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        ColorOutput::Auto => {}
    }
}

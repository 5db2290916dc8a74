use miette::IntoDiagnostic;

pub fn main() -> miette::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    let result = runtime.block_on(repo_archive_cli::execute());

    // Avoid waiting for pending tasks to complete.
    runtime.shutdown_background();

    result
}

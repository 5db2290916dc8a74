use clap::Parser;
use miette::IntoDiagnostic;
use repo_archive::ArchiveLocation;
use repo_archive_config::{Config, ConfigCli};

/// Print the archive URL a repository reference resolves to, without
/// downloading anything.
#[derive(Parser, Debug)]
pub struct Args {
    /// The repository reference, e.g. `https://github.com/owner/name`.
    pub repository: String,

    /// The branch to resolve, defaults to the configured default branch.
    #[arg(long = "ref", short = 'r')]
    pub reference_name: Option<String>,

    /// Print the resolved location as JSON.
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub config: ConfigCli,
}

pub async fn execute(args: Args) -> miette::Result<()> {
    let config = Config::with_cli_config(&args.config);
    let location = config
        .resolver()
        .resolve(&args.repository, args.reference_name.as_deref())
        .into_diagnostic()?;

    println!("{}", render(&location, args.json)?);
    Ok(())
}

fn render(location: &ArchiveLocation, json: bool) -> miette::Result<String> {
    if !json {
        return Ok(location.url().to_string());
    }

    let repository = location.repository();
    let value = serde_json::json!({
        "url": location.url().as_str(),
        "host": repository.host(),
        "owner": repository.owner(),
        "name": repository.name(),
        "ref": location.reference_name(),
        "format": location.format().to_string(),
        "wrapper-folder": location.wrapper_folder_name(),
    });
    serde_json::to_string_pretty(&value).into_diagnostic()
}

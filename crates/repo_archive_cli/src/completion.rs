use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::Args as CommandArgs;

/// Generates a completion script for a shell.
#[derive(Parser, Debug)]
pub struct Args {
    /// The shell to generate a completion script for
    #[arg(short, long)]
    shell: Shell,
}

/// Print the completion script of the cli to stdout.
pub fn execute(args: Args) -> miette::Result<()> {
    let mut command = CommandArgs::command();
    let name = command.get_name().to_string();
    clap_complete::generate(args.shell, &mut command, name, &mut std::io::stdout());
    Ok(())
}

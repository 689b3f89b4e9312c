//! ---
//! anvil_section: "05-networking-external-interfaces"
//! anvil_subsection: "binary"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Control CLI for operators interacting with an Anvil agent."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use anyhow::Result;
use anvil_common::logging;
use anvil_common::version::VersionInfo;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};

mod agent;
mod manifest;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Anvil operator control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Inspect and drive a running agent")]
    Agent(agent::AgentCommand),
    #[command(subcommand, about = "Package constraint manifest tooling")]
    Manifest(manifest::ManifestCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_cli();
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    match cli.command {
        Some(Commands::Agent(cmd)) => agent::run(cmd).await?,
        Some(Commands::Manifest(cmd)) => manifest::run(cmd)?,
        None => {
            Cli::command().print_long_help()?;
        }
    }
    Ok(())
}

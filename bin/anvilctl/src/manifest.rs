//! ---
//! anvil_section: "04-manifest-validation"
//! anvil_subsection: "binary"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Manifest tooling subcommands for the control CLI."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use anvil_manifest::Manifest;
use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum ManifestCommand {
    #[command(about = "Validate a manifest's well-formedness")]
    Check {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    #[command(about = "Print the canonical rendering of a manifest")]
    Render {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

pub fn run(command: ManifestCommand) -> Result<()> {
    match command {
        ManifestCommand::Check { path } => {
            let manifest = load(&path)?;
            println!("{}: ok ({} records)", path.display(), manifest.len());
            for record in manifest.records() {
                let constraints = record
                    .constraints
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                match &record.license {
                    Some(license) => println!("  {}  {}  {}", record.name, constraints, license),
                    None => println!("  {}  {}", record.name, constraints),
                }
            }
        }
        ManifestCommand::Render { path } => {
            let manifest = load(&path)?;
            print!("{}", manifest.render());
        }
    }
    Ok(())
}

fn load(path: &PathBuf) -> Result<Manifest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read manifest {}", path.display()))?;
    Manifest::parse(&contents).map_err(|err| anyhow::anyhow!("{}: {err}", path.display()))
}

//! ---
//! anvil_section: "05-networking-external-interfaces"
//! anvil_subsection: "binary"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Agent inspection subcommands for the control CLI."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use anyhow::{bail, Context, Result};
use anvil_api::{CommandSubmission, CommandView, StatusSnapshot};
use anvil_hardware::HardwareInventory;
use clap::{Args, Subcommand};
use uuid::Uuid;

#[derive(Debug, Args)]
pub struct Target {
    /// Base URL of the agent's local API.
    #[arg(
        long,
        env = "ANVIL_AGENT_URL",
        default_value = "http://127.0.0.1:9999"
    )]
    pub agent_url: String,
}

impl Target {
    fn endpoint(&self, tail: &str) -> String {
        format!("{}/{}", self.agent_url.trim_end_matches('/'), tail)
    }
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    #[command(about = "Show agent status")]
    Status(Target),
    #[command(about = "Show the hardware inventory")]
    Hardware(Target),
    #[command(about = "Submit a <mode>.<name> command")]
    Run(RunArgs),
    #[command(about = "List command results in submission order")]
    Results(Target),
    #[command(about = "Show a single command result")]
    Result(ResultArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: Target,
    /// Command name, e.g. `standby.cache_image`.
    pub name: String,
    /// JSON parameters forwarded to the mode implementation.
    #[arg(long, default_value = "{}")]
    pub params: String,
}

#[derive(Debug, Args)]
pub struct ResultArgs {
    #[command(flatten)]
    pub target: Target,
    pub id: Uuid,
}

pub async fn run(command: AgentCommand) -> Result<()> {
    let client = reqwest::Client::new();
    match command {
        AgentCommand::Status(target) => {
            let status: StatusSnapshot = fetch(&client, &target.endpoint("status")).await?;
            println!("Mode:    {}", status.mode);
            println!("Version: {}", status.version);
            match status.started_at {
                Some(started) => println!("Started: {started} ({}s ago)", status.uptime_seconds),
                None => println!("Started: not yet serving"),
            }
        }
        AgentCommand::Hardware(target) => {
            let inventory: HardwareInventory =
                fetch(&client, &target.endpoint("v1/hardware")).await?;
            println!("{}", serde_json::to_string_pretty(&inventory)?);
        }
        AgentCommand::Run(args) => {
            let params = serde_json::from_str(&args.params)
                .with_context(|| format!("--params is not valid JSON: {}", args.params))?;
            let submission = CommandSubmission {
                name: args.name,
                params,
            };
            let response = client
                .post(args.target.endpoint("v1/commands"))
                .json(&submission)
                .send()
                .await
                .context("agent unreachable")?;
            let status = response.status();
            let body: serde_json::Value = response.json().await?;
            if !status.is_success() {
                bail!(
                    "agent rejected command ({}): {}",
                    status,
                    body["error"].as_str().unwrap_or("unknown error")
                );
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        AgentCommand::Results(target) => {
            let results: Vec<CommandView> =
                fetch(&client, &target.endpoint("v1/commands")).await?;
            for view in results {
                let state = match (view.done, view.success) {
                    (false, _) => "running",
                    (true, Some(true)) => "ok",
                    _ => "failed",
                };
                println!("{}  {:7}  {}", view.id, state, view.name);
            }
        }
        AgentCommand::Result(args) => {
            let view: CommandView = fetch(
                &client,
                &args.target.endpoint(&format!("v1/commands/{}", args.id)),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }
    Ok(())
}

async fn fetch<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("agent unreachable at {url}"))?;
    if !response.status().is_success() {
        bail!("agent returned {} for {url}", response.status());
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("unexpected response body from {url}"))
}

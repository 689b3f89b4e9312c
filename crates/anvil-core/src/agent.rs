//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Primary agent lifecycle and command execution."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use anvil_api::{CommandError, CommandExecutor, CommandSubmission, CommandView, StatusProvider};
use anvil_common::config::{AppConfig, HeartbeatConfig};
use anvil_common::version::VersionInfo;
use anvil_hardware::{HardwareInventory, HardwareManager};
use anvil_metrics::AgentMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::{CommandLog, CommandOutcome, CommandRecord};
use crate::heartbeat::{HeartbeatSource, Heartbeater};
use crate::modes::{Execution, ModeImplementation, ModeRegistry};
use crate::netutil::resolve_api_facing_ip;
use crate::overlord::{HeartbeatPayload, OverlordClient};

/// Mode label reported before the first command locks a mode in.
const MODE_NONE: &str = "NONE";

struct StartStamp {
    at: DateTime<Utc>,
    instant: Instant,
}

/// The provisioning agent.
///
/// Owns the command engine and the identity reported to the overlord. The
/// heartbeat loop and the local API server are started from
/// [`Agent::start`] and the binary respectively, both borrowing the agent
/// through its seams.
pub struct Agent {
    version: VersionInfo,
    mac_address: String,
    advertise_url: String,
    hardware: Arc<dyn HardwareManager>,
    modes: ModeRegistry,
    overlord: OverlordClient,
    heartbeat_config: HeartbeatConfig,
    metrics: Option<AgentMetrics>,
    active_mode: Mutex<Option<Arc<dyn ModeImplementation>>>,
    log: Arc<Mutex<CommandLog>>,
    /// Serialises submissions so the busy gate cannot be raced.
    submission: tokio::sync::Mutex<()>,
    started_at: Mutex<Option<StartStamp>>,
}

/// Assemble an agent from configuration.
///
/// Resolves the advertise address when none is configured and probes the
/// hardware once for the MAC identity; both must succeed or startup fails.
pub fn build_agent(
    config: &AppConfig,
    version: VersionInfo,
    hardware: Arc<dyn HardwareManager>,
    metrics: Option<AgentMetrics>,
) -> anyhow::Result<Arc<Agent>> {
    let advertise_host = match &config.advertise.host {
        Some(host) => host.clone(),
        None => {
            info!("resolving API-facing IP address");
            let ip = resolve_api_facing_ip(&config.overlord.api_url)?;
            info!(ip_address = %ip, "resolved API-facing IP address");
            ip.to_string()
        }
    };
    let advertise_url = advertise_url(&advertise_host, config.advertise.port);
    let mac_address = hardware.primary_mac_address()?;
    let modes = ModeRegistry::standard(hardware.clone(), config.images.cache_dir.clone());
    let overlord = OverlordClient::new(&config.overlord.api_url);

    Ok(Agent::with_parts(
        version,
        mac_address,
        advertise_url,
        hardware,
        modes,
        overlord,
        config.heartbeat.clone(),
        metrics,
    ))
}

fn advertise_url(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{v6}]:{port}/"),
        _ => format!("http://{host}:{port}/"),
    }
}

impl Agent {
    /// Explicit assembly, primarily for suites that stub parts out.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        version: VersionInfo,
        mac_address: String,
        advertise_url: String,
        hardware: Arc<dyn HardwareManager>,
        modes: ModeRegistry,
        overlord: OverlordClient,
        heartbeat_config: HeartbeatConfig,
        metrics: Option<AgentMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            version,
            mac_address,
            advertise_url,
            hardware,
            modes,
            overlord,
            heartbeat_config,
            metrics,
            active_mode: Mutex::new(None),
            log: Arc::new(Mutex::new(CommandLog::default())),
            submission: tokio::sync::Mutex::new(()),
            started_at: Mutex::new(None),
        })
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn advertise_url(&self) -> &str {
        &self.advertise_url
    }

    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Current mode label, `NONE` until the first command arrives.
    pub fn mode_name(&self) -> String {
        self.active_mode
            .lock()
            .as_ref()
            .map(|mode| mode.name().to_owned())
            .unwrap_or_else(|| MODE_NONE.to_owned())
    }

    /// Start the heartbeat loop and stamp the startup time.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<AgentRuntime> {
        *self.started_at.lock() = Some(StartStamp {
            at: Utc::now(),
            instant: Instant::now(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeater = Heartbeater::new(
            self.overlord.clone(),
            self.heartbeat_config.clone(),
            self.metrics.clone(),
        );
        let source: Arc<dyn HeartbeatSource> = self.clone();
        let heartbeat = heartbeater.spawn(source, shutdown_rx);
        info!(
            advertise = %self.advertise_url,
            mac = %self.mac_address,
            version = %self.version.cli_string(),
            "agent started"
        );
        Ok(AgentRuntime {
            shutdown: shutdown_tx,
            heartbeat,
        })
    }

    /// Execute a `<mode>.<name>` command.
    pub async fn execute_command(
        &self,
        name: &str,
        params: Value,
    ) -> Result<CommandView, CommandError> {
        let _guard = self.submission.lock().await;

        let (mode_part, command_part) = split_command(name)?;
        let mode = self.verify_mode(mode_part)?;
        if self.log.lock().busy() {
            return Err(CommandError::Busy);
        }

        let started = Instant::now();
        let execution = mode.execute(command_part, params.clone()).await?;
        match execution {
            Execution::Sync(outcome) => {
                let ok = outcome.is_success();
                if let CommandOutcome::Failure(message) = &outcome {
                    warn!(command = name, error = %message, "command failed");
                }
                let mut record = CommandRecord::running(name, mode.name(), params);
                record.outcome = Some(outcome);
                let view = record.view();
                self.log.lock().insert(record);
                if let Some(metrics) = &self.metrics {
                    metrics.record_command(mode.name(), ok, started.elapsed());
                }
                Ok(view)
            }
            Execution::Async(handle) => {
                let record = CommandRecord::running(name, mode.name(), params);
                let id = record.id;
                let view = record.view();
                self.log.lock().insert(record);

                let log = self.log.clone();
                let metrics = self.metrics.clone();
                let mode_label = mode.name();
                let command_name = name.to_owned();
                tokio::spawn(async move {
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(join) => {
                            CommandOutcome::Failure(format!("command task panicked: {join}"))
                        }
                    };
                    let ok = outcome.is_success();
                    if let CommandOutcome::Failure(message) = &outcome {
                        warn!(command = %command_name, error = %message, "command failed");
                    } else {
                        info!(command = %command_name, "command complete");
                    }
                    log.lock().complete(id, outcome);
                    if let Some(metrics) = &metrics {
                        metrics.record_command(mode_label, ok, started.elapsed());
                    }
                });
                Ok(view)
            }
        }
    }

    /// Resolve the target mode, locking the agent into it on first use.
    fn verify_mode(&self, mode_part: &str) -> Result<Arc<dyn ModeImplementation>, CommandError> {
        let mut active = self.active_mode.lock();
        if let Some(current) = active.as_ref() {
            if current.name().eq_ignore_ascii_case(mode_part) {
                return Ok(current.clone());
            }
            return Err(CommandError::ModeMismatch {
                active: current.name().to_owned(),
                requested: mode_part.to_ascii_lowercase(),
            });
        }
        let mode = self
            .modes
            .lookup(mode_part)
            .ok_or_else(|| CommandError::UnknownMode(mode_part.to_owned()))?;
        info!(mode = mode.name(), "agent locked into mode");
        *active = Some(mode.clone());
        Ok(mode)
    }
}

fn split_command(name: &str) -> Result<(&str, &str), CommandError> {
    match name.split_once('.') {
        Some((mode, command)) if !mode.is_empty() && !command.is_empty() => Ok((mode, command)),
        _ => Err(CommandError::InvalidCommand(
            "command name must be of the form <mode>.<name>".to_owned(),
        )),
    }
}

impl HeartbeatSource for Agent {
    fn payload(&self) -> HeartbeatPayload {
        HeartbeatPayload {
            mac_address: self.mac_address.clone(),
            url: self.advertise_url.clone(),
            version: self.version.semver.clone(),
            mode: self.mode_name(),
        }
    }
}

impl StatusProvider for Agent {
    fn status(&self) -> anvil_api::StatusSnapshot {
        let started = self.started_at.lock();
        anvil_api::StatusSnapshot {
            mode: self.mode_name(),
            version: self.version.cli_string(),
            started_at: started.as_ref().map(|stamp| stamp.at),
            uptime_seconds: started
                .as_ref()
                .map(|stamp| stamp.instant.elapsed().as_secs())
                .unwrap_or(0),
        }
    }

    fn hardware(&self) -> anyhow::Result<HardwareInventory> {
        Ok(self.hardware.inventory()?)
    }
}

#[async_trait]
impl CommandExecutor for Agent {
    async fn submit(&self, submission: CommandSubmission) -> Result<CommandView, CommandError> {
        self.execute_command(&submission.name, submission.params)
            .await
    }

    fn list(&self) -> Vec<CommandView> {
        self.log.lock().iter().map(CommandRecord::view).collect()
    }

    fn get(&self, id: Uuid) -> Option<CommandView> {
        self.log.lock().get(id).map(CommandRecord::view)
    }
}

/// Handle over the running background pieces of an agent.
pub struct AgentRuntime {
    shutdown: watch::Sender<bool>,
    heartbeat: JoinHandle<()>,
}

impl AgentRuntime {
    /// Stop the heartbeater and wait for it to exit.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.heartbeat.await.map_err(anyhow::Error::new)?;
        info!("agent shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_requires_mode_and_name() {
        assert_eq!(split_command("standby.cache_image").unwrap().0, "standby");
        assert!(split_command("standby").is_err());
        assert!(split_command(".cache_image").is_err());
        assert!(split_command("standby.").is_err());
    }

    #[test]
    fn advertise_url_brackets_ipv6() {
        assert_eq!(advertise_url("10.1.2.3", 9999), "http://10.1.2.3:9999/");
        assert_eq!(advertise_url("fd00::17", 9999), "http://[fd00::17]:9999/");
        assert_eq!(
            advertise_url("agent-17.deploy.local", 9999),
            "http://agent-17.deploy.local:9999/"
        );
    }
}

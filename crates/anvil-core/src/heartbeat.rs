//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Heartbeat loop keeping the overlord aware of the agent."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anvil_common::config::HeartbeatConfig;
use anvil_common::time::{duration_to_millis, scale_duration};
use anvil_metrics::AgentMetrics;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::overlord::{HeartbeatPayload, OverlordClient};

/// Provides the identity reported on each heartbeat.
///
/// Computed per beat: the mode changes once the first command arrives and
/// the overlord must see the transition.
pub trait HeartbeatSource: Send + Sync + 'static {
    fn payload(&self) -> HeartbeatPayload;
}

/// Background loop that keeps the overlord aware of this agent.
///
/// Successful beats reschedule against the overlord-granted deadline with a
/// jitter multiplier so a rack of agents does not thundering-herd a single
/// overlord. Failures retry on an exponential backoff.
pub struct Heartbeater {
    client: OverlordClient,
    config: HeartbeatConfig,
    metrics: Option<AgentMetrics>,
}

impl Heartbeater {
    pub fn new(client: OverlordClient, config: HeartbeatConfig, metrics: Option<AgentMetrics>) -> Self {
        Self {
            client,
            config,
            metrics,
        }
    }

    /// Spawn the loop. The first heartbeat fires immediately.
    pub fn spawn(
        self,
        source: Arc<dyn HeartbeatSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("starting heartbeater");
            let mut delay = Duration::ZERO;
            let mut error_delay = self.config.initial_error_delay;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping heartbeater");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        let payload = source.payload();
                        let deadline = match self.client.heartbeat(&payload).await {
                            Ok(response) => {
                                error_delay = self.config.initial_error_delay;
                                if let Some(metrics) = &self.metrics {
                                    metrics.record_heartbeat(true);
                                }
                                info!(mode = %payload.mode, deadline = %response.heartbeat_before, "heartbeat successful");
                                response.heartbeat_before
                            }
                            Err(err) => {
                                if let Some(metrics) = &self.metrics {
                                    metrics.record_heartbeat(false);
                                }
                                warn!(error = %err, retry_in = ?error_delay, "error sending heartbeat");
                                let deadline = Utc::now()
                                    + chrono::Duration::from_std(error_delay)
                                        .unwrap_or_else(|_| chrono::Duration::seconds(1));
                                error_delay = next_error_delay(error_delay, &self.config);
                                deadline
                            }
                        };

                        let jitter = rand::thread_rng()
                            .gen_range(self.config.jitter_min..=self.config.jitter_max);
                        delay = jittered_delay(deadline, Utc::now(), jitter);
                        info!(interval_ms = duration_to_millis(delay), "sleeping before next heartbeat");
                    }
                }
            }
        })
    }
}

/// Time to wait before the next beat: the remaining window scaled by the
/// jitter multiplier. A deadline already in the past beats immediately.
fn jittered_delay(deadline: DateTime<Utc>, now: DateTime<Utc>, jitter: f64) -> Duration {
    let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
    scale_duration(remaining, jitter)
}

/// Exponential backoff step, capped by configuration.
fn next_error_delay(current: Duration, config: &HeartbeatConfig) -> Duration {
    let grown = scale_duration(current, config.backoff_factor);
    grown.min(config.max_error_delay)
}

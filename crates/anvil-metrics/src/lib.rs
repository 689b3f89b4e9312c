//! ---
//! anvil_section: "03-observability-logging"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Metrics collection and export utilities."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the agent.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let local_addr = std_listener
        .local_addr()
        .with_context(|| "failed to resolve metrics listener address")?;
    let listener = tokio::net::TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the agent process.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: SharedRegistry,
    heartbeats_total: IntCounterVec,
    commands_total: IntCounterVec,
    command_duration_seconds: Histogram,
    build_info: GaugeVec,
    starts_total: IntCounter,
}

impl AgentMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let heartbeats_total = IntCounterVec::new(
            Opts::new(
                "anvil_heartbeats_total",
                "Heartbeats sent to the overlord, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(heartbeats_total.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new(
                "anvil_commands_total",
                "Commands executed by the agent, by mode and outcome",
            ),
            &["mode", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let command_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "anvil_command_duration_seconds",
                "Wall-clock duration of command execution",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(command_duration_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "anvil_build_info",
                "Build metadata for the running agent binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        let starts_total = IntCounter::with_opts(Opts::new(
            "anvil_starts_total",
            "Total number of times the agent has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        Ok(Self {
            registry,
            heartbeats_total,
            commands_total,
            command_duration_seconds,
            build_info,
            starts_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn record_heartbeat(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.heartbeats_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_command(&self, mode: &str, ok: bool, duration: Duration) {
        let outcome = if ok { "ok" } else { "error" };
        self.commands_total
            .with_label_values(&[mode, outcome])
            .inc();
        self.command_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_metrics_register_once() {
        let registry = new_registry();
        let metrics = AgentMetrics::new(registry.clone()).unwrap();
        metrics.inc_start();
        metrics.record_heartbeat(true);
        metrics.record_heartbeat(false);
        metrics.record_command("standby", true, Duration::from_millis(12));

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_owned()).collect();
        assert!(names.contains(&"anvil_heartbeats_total".to_owned()));
        assert!(names.contains(&"anvil_commands_total".to_owned()));

        // Double registration of the same metric family must fail loudly.
        assert!(AgentMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_metrics_endpoint() {
        let registry = new_registry();
        let metrics = AgentMetrics::new(registry.clone()).unwrap();
        metrics.record_heartbeat(true);

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("anvil_heartbeats_total"));
        server.shutdown().await.unwrap();
    }
}

//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Primary agent lifecycle and command execution."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anvil_api::{CommandError, CommandExecutor, CommandView, StatusProvider};
use anvil_common::config::{AppConfig, HeartbeatConfig};
use anvil_common::version::VersionInfo;
use anvil_core::modes::{Execution, ModeImplementation, ModeRegistry};
use anvil_core::{build_agent, Agent, CommandOutcome, OverlordClient};
use anvil_hardware::StaticHardwareManager;
use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

async fn spawn_overlord_stub() -> (SocketAddr, Arc<AtomicUsize>) {
    let beats = Arc::new(AtomicUsize::new(0));
    let counter = beats.clone();
    let app = Router::new().route(
        "/v1/agents/:mac/heartbeat",
        post(move |Json(_payload): Json<Value>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({
                    "heartbeat_before": chrono::Utc::now() + chrono::Duration::seconds(30),
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, beats)
}

fn test_config(overlord: SocketAddr, cache_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.overlord.api_url = format!("http://{overlord}");
    config.advertise.host = Some("127.0.0.1".to_owned());
    config.images.cache_dir = cache_dir.to_owned();
    config
}

async fn wait_done(agent: &Agent, id: Uuid) -> CommandView {
    for _ in 0..400 {
        if let Some(view) = agent.get(id) {
            if view.done {
                return view;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("command {id} never finished");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeats_flow_to_the_overlord() {
    let (overlord, beats) = spawn_overlord_stub().await;
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(overlord, temp.path());

    let agent = build_agent(
        &config,
        VersionInfo::current(),
        Arc::new(StaticHardwareManager::example()),
        None,
    )
    .unwrap();
    let runtime = agent.start().await.unwrap();

    // First beat fires immediately; the 30s deadline pushes the second one
    // far beyond this test.
    for _ in 0..100 {
        if beats.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(beats.load(Ordering::SeqCst) >= 1);
    assert_eq!(agent.status().mode, "NONE");

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_lifecycle_locks_the_mode() {
    let (overlord, _beats) = spawn_overlord_stub().await;
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(overlord, temp.path());
    let agent = build_agent(
        &config,
        VersionInfo::current(),
        Arc::new(StaticHardwareManager::example()),
        None,
    )
    .unwrap();

    let params = json!({
        "image": {
            "id": "ubuntu-24.04",
            "urls": ["http://images.deploy.local/ubuntu-24.04.img"],
        }
    });
    let view = agent
        .execute_command("standby.cache_image", params.clone())
        .await
        .unwrap();
    assert!(!view.done);

    let finished = wait_done(&agent, view.id).await;
    assert_eq!(finished.success, Some(true));
    assert_eq!(agent.status().mode, "standby");

    // The agent is now committed to standby.
    let err = agent
        .execute_command("decom.erase_hardware", json!({}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CommandError::ModeMismatch {
            active: "standby".to_owned(),
            requested: "decom".to_owned(),
        }
    );

    // Unknown commands within the locked mode are still rejected cleanly.
    let err = agent
        .execute_command("standby.defragment", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidCommand(_)));

    // Only the accepted command is in the log, in order.
    let listed = agent.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, finished.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_mode_is_rejected_without_locking() {
    let (overlord, _beats) = spawn_overlord_stub().await;
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(overlord, temp.path());
    let agent = build_agent(
        &config,
        VersionInfo::current(),
        Arc::new(StaticHardwareManager::example()),
        None,
    )
    .unwrap();

    let err = agent
        .execute_command("rescue.start", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::UnknownMode("rescue".to_owned()));
    assert_eq!(agent.status().mode, "NONE");

    let err = agent.execute_command("rescue", json!({})).await.unwrap_err();
    assert!(matches!(err, CommandError::InvalidCommand(_)));
}

/// Mode whose single command blocks until the test releases it.
struct GatedMode {
    gate: StdMutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl ModeImplementation for GatedMode {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn execute(&self, command: &str, _params: Value) -> Result<Execution, CommandError> {
        match command {
            "wait" => {
                let gate = self.gate.lock().unwrap().take();
                Ok(Execution::Async(tokio::spawn(async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    CommandOutcome::Success(json!({"waited": true}))
                })))
            }
            other => Err(CommandError::InvalidCommand(format!(
                "unknown gated command '{other}'"
            ))),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_is_busy_until_the_previous_command_finishes() {
    let (release, gate) = oneshot::channel();
    let registry = ModeRegistry::with_modes([Arc::new(GatedMode {
        gate: StdMutex::new(Some(gate)),
    }) as Arc<dyn ModeImplementation>]);
    let agent = Agent::with_parts(
        VersionInfo::current(),
        "52:54:00:12:34:56".to_owned(),
        "http://127.0.0.1:9999/".to_owned(),
        Arc::new(StaticHardwareManager::example()),
        registry,
        OverlordClient::new("http://127.0.0.1:1"),
        HeartbeatConfig::default(),
        None,
    );

    let running = agent.execute_command("gated.wait", json!({})).await.unwrap();
    assert!(!running.done);

    let err = agent
        .execute_command("gated.wait", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Busy);

    release.send(()).unwrap();
    let finished = wait_done(&agent, running.id).await;
    assert_eq!(finished.success, Some(true));

    // Once drained, new submissions are accepted again.
    let next = agent.execute_command("gated.wait", json!({})).await.unwrap();
    let finished = wait_done(&agent, next.id).await;
    assert_eq!(finished.success, Some(true));
    assert_eq!(agent.list().len(), 2);
}

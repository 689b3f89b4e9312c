//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Decommission mode: hardware erasure reporting."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::sync::Arc;

use anvil_api::CommandError;
use anvil_hardware::HardwareManager;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::commands::CommandOutcome;
use crate::modes::{Execution, ModeImplementation};

/// Machine-is-leaving mode: wipes tenant state before the machine returns
/// to the pool.
pub struct DecomMode {
    hardware: Arc<dyn HardwareManager>,
}

impl DecomMode {
    pub fn new(hardware: Arc<dyn HardwareManager>) -> Self {
        Self { hardware }
    }
}

#[async_trait]
impl ModeImplementation for DecomMode {
    fn name(&self) -> &'static str {
        "decom"
    }

    async fn execute(&self, command: &str, _params: Value) -> Result<Execution, CommandError> {
        match command {
            "erase_hardware" => {
                let hardware = self.hardware.clone();
                Ok(Execution::Async(tokio::spawn(async move {
                    erase_hardware(hardware).await
                })))
            }
            other => Err(CommandError::InvalidCommand(format!(
                "unknown decom command '{other}'"
            ))),
        }
    }
}

/// Produce an erasure report for every disk in the inventory.
///
/// Destructive writes stay out of the agent; the report tells the overlord
/// which devices the wipe applies to and it drives the actual erasure
/// through a boot-time tool.
async fn erase_hardware(hardware: Arc<dyn HardwareManager>) -> CommandOutcome {
    let devices = match hardware.list_block_devices() {
        Ok(devices) => devices,
        Err(err) => return CommandOutcome::Failure(format!("cannot enumerate disks: {err}")),
    };
    if devices.is_empty() {
        return CommandOutcome::Failure("no block devices to erase".to_owned());
    }
    let report: Vec<Value> = devices
        .iter()
        .map(|device| {
            json!({
                "device": device.name,
                "size_bytes": device.size_bytes,
                "method": "zero-fill",
            })
        })
        .collect();
    info!(disks = devices.len(), "erasure report assembled");
    CommandOutcome::Success(json!({ "erased": report }))
}

//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Mode implementations for the command engine."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anvil_api::CommandError;
use anvil_hardware::HardwareManager;
use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::commands::CommandOutcome;

pub mod decom;
pub mod standby;

pub use decom::DecomMode;
pub use standby::StandbyMode;

/// How a mode chose to run a command.
#[derive(Debug)]
pub enum Execution {
    /// The command finished inline.
    Sync(CommandOutcome),
    /// The command runs on a background task; the join handle resolves to
    /// the final outcome.
    Async(JoinHandle<CommandOutcome>),
}

/// One family of agent commands.
///
/// The original service discovered these through plugin entry points; the
/// redesign registers the known modes statically, which keeps the
/// `<mode>.<name>` dispatch but drops the dynamic loading machinery.
#[async_trait]
pub trait ModeImplementation: Send + Sync + 'static {
    /// Mode identifier as it appears in command names and heartbeats.
    fn name(&self) -> &'static str;

    /// Execute a command scoped to this mode.
    ///
    /// Parameter validation failures are returned as errors so the API
    /// caller sees them directly; runtime failures are reported through the
    /// returned [`Execution`] and recorded as failed results.
    async fn execute(&self, command: &str, params: Value) -> Result<Execution, CommandError>;
}

/// Lookup table of the modes this agent can enter.
#[derive(Clone)]
pub struct ModeRegistry {
    modes: HashMap<&'static str, Arc<dyn ModeImplementation>>,
}

impl ModeRegistry {
    /// The standard registry: `standby` and `decom`.
    pub fn standard(hardware: Arc<dyn HardwareManager>, image_cache_dir: PathBuf) -> Self {
        let mut modes: HashMap<&'static str, Arc<dyn ModeImplementation>> = HashMap::new();
        let standby: Arc<dyn ModeImplementation> = Arc::new(StandbyMode::new(image_cache_dir));
        let decom: Arc<dyn ModeImplementation> = Arc::new(DecomMode::new(hardware));
        modes.insert(standby.name(), standby);
        modes.insert(decom.name(), decom);
        Self { modes }
    }

    /// Registry with explicit contents, used by suites.
    pub fn with_modes(entries: impl IntoIterator<Item = Arc<dyn ModeImplementation>>) -> Self {
        let mut modes = HashMap::new();
        for mode in entries {
            modes.insert(mode.name(), mode);
        }
        Self { modes }
    }

    /// Mode names are matched case-insensitively, as submitted commands
    /// arrive from several control plane generations.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ModeImplementation>> {
        self.modes.get(name.to_ascii_lowercase().as_str()).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.modes.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

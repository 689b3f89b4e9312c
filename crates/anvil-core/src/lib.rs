//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Primary agent lifecycle and command execution."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
//! Agent core: lifecycle, heartbeating, and the command engine.

pub mod agent;
pub mod commands;
pub mod heartbeat;
pub mod modes;
pub mod netutil;
pub mod overlord;

pub use agent::{build_agent, Agent, AgentRuntime};
pub use commands::{CommandLog, CommandOutcome, CommandRecord};
pub use heartbeat::{HeartbeatSource, Heartbeater};
pub use modes::{Execution, ModeImplementation, ModeRegistry};
pub use overlord::{HeartbeatPayload, HeartbeatResponse, OverlordClient, OverlordError};

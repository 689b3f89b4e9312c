//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Shared primitives and utilities for the agent runtime."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
//! Core shared primitives for the Anvil agent workspace.
//! This crate exposes configuration loading, logging, time helpers, and
//! version metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;
pub mod version;

pub use config::{
    AdvertiseConfig, ApiConfig, AppConfig, HardwareConfig, HeartbeatConfig, ImagesConfig,
    LoggingConfig, MetricsConfig, OverlordConfig,
};
pub use logging::{init_cli, init_tracing, LogFormat};
pub use version::VersionInfo;

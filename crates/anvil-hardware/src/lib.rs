//! ---
//! anvil_section: "02-hardware-inventory"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Hardware introspection for heartbeat identity and inventory."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
//! Hardware introspection.
//!
//! The agent identifies itself to the overlord by its primary MAC address
//! and reports an inventory snapshot over the local API. Everything here
//! reads sysfs/procfs under a configurable root so suites can point the
//! generic manager at a fixture tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anvil_common::config::HardwareConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("no network interface with a usable MAC address")]
    NoUsableInterface,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// One NIC as seen under `sys/class/net`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac_address: Option<String>,
    /// Link detected. `false` when the carrier file is absent or unreadable,
    /// which also covers interfaces that are administratively down.
    pub has_carrier: bool,
}

/// One disk as seen under `sys/block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
}

/// Snapshot reported via the local API and used by decommissioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInventory {
    pub interfaces: Vec<NetworkInterface>,
    pub block_devices: Vec<BlockDevice>,
    pub cpu_count: usize,
    pub memory_total_kb: u64,
}

/// Source of hardware facts.
///
/// The agent core only talks to this trait; production uses
/// [`GenericHardwareManager`], suites use [`StaticHardwareManager`].
pub trait HardwareManager: Send + Sync + 'static {
    fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, HardwareError>;

    fn list_block_devices(&self) -> Result<Vec<BlockDevice>, HardwareError>;

    fn cpu_count(&self) -> Result<usize, HardwareError>;

    fn memory_total_kb(&self) -> Result<u64, HardwareError>;

    /// The MAC address the agent identifies itself with: interfaces with
    /// link beat interfaces without, enumeration order breaks ties.
    fn primary_mac_address(&self) -> Result<String, HardwareError> {
        let interfaces = self.list_network_interfaces()?;
        pick_primary_mac(&interfaces).ok_or(HardwareError::NoUsableInterface)
    }

    fn inventory(&self) -> Result<HardwareInventory, HardwareError> {
        Ok(HardwareInventory {
            interfaces: self.list_network_interfaces()?,
            block_devices: self.list_block_devices()?,
            cpu_count: self.cpu_count()?,
            memory_total_kb: self.memory_total_kb()?,
        })
    }
}

/// Linux sysfs/procfs backed manager.
#[derive(Debug, Clone)]
pub struct GenericHardwareManager {
    root: PathBuf,
    preferred_interface: Option<String>,
}

impl GenericHardwareManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preferred_interface: None,
        }
    }

    pub fn from_config(config: &HardwareConfig) -> Self {
        Self {
            root: config.root.clone(),
            preferred_interface: config.preferred_interface.clone(),
        }
    }

    fn read_trimmed(&self, path: &Path) -> Result<String, HardwareError> {
        fs::read_to_string(path)
            .map(|s| s.trim().to_owned())
            .map_err(|source| HardwareError::Io {
                path: path.to_owned(),
                source,
            })
    }

    fn sys(&self, tail: &str) -> PathBuf {
        self.root.join("sys").join(tail)
    }

    fn proc(&self, tail: &str) -> PathBuf {
        self.root.join("proc").join(tail)
    }
}

impl HardwareManager for GenericHardwareManager {
    fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, HardwareError> {
        let net_dir = self.sys("class/net");
        let entries = fs::read_dir(&net_dir).map_err(|source| HardwareError::Io {
            path: net_dir.clone(),
            source,
        })?;

        let mut interfaces = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HardwareError::Io {
                path: net_dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            let mac = self
                .read_trimmed(&entry.path().join("address"))
                .ok()
                .filter(|mac| !mac.is_empty() && mac != "00:00:00:00:00:00");
            let has_carrier = self
                .read_trimmed(&entry.path().join("carrier"))
                .map(|value| value == "1")
                .unwrap_or(false);
            interfaces.push(NetworkInterface {
                name,
                mac_address: mac,
                has_carrier,
            });
        }
        // read_dir order is arbitrary; keep results stable across calls.
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = interfaces.len(), "enumerated network interfaces");
        Ok(interfaces)
    }

    fn list_block_devices(&self) -> Result<Vec<BlockDevice>, HardwareError> {
        let block_dir = self.sys("block");
        let entries = fs::read_dir(&block_dir).map_err(|source| HardwareError::Io {
            path: block_dir.clone(),
            source,
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HardwareError::Io {
                path: block_dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
                continue;
            }
            let size_path = entry.path().join("size");
            let sectors =
                self.read_trimmed(&size_path)?
                    .parse::<u64>()
                    .map_err(|err| HardwareError::Malformed {
                        path: size_path,
                        reason: err.to_string(),
                    })?;
            devices.push(BlockDevice {
                name,
                // sysfs sizes are 512-byte sectors regardless of the
                // device's logical block size
                size_bytes: sectors.saturating_mul(512),
            });
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    fn cpu_count(&self) -> Result<usize, HardwareError> {
        let path = self.proc("cpuinfo");
        let contents = self.read_trimmed(&path)?;
        Ok(contents
            .lines()
            .filter(|line| line.starts_with("processor"))
            .count())
    }

    fn memory_total_kb(&self) -> Result<u64, HardwareError> {
        let path = self.proc("meminfo");
        let contents = self.read_trimmed(&path)?;
        let line = contents
            .lines()
            .find(|line| line.starts_with("MemTotal:"))
            .ok_or_else(|| HardwareError::Malformed {
                path: path.clone(),
                reason: "missing MemTotal".to_owned(),
            })?;
        line.split_whitespace()
            .nth(1)
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| HardwareError::Malformed {
                path,
                reason: format!("unparseable MemTotal line '{line}'"),
            })
    }

    fn primary_mac_address(&self) -> Result<String, HardwareError> {
        let interfaces = self.list_network_interfaces()?;
        if let Some(preferred) = &self.preferred_interface {
            if let Some(mac) = interfaces
                .iter()
                .find(|iface| &iface.name == preferred)
                .and_then(|iface| iface.mac_address.clone())
            {
                return Ok(mac);
            }
            debug!(interface = %preferred, "preferred interface absent or without MAC; falling back");
        }
        pick_primary_mac(&interfaces).ok_or(HardwareError::NoUsableInterface)
    }
}

fn pick_primary_mac(interfaces: &[NetworkInterface]) -> Option<String> {
    let with_mac = |iface: &&NetworkInterface| iface.mac_address.is_some();
    interfaces
        .iter()
        .filter(with_mac)
        .find(|iface| iface.has_carrier)
        .or_else(|| interfaces.iter().find(with_mac))
        .and_then(|iface| iface.mac_address.clone())
}

/// Fixed-answer manager for suites.
#[derive(Debug, Clone, Default)]
pub struct StaticHardwareManager {
    pub interfaces: Vec<NetworkInterface>,
    pub block_devices: Vec<BlockDevice>,
    pub cpu_count: usize,
    pub memory_total_kb: u64,
}

impl StaticHardwareManager {
    /// A single wired NIC and one disk, enough for most suites.
    pub fn example() -> Self {
        Self {
            interfaces: vec![NetworkInterface {
                name: "eth0".to_owned(),
                mac_address: Some("52:54:00:12:34:56".to_owned()),
                has_carrier: true,
            }],
            block_devices: vec![BlockDevice {
                name: "sda".to_owned(),
                size_bytes: 32 * 1024 * 1024 * 1024,
            }],
            cpu_count: 4,
            memory_total_kb: 8 * 1024 * 1024,
        }
    }
}

impl HardwareManager for StaticHardwareManager {
    fn list_network_interfaces(&self) -> Result<Vec<NetworkInterface>, HardwareError> {
        Ok(self.interfaces.clone())
    }

    fn list_block_devices(&self) -> Result<Vec<BlockDevice>, HardwareError> {
        Ok(self.block_devices.clone())
    }

    fn cpu_count(&self) -> Result<usize, HardwareError> {
        Ok(self.cpu_count)
    }

    fn memory_total_kb(&self) -> Result<u64, HardwareError> {
        Ok(self.memory_total_kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let net = dir.path().join("sys/class/net");
        fs::create_dir_all(net.join("lo")).unwrap();
        fs::write(net.join("lo/address"), "00:00:00:00:00:00\n").unwrap();
        fs::create_dir_all(net.join("eth0")).unwrap();
        fs::write(net.join("eth0/address"), "52:54:00:aa:bb:cc\n").unwrap();
        fs::write(net.join("eth0/carrier"), "0\n").unwrap();
        fs::create_dir_all(net.join("eth1")).unwrap();
        fs::write(net.join("eth1/address"), "52:54:00:dd:ee:ff\n").unwrap();
        fs::write(net.join("eth1/carrier"), "1\n").unwrap();

        let block = dir.path().join("sys/block");
        fs::create_dir_all(block.join("sda")).unwrap();
        fs::write(block.join("sda/size"), "62500000\n").unwrap();
        fs::create_dir_all(block.join("loop0")).unwrap();
        fs::write(block.join("loop0/size"), "8\n").unwrap();

        let proc = dir.path().join("proc");
        fs::create_dir_all(&proc).unwrap();
        fs::write(
            proc.join("cpuinfo"),
            "processor\t: 0\nmodel name\t: Test CPU\n\nprocessor\t: 1\nmodel name\t: Test CPU\n",
        )
        .unwrap();
        fs::write(
            proc.join("meminfo"),
            "MemTotal:       16384256 kB\nMemFree:         1024000 kB\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn loopback_and_pseudo_devices_are_skipped() {
        let root = fixture_root();
        let manager = GenericHardwareManager::new(root.path());
        let interfaces = manager.list_network_interfaces().unwrap();
        assert_eq!(interfaces.len(), 2);
        let devices = manager.list_block_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].size_bytes, 62_500_000 * 512);
    }

    #[test]
    fn primary_mac_prefers_link_carrier() {
        let root = fixture_root();
        let manager = GenericHardwareManager::new(root.path());
        assert_eq!(manager.primary_mac_address().unwrap(), "52:54:00:dd:ee:ff");
    }

    #[test]
    fn preferred_interface_overrides_carrier_choice() {
        let root = fixture_root();
        let manager = GenericHardwareManager {
            root: root.path().to_owned(),
            preferred_interface: Some("eth0".to_owned()),
        };
        assert_eq!(manager.primary_mac_address().unwrap(), "52:54:00:aa:bb:cc");
    }

    #[test]
    fn proc_facts_are_parsed() {
        let root = fixture_root();
        let manager = GenericHardwareManager::new(root.path());
        assert_eq!(manager.cpu_count().unwrap(), 2);
        assert_eq!(manager.memory_total_kb().unwrap(), 16_384_256);
    }

    #[test]
    fn inventory_aggregates_all_probes() {
        let root = fixture_root();
        let manager = GenericHardwareManager::new(root.path());
        let inventory = manager.inventory().unwrap();
        assert_eq!(inventory.interfaces.len(), 2);
        assert_eq!(inventory.block_devices.len(), 1);
        assert_eq!(inventory.cpu_count, 2);
    }

    #[test]
    fn missing_sysfs_root_is_an_io_error() {
        let manager = GenericHardwareManager::new("/definitely/not/here");
        assert!(matches!(
            manager.list_network_interfaces(),
            Err(HardwareError::Io { .. })
        ));
    }
}

//! Configuration management for ksctl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{KsctlError, KsctlResult};

/// Behavior of the tunnel-establishment allow rule when the tunnel's remote
/// endpoint address could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelEndpointFallback {
    /// Keep the rule scoped to the physical interface and the IKE/NAT-T/L2TP
    /// port set, but drop the destination-address constraint
    Widen,
    /// Refuse to synthesize the policy
    Fail,
}

/// Main ksctl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KsctlConfig {
    /// Configuration file paths
    #[serde(default)]
    pub paths: ConfigPaths,
    /// Kill-switch tunables
    #[serde(default)]
    pub killswitch: KillSwitchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Runtime state directory (rule files, backup snapshot, apply record)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// System packet-filter configuration reloaded on revert
    #[serde(default = "default_pf_conf_path")]
    pub pf_conf_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchSettings {
    /// Tunnel liveness poll interval (seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Consecutive confirmed-absent polls before automatic revert
    #[serde(default = "default_absence_threshold")]
    pub absence_threshold: u32,
    /// What to do when the tunnel remote endpoint cannot be resolved
    #[serde(default = "default_endpoint_fallback")]
    pub tunnel_endpoint_fallback: TunnelEndpointFallback,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/run/ksctl")
}

fn default_pf_conf_path() -> PathBuf {
    PathBuf::from("/etc/pf.conf")
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_absence_threshold() -> u32 {
    2
}

fn default_endpoint_fallback() -> TunnelEndpointFallback {
    TunnelEndpointFallback::Widen
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            pf_conf_path: default_pf_conf_path(),
        }
    }
}

impl Default for KillSwitchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            absence_threshold: default_absence_threshold(),
            tunnel_endpoint_fallback: default_endpoint_fallback(),
        }
    }
}

impl Default for KsctlConfig {
    fn default() -> Self {
        Self {
            paths: ConfigPaths::default(),
            killswitch: KillSwitchSettings::default(),
        }
    }
}

impl KsctlConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing sections
    pub fn load(path: &Path) -> KsctlResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KsctlError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| KsctlError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Load from a path if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> KsctlResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

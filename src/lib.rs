//! ksctl - VPN Kill-Switch Control Library
//!
//! Async library implementing a network kill switch on top of the pf packet
//! filter:
//! - Interface resolution (default-route egress and active tunnel)
//! - DNS resolver-set collection
//! - Declarative policy synthesis (default-deny, narrow allow-list)
//! - Atomic policy apply/revert via pfctl
//! - Tunnel liveness monitoring with automatic revert
//!
//! The read-only pipeline (resolver, collector, synthesizer) is pure and
//! testable without privileges; the applier is the single side-effecting
//! boundary.

pub mod error;
pub mod validation;
pub mod config;
pub mod inspector;
pub mod resolver;
pub mod dns;
pub mod policy;
pub mod pfconf;
pub mod applier;
pub mod monitor;
pub mod controller;

// Re-export commonly used types
pub use error::{KsctlError, KsctlResult};
pub use config::{KsctlConfig, ConfigPaths, KillSwitchSettings, TunnelEndpointFallback};
pub use inspector::{SystemInspector, HostInspector, DefaultRoute, InterfaceSnapshot};
pub use resolver::{NetworkInterface, InterfaceRole, resolve_physical, resolve_tunnel};
pub use dns::collect_dns_servers;
pub use policy::{
    FirewallPolicy, RuleClause, RuleAction, Direction, AddressFamily, Protocol,
    AddressConstraint, AddressSpec, PortConstraint, synthesize,
};
pub use applier::{
    ApplyResult, BackupDescriptor, PersistedState, PfApplier, PrivilegedRunner, SudoRunner,
};
pub use monitor::{TunnelMonitor, MonitorState, TunnelLost};
pub use controller::{
    KillSwitchController, ControllerStatus, CredentialProvider, EnvCredentialProvider,
};

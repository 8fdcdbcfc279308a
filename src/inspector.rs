//! System inspection seam
//!
//! All host facts the controller consumes (default route, interface table,
//! resolver set) come through the [`SystemInspector`] trait. The production
//! implementation shells out to `route`, `ifconfig` and `scutil`; tests supply
//! fixtures. Command output parsing is kept in pure functions so it can be
//! tested without any system access.

use crate::error::{KsctlError, KsctlResult};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use tokio::process::Command;

/// The host's default IPv4 route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    /// Outbound interface name
    pub interface: String,
    /// Next-hop gateway, when reported
    pub gateway: Option<Ipv4Addr>,
}

/// Raw per-interface facts from the OS interface table
///
/// Address lines are kept as reported so the resolver can apply its
/// primary/fallback parse patterns itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub name: String,
    /// POINTOPOINT capability flag (PPP and generic tunnel interfaces)
    pub point_to_point: bool,
    /// Address lines belonging to this interface, trimmed
    pub addr_lines: Vec<String>,
}

/// Read-only access to host network state
#[async_trait]
pub trait SystemInspector: Send + Sync {
    /// The default IPv4 route, or None when the host has none
    async fn default_route(&self) -> KsctlResult<Option<DefaultRoute>>;

    /// All interfaces in OS-reported order
    async fn interfaces(&self) -> KsctlResult<Vec<InterfaceSnapshot>>;

    /// Resolver addresses currently in effect on the host
    async fn dns_servers(&self) -> KsctlResult<Vec<IpAddr>>;
}

/// Production inspector shelling out to the system tools
pub struct HostInspector;

impl HostInspector {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, program: &str, args: &[&str]) -> KsctlResult<String> {
        let cmd_str = format!("{} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| KsctlError::CommandFailed {
                cmd: cmd_str.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(KsctlError::CommandFailed {
                cmd: cmd_str,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for HostInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemInspector for HostInspector {
    async fn default_route(&self) -> KsctlResult<Option<DefaultRoute>> {
        // `route -n get default` exits non-zero when no default route exists;
        // that is an absent route, not an inspector failure
        match self.run("route", &["-n", "get", "default"]).await {
            Ok(out) => Ok(parse_route_get(&out)),
            Err(KsctlError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn interfaces(&self) -> KsctlResult<Vec<InterfaceSnapshot>> {
        let out = self.run("ifconfig", &[]).await?;
        Ok(parse_ifconfig(&out))
    }

    async fn dns_servers(&self) -> KsctlResult<Vec<IpAddr>> {
        let out = self.run("scutil", &["--dns"]).await?;
        Ok(parse_scutil_dns(&out))
    }
}

/// Parse `route -n get default` output into a [`DefaultRoute`]
pub fn parse_route_get(output: &str) -> Option<DefaultRoute> {
    let mut interface = None;
    let mut gateway = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("interface:") {
            let value = value.trim();
            if !value.is_empty() {
                interface = Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("gateway:") {
            gateway = value.trim().parse::<Ipv4Addr>().ok();
        }
    }

    interface.map(|interface| DefaultRoute { interface, gateway })
}

/// Parse `ifconfig` output into per-interface snapshots, preserving the
/// OS-reported interface order
pub fn parse_ifconfig(output: &str) -> Vec<InterfaceSnapshot> {
    let mut snapshots: Vec<InterfaceSnapshot> = Vec::new();

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            // Header line: "name: flags=8051<UP,POINTOPOINT,RUNNING> mtu 1444"
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let point_to_point = rest
                .split_once('<')
                .and_then(|(_, flags)| flags.split_once('>'))
                .map(|(flags, _)| flags.split(',').any(|f| f == "POINTOPOINT"))
                .unwrap_or(false);
            snapshots.push(InterfaceSnapshot {
                name: name.trim().to_string(),
                point_to_point,
                addr_lines: Vec::new(),
            });
        } else if let Some(current) = snapshots.last_mut() {
            let line = line.trim();
            if line.starts_with("inet") || line.contains("->") {
                current.addr_lines.push(line.to_string());
            }
        }
    }

    snapshots
}

/// Parse `scutil --dns` output into the set of resolver addresses
///
/// Lines look like "nameserver[0] : 1.1.1.1". Duplicates across resolver
/// sections are expected; the caller deduplicates.
pub fn parse_scutil_dns(output: &str) -> Vec<IpAddr> {
    let mut servers = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("nameserver[") {
            continue;
        }
        if let Some((_, addr)) = line.split_once(':') {
            if let Ok(ip) = addr.trim().parse::<IpAddr>() {
                servers.push(ip);
            }
        }
    }

    servers
}

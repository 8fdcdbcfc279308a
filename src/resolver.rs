//! Interface resolution
//!
//! Identifies the physical egress interface (default-route interface) and the
//! active tunnel interface (first point-to-point interface holding an assigned
//! local address). Read-only; discovered fresh on every enable/disable cycle.

use crate::error::{KsctlError, KsctlResult};
use crate::inspector::{InterfaceSnapshot, SystemInspector};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

/// Role an interface plays in the synthesized policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceRole {
    /// Default-route egress interface
    Physical,
    /// Active VPN tunnel interface
    Tunnel,
}

/// A resolved network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub role: InterfaceRole,
    pub local_addr: Option<Ipv4Addr>,
    pub remote_addr: Option<Ipv4Addr>,
}

/// Resolve the physical egress interface from the default IPv4 route
pub async fn resolve_physical(
    inspector: &dyn SystemInspector,
) -> KsctlResult<NetworkInterface> {
    let route = inspector
        .default_route()
        .await?
        .ok_or(KsctlError::NoRouteFound)?;

    debug!(interface = %route.interface, gateway = ?route.gateway, "Resolved default route");

    Ok(NetworkInterface {
        name: route.interface,
        role: InterfaceRole::Physical,
        local_addr: None,
        remote_addr: None,
    })
}

/// Resolve the active tunnel interface
///
/// Enumerates interfaces in OS-reported order and selects the first
/// point-to-point-capable one with an assigned local address. The first
/// qualifying interface wins; this is deterministic given a fixed interface
/// table, not lexical. A hint restricts the search to the named interface.
pub async fn resolve_tunnel(
    inspector: &dyn SystemInspector,
    hint: Option<&str>,
) -> KsctlResult<NetworkInterface> {
    let snapshots = inspector.interfaces().await?;

    for snapshot in &snapshots {
        if !snapshot.point_to_point {
            continue;
        }
        if let Some(hint) = hint {
            if snapshot.name != hint {
                continue;
            }
        }
        if let Some((local, remote)) = parse_peer_addresses(snapshot) {
            debug!(
                interface = %snapshot.name,
                local = %local,
                remote = ?remote,
                "Selected tunnel interface"
            );
            return Ok(NetworkInterface {
                name: snapshot.name.clone(),
                role: InterfaceRole::Tunnel,
                local_addr: Some(local),
                remote_addr: remote,
            });
        }
    }

    Err(KsctlError::NoTunnelInterface)
}

/// Extract the local/remote address pair from an interface's address lines
///
/// Primary form is the inet destination notation
/// (`inet 10.8.0.2 --> 203.0.113.9 netmask ...`); when that does not parse,
/// a bare address-pair notation (`10.8.0.2 -> 203.0.113.9`) is tried before
/// the interface is skipped.
fn parse_peer_addresses(snapshot: &InterfaceSnapshot) -> Option<(Ipv4Addr, Option<Ipv4Addr>)> {
    for line in &snapshot.addr_lines {
        if let Some(pair) = parse_inet_destination(line) {
            return Some(pair);
        }
    }
    for line in &snapshot.addr_lines {
        if let Some(pair) = parse_address_pair(line) {
            return Some(pair);
        }
    }
    None
}

/// Primary pattern: `inet <local> --> <remote> ...`
fn parse_inet_destination(line: &str) -> Option<(Ipv4Addr, Option<Ipv4Addr>)> {
    let rest = line.strip_prefix("inet ")?;
    let mut tokens = rest.split_whitespace();
    let local = tokens.next()?.parse::<Ipv4Addr>().ok()?;
    let remote = match tokens.next() {
        Some("-->") => tokens.next().and_then(|t| t.parse::<Ipv4Addr>().ok()),
        _ => None,
    };
    Some((local, remote))
}

/// Secondary pattern: `<local> -> <remote>` address pair notation
fn parse_address_pair(line: &str) -> Option<(Ipv4Addr, Option<Ipv4Addr>)> {
    let (left, right) = line.split_once("->")?;
    let local = left
        .split_whitespace()
        .last()?
        .parse::<Ipv4Addr>()
        .ok()?;
    let remote = right
        .split_whitespace()
        .next()
        .and_then(|t| t.parse::<Ipv4Addr>().ok());
    Some((local, remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::DefaultRoute;
    use async_trait::async_trait;
    use std::net::IpAddr;

    struct FakeInspector {
        route: Option<DefaultRoute>,
        interfaces: Vec<InterfaceSnapshot>,
    }

    #[async_trait]
    impl SystemInspector for FakeInspector {
        async fn default_route(&self) -> KsctlResult<Option<DefaultRoute>> {
            Ok(self.route.clone())
        }

        async fn interfaces(&self) -> KsctlResult<Vec<InterfaceSnapshot>> {
            Ok(self.interfaces.clone())
        }

        async fn dns_servers(&self) -> KsctlResult<Vec<IpAddr>> {
            Ok(Vec::new())
        }
    }

    fn snapshot(name: &str, p2p: bool, lines: &[&str]) -> InterfaceSnapshot {
        InterfaceSnapshot {
            name: name.to_string(),
            point_to_point: p2p,
            addr_lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_physical() {
        let inspector = FakeInspector {
            route: Some(DefaultRoute {
                interface: "en0".to_string(),
                gateway: Some("192.168.1.1".parse().unwrap()),
            }),
            interfaces: Vec::new(),
        };
        let iface = resolve_physical(&inspector).await.unwrap();
        assert_eq!(iface.name, "en0");
        assert_eq!(iface.role, InterfaceRole::Physical);
    }

    #[tokio::test]
    async fn test_resolve_physical_no_route() {
        let inspector = FakeInspector { route: None, interfaces: Vec::new() };
        assert!(matches!(
            resolve_physical(&inspector).await,
            Err(KsctlError::NoRouteFound)
        ));
    }

    #[tokio::test]
    async fn test_resolve_tunnel_first_qualifying_wins() {
        let inspector = FakeInspector {
            route: None,
            interfaces: vec![
                snapshot("en0", false, &["inet 192.168.1.5 netmask 0xffffff00"]),
                // Point-to-point but no assigned address: skipped
                snapshot("gif0", true, &[]),
                snapshot("utun3", true, &["inet 10.8.0.2 --> 203.0.113.9 netmask 0xffffffff"]),
                snapshot("utun4", true, &["inet 10.9.0.2 --> 10.9.0.1 netmask 0xffffffff"]),
            ],
        };
        let iface = resolve_tunnel(&inspector, None).await.unwrap();
        assert_eq!(iface.name, "utun3");
        assert_eq!(iface.role, InterfaceRole::Tunnel);
        assert_eq!(iface.local_addr, Some("10.8.0.2".parse().unwrap()));
        assert_eq!(iface.remote_addr, Some("203.0.113.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_resolve_tunnel_hint_overrides_order() {
        let inspector = FakeInspector {
            route: None,
            interfaces: vec![
                snapshot("utun3", true, &["inet 10.8.0.2 --> 203.0.113.9 netmask 0xffffffff"]),
                snapshot("utun4", true, &["inet 10.9.0.2 --> 10.9.0.1 netmask 0xffffffff"]),
            ],
        };
        let iface = resolve_tunnel(&inspector, Some("utun4")).await.unwrap();
        assert_eq!(iface.name, "utun4");

        // A hint naming a non-qualifying interface is a detection failure
        assert!(matches!(
            resolve_tunnel(&inspector, Some("utun9")).await,
            Err(KsctlError::NoTunnelInterface)
        ));
    }

    #[tokio::test]
    async fn test_resolve_tunnel_none_qualify() {
        let inspector = FakeInspector {
            route: None,
            interfaces: vec![
                snapshot("en0", false, &["inet 192.168.1.5 netmask 0xffffff00"]),
                snapshot("gif0", true, &[]),
            ],
        };
        assert!(matches!(
            resolve_tunnel(&inspector, None).await,
            Err(KsctlError::NoTunnelInterface)
        ));
    }

    #[tokio::test]
    async fn test_resolve_tunnel_fallback_pair_notation() {
        let inspector = FakeInspector {
            route: None,
            interfaces: vec![snapshot("ppp0", true, &["10.8.0.2 -> 203.0.113.9"])],
        };
        let iface = resolve_tunnel(&inspector, None).await.unwrap();
        assert_eq!(iface.local_addr, Some("10.8.0.2".parse().unwrap()));
        assert_eq!(iface.remote_addr, Some("203.0.113.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_resolve_tunnel_local_only() {
        let inspector = FakeInspector {
            route: None,
            interfaces: vec![snapshot("utun2", true, &["inet 10.8.0.2 netmask 0xffffffff"])],
        };
        let iface = resolve_tunnel(&inspector, None).await.unwrap();
        assert_eq!(iface.local_addr, Some("10.8.0.2".parse().unwrap()));
        assert_eq!(iface.remote_addr, None);
    }
}

//! Firewall policy model and synthesizer
//!
//! A [`FirewallPolicy`] is an ordered sequence of typed [`RuleClause`] values
//! plus a generation counter. [`synthesize`] is a pure, deterministic function
//! over resolved interface facts and the collected DNS set; it performs no IO.
//! Clause ordering is significant: quick clauses are first-match-wins, the
//! leading catch-alls are overridden by anything that matches later.

use crate::config::TunnelEndpointFallback;
use crate::error::{KsctlError, KsctlResult};
use crate::resolver::{InterfaceRole, NetworkInterface};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

/// IPv4 limited broadcast address
pub const LIMITED_BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// IPv4 multicast range (224.0.0.0/4)
pub const MULTICAST_NET: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 0);
pub const MULTICAST_PREFIX: u8 = 4;

/// IKE, NAT-T and L2TP ports used for tunnel establishment
pub const TUNNEL_PORTS: [u16; 3] = [500, 4500, 1701];

/// DHCP client/server port range
pub const DHCP_PORT_LOW: u16 = 67;
pub const DHCP_PORT_HIGH: u16 = 68;

/// ICMP echo request type
pub const ICMP_ECHO_REQUEST: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Block,
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Any,
    Inet,
    Inet6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

/// A host or CIDR address literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSpec {
    Host(IpAddr),
    Cidr(Ipv4Addr, u8),
}

/// Destination or source constraint on a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressConstraint {
    To(AddressSpec),
    From(AddressSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortConstraint {
    Single(u16),
    Range(u16, u16),
    Set(Vec<u16>),
}

/// Atomic firewall statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleClause {
    pub action: RuleAction,
    /// First-match-wins: once matched, later clauses are not evaluated
    pub quick: bool,
    pub direction: Direction,
    pub af: AddressFamily,
    pub interface: Option<String>,
    pub protocols: Vec<Protocol>,
    pub addr: Option<AddressConstraint>,
    pub ports: Option<PortConstraint>,
    pub icmp_type: Option<u8>,
    pub keep_state: bool,
}

impl RuleClause {
    fn block_all() -> Self {
        Self {
            action: RuleAction::Block,
            quick: false,
            direction: Direction::Any,
            af: AddressFamily::Any,
            interface: None,
            protocols: Vec::new(),
            addr: None,
            ports: None,
            icmp_type: None,
            keep_state: false,
        }
    }

    fn pass_quick() -> Self {
        Self {
            action: RuleAction::Pass,
            quick: true,
            direction: Direction::Any,
            af: AddressFamily::Any,
            interface: None,
            protocols: Vec::new(),
            addr: None,
            ports: None,
            icmp_type: None,
            keep_state: true,
        }
    }

    /// True when this pass clause constrains neither protocol, address, nor
    /// port. Only the final tunnel-interface catch-all is allowed to look
    /// like this.
    pub fn is_unrestricted_pass(&self) -> bool {
        self.action == RuleAction::Pass
            && self.protocols.is_empty()
            && self.addr.is_none()
            && self.ports.is_none()
    }
}

/// Ordered, declarative rule set for one activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallPolicy {
    /// Physical egress interface name
    pub physical_if: String,
    /// Tunnel interface name
    pub tunnel_if: String,
    /// Monotonically increasing activation counter
    pub generation: u64,
    pub clauses: Vec<RuleClause>,
}

impl FirewallPolicy {
    /// Clauses equal, generation ignored
    pub fn same_rules(&self, other: &FirewallPolicy) -> bool {
        self.physical_if == other.physical_if
            && self.tunnel_if == other.tunnel_if
            && self.clauses == other.clauses
    }
}

/// Build the kill-switch policy from resolved facts
///
/// Clause order (earlier wins where `quick` applies):
/// 1. catch-all block (both directions) and unconditional outbound IPv6 block;
/// 2. quick-pass exceptions, each scoped as narrowly as possible: per-server
///    DNS, limited broadcast, all-hosts multicast, DHCP and ICMP echo on the
///    physical interface, tunnel-establishment ports to the tunnel remote
///    endpoint;
/// 3. final stateful pass-all on the tunnel interface.
///
/// Loopback skipping and the silent-drop block policy are rendered as filter
/// options by the rule-file serializer.
pub fn synthesize(
    physical: &NetworkInterface,
    tunnel: &NetworkInterface,
    dns: &BTreeSet<IpAddr>,
    generation: u64,
    endpoint_fallback: TunnelEndpointFallback,
) -> KsctlResult<FirewallPolicy> {
    if physical.role != InterfaceRole::Physical {
        return Err(KsctlError::InvalidParameter(
            format!("{} is not a physical interface", physical.name),
        ));
    }
    if tunnel.role != InterfaceRole::Tunnel {
        return Err(KsctlError::InvalidParameter(
            format!("{} is not a tunnel interface", tunnel.name),
        ));
    }
    validation::validate_interface_name(&physical.name)?;
    validation::validate_interface_name(&tunnel.name)?;

    let mut clauses = Vec::new();

    // Catch-alls: silently drop everything, and keep IPv6 from becoming a
    // side channel (the kill switch is IPv4-scoped)
    clauses.push(RuleClause::block_all());
    clauses.push(RuleClause {
        quick: true,
        direction: Direction::Out,
        af: AddressFamily::Inet6,
        keep_state: false,
        ..RuleClause::block_all()
    });

    // Per-server DNS: one clause per discovered resolver, never a blanket
    // any-to-any port 53 allow. IPv6 resolvers are excluded since outbound
    // IPv6 is blocked unconditionally above.
    for server in dns {
        match server {
            IpAddr::V4(_) => clauses.push(RuleClause {
                protocols: vec![Protocol::Tcp, Protocol::Udp],
                addr: Some(AddressConstraint::To(AddressSpec::Host(*server))),
                ports: Some(PortConstraint::Single(53)),
                ..RuleClause::pass_quick()
            }),
            IpAddr::V6(v6) => {
                debug!("Skipping IPv6 resolver {} (IPv6 egress is blocked)", v6)
            }
        }
    }

    // Limited broadcast, both directions
    clauses.push(RuleClause {
        addr: Some(AddressConstraint::To(AddressSpec::Host(IpAddr::V4(LIMITED_BROADCAST)))),
        ..RuleClause::pass_quick()
    });
    clauses.push(RuleClause {
        addr: Some(AddressConstraint::From(AddressSpec::Host(IpAddr::V4(LIMITED_BROADCAST)))),
        ..RuleClause::pass_quick()
    });

    // All-hosts multicast range, UDP only
    clauses.push(RuleClause {
        protocols: vec![Protocol::Udp],
        addr: Some(AddressConstraint::To(AddressSpec::Cidr(MULTICAST_NET, MULTICAST_PREFIX))),
        ..RuleClause::pass_quick()
    });
    clauses.push(RuleClause {
        protocols: vec![Protocol::Udp],
        addr: Some(AddressConstraint::From(AddressSpec::Cidr(MULTICAST_NET, MULTICAST_PREFIX))),
        ..RuleClause::pass_quick()
    });

    // DHCP, physical interface only
    clauses.push(RuleClause {
        interface: Some(physical.name.clone()),
        protocols: vec![Protocol::Tcp, Protocol::Udp],
        ports: Some(PortConstraint::Range(DHCP_PORT_LOW, DHCP_PORT_HIGH)),
        ..RuleClause::pass_quick()
    });

    // ICMP echo request for diagnostics, physical interface only
    clauses.push(RuleClause {
        interface: Some(physical.name.clone()),
        af: AddressFamily::Inet,
        protocols: vec![Protocol::Icmp],
        icmp_type: Some(ICMP_ECHO_REQUEST),
        ..RuleClause::pass_quick()
    });

    // Tunnel establishment (IKE/NAT-T/L2TP), physical interface only,
    // restricted to the tunnel's remote endpoint when known
    let endpoint = match tunnel.remote_addr {
        Some(remote) => Some(AddressConstraint::To(AddressSpec::Host(IpAddr::V4(remote)))),
        None => match endpoint_fallback {
            TunnelEndpointFallback::Widen => {
                warn!(
                    interface = %tunnel.name,
                    "Tunnel remote endpoint unknown; widening establishment rule to port-set scope"
                );
                None
            }
            TunnelEndpointFallback::Fail => return Err(KsctlError::NoTunnelEndpoint),
        },
    };
    clauses.push(RuleClause {
        interface: Some(physical.name.clone()),
        protocols: vec![Protocol::Tcp, Protocol::Udp],
        addr: endpoint,
        ports: Some(PortConstraint::Set(TUNNEL_PORTS.to_vec())),
        ..RuleClause::pass_quick()
    });

    // Everything over the tunnel, stateful, both directions
    clauses.push(RuleClause {
        quick: false,
        interface: Some(tunnel.name.clone()),
        ..RuleClause::pass_quick()
    });

    Ok(FirewallPolicy {
        physical_if: physical.name.clone(),
        tunnel_if: tunnel.name.clone(),
        generation,
        clauses,
    })
}

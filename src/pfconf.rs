//! pf.conf rendering
//!
//! Serializes a [`FirewallPolicy`] to the pf rule-file syntax loaded by
//! `pfctl -f`. The clause model maps onto the file losslessly: interface
//! macros, quick/pass/block keywords, the state-tracking flag, port sets and
//! address literals. Loopback skipping and the silent-drop block policy are
//! emitted as filter options ahead of the rules.

use crate::policy::{
    AddressConstraint, AddressFamily, AddressSpec, Direction, FirewallPolicy, PortConstraint,
    Protocol, RuleAction, RuleClause,
};

const PHYS_MACRO: &str = "phys_if";
const VPN_MACRO: &str = "vpn_if";

/// Render a policy to pf.conf text
pub fn render(policy: &FirewallPolicy) -> String {
    let mut conf = String::new();

    conf.push_str(&format!("# ksctl kill-switch policy, generation {}\n", policy.generation));
    conf.push_str(&format!("{} = \"{}\"\n", PHYS_MACRO, policy.physical_if));
    conf.push_str(&format!("{} = \"{}\"\n", VPN_MACRO, policy.tunnel_if));
    conf.push('\n');

    // Silently drop on block, never filter loopback
    conf.push_str("set block-policy drop\n");
    conf.push_str("set skip on lo0\n");
    conf.push('\n');

    for clause in &policy.clauses {
        conf.push_str(&render_clause(clause, policy));
        conf.push('\n');
    }

    conf
}

fn render_clause(clause: &RuleClause, policy: &FirewallPolicy) -> String {
    let mut line = String::new();

    line.push_str(match clause.action {
        RuleAction::Block => "block",
        RuleAction::Pass => "pass",
    });

    match clause.direction {
        Direction::In => line.push_str(" in"),
        Direction::Out => line.push_str(" out"),
        Direction::Any => {}
    }

    if clause.quick {
        line.push_str(" quick");
    }

    if let Some(interface) = &clause.interface {
        line.push_str(" on ");
        line.push_str(&macro_ref(interface, policy));
    }

    match clause.af {
        AddressFamily::Inet => line.push_str(" inet"),
        AddressFamily::Inet6 => line.push_str(" inet6"),
        AddressFamily::Any => {}
    }

    if !clause.protocols.is_empty() {
        line.push_str(" proto ");
        line.push_str(&render_protocols(&clause.protocols));
    }

    match (&clause.addr, &clause.ports) {
        (Some(AddressConstraint::To(spec)), ports) => {
            line.push_str(" to ");
            line.push_str(&render_address(spec));
            if let Some(ports) = ports {
                line.push_str(" port ");
                line.push_str(&render_ports(ports));
            }
        }
        (Some(AddressConstraint::From(spec)), ports) => {
            line.push_str(" from ");
            line.push_str(&render_address(spec));
            line.push_str(" to any");
            if let Some(ports) = ports {
                line.push_str(" port ");
                line.push_str(&render_ports(ports));
            }
        }
        (None, Some(ports)) => {
            line.push_str(" to any port ");
            line.push_str(&render_ports(ports));
        }
        (None, None) => {
            line.push_str(" all");
        }
    }

    if let Some(icmp_type) = clause.icmp_type {
        line.push_str(&format!(" icmp-type {}", icmp_type));
    }

    if clause.keep_state {
        line.push_str(" keep state");
    }

    line
}

fn macro_ref(interface: &str, policy: &FirewallPolicy) -> String {
    if interface == policy.physical_if {
        format!("${}", PHYS_MACRO)
    } else if interface == policy.tunnel_if {
        format!("${}", VPN_MACRO)
    } else {
        interface.to_string()
    }
}

fn render_protocols(protocols: &[Protocol]) -> String {
    let names: Vec<&str> = protocols
        .iter()
        .map(|p| match p {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        })
        .collect();
    if names.len() == 1 {
        names[0].to_string()
    } else {
        format!("{{ {} }}", names.join(", "))
    }
}

fn render_address(spec: &AddressSpec) -> String {
    match spec {
        AddressSpec::Host(ip) => ip.to_string(),
        AddressSpec::Cidr(net, prefix) => format!("{}/{}", net, prefix),
    }
}

fn render_ports(ports: &PortConstraint) -> String {
    match ports {
        PortConstraint::Single(port) => port.to_string(),
        PortConstraint::Range(low, high) => format!("{}:{}", low, high),
        PortConstraint::Set(set) => {
            let parts: Vec<String> = set.iter().map(|p| p.to_string()).collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelEndpointFallback;
    use crate::policy::synthesize;
    use crate::resolver::{InterfaceRole, NetworkInterface};
    use std::collections::BTreeSet;
    use std::net::IpAddr;

    fn scenario_a_conf() -> String {
        let physical = NetworkInterface {
            name: "en0".to_string(),
            role: InterfaceRole::Physical,
            local_addr: None,
            remote_addr: None,
        };
        let tunnel = NetworkInterface {
            name: "utun3".to_string(),
            role: InterfaceRole::Tunnel,
            local_addr: Some("10.8.0.2".parse().unwrap()),
            remote_addr: Some("203.0.113.9".parse().unwrap()),
        };
        let dns: BTreeSet<IpAddr> =
            ["1.1.1.1", "8.8.8.8"].iter().map(|a| a.parse().unwrap()).collect();
        let policy =
            synthesize(&physical, &tunnel, &dns, 7, TunnelEndpointFallback::Widen).unwrap();
        render(&policy)
    }

    #[test]
    fn test_render_scenario_a() {
        let conf = scenario_a_conf();
        let lines: Vec<&str> = conf.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(
            lines,
            vec![
                "# ksctl kill-switch policy, generation 7",
                "phys_if = \"en0\"",
                "vpn_if = \"utun3\"",
                "set block-policy drop",
                "set skip on lo0",
                "block all",
                "block out quick inet6 all",
                "pass quick proto { tcp, udp } to 1.1.1.1 port 53 keep state",
                "pass quick proto { tcp, udp } to 8.8.8.8 port 53 keep state",
                "pass quick to 255.255.255.255 keep state",
                "pass quick from 255.255.255.255 to any keep state",
                "pass quick proto udp to 224.0.0.0/4 keep state",
                "pass quick proto udp from 224.0.0.0/4 to any keep state",
                "pass quick on $phys_if proto { tcp, udp } to any port 67:68 keep state",
                "pass quick on $phys_if inet proto icmp all icmp-type 8 keep state",
                "pass quick on $phys_if proto { tcp, udp } to 203.0.113.9 port { 500, 4500, 1701 } keep state",
                "pass on $vpn_if all keep state",
            ]
        );
    }

    #[test]
    fn test_macros_used_for_resolved_interfaces() {
        let conf = scenario_a_conf();
        // Interface names appear only in the macro definitions
        let rule_lines: Vec<&str> =
            conf.lines().filter(|l| !l.contains('=') && !l.starts_with('#')).collect();
        for line in rule_lines {
            assert!(!line.contains("en0"), "literal name leaked: {}", line);
            assert!(!line.contains("utun3"), "literal name leaked: {}", line);
        }
    }
}

//! DNS resolver set collection
//!
//! Collects the resolver addresses the host is actually using so the DNS
//! allow-list matches real traffic, whether resolvers came from DHCP or
//! manual configuration.

use crate::inspector::SystemInspector;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::warn;

/// Collect the deduplicated set of DNS servers currently in effect
///
/// Never fails: a lookup failure degrades to an empty set (no DNS allow-rules
/// are emitted) and is logged as a degraded condition.
pub async fn collect_dns_servers(inspector: &dyn SystemInspector) -> BTreeSet<IpAddr> {
    match inspector.dns_servers().await {
        Ok(servers) => servers.into_iter().collect(),
        Err(e) => {
            warn!("DNS server lookup failed, continuing with empty set: {}", e);
            BTreeSet::new()
        }
    }
}

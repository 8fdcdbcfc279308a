//! Input validation and sanitization
//!
//! Interface names and addresses end up interpolated into pf.conf text and
//! privileged command lines, so everything is validated before use.

use crate::error::{KsctlError, KsctlResult};
use std::net::{IpAddr, Ipv4Addr};

/// Maximum length for interface names (kernel IFNAMSIZ minus NUL)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Validate interface name to prevent command or rule-file injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters
pub fn validate_interface_name(name: &str) -> KsctlResult<()> {
    if name.is_empty() {
        return Err(KsctlError::InvalidParameter(
            "Interface name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(KsctlError::InvalidParameter(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    // Only allow alphanumeric, dash, underscore
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(KsctlError::InvalidParameter(
                format!("Invalid interface name '{}': contains invalid character '{}'", name, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(KsctlError::InvalidParameter(
            "Interface name cannot start with dash".to_string()
        ));
    }

    Ok(())
}

/// Validate IP address
pub fn validate_ip_address(addr: &str) -> KsctlResult<IpAddr> {
    addr.parse::<IpAddr>()
        .map_err(|_| KsctlError::InvalidParameter(
            format!("Invalid IP address: {}", addr)
        ))
}

/// Validate IPv4 address specifically (the kill switch is IPv4-scoped)
pub fn validate_ipv4_address(addr: &str) -> KsctlResult<Ipv4Addr> {
    addr.parse::<Ipv4Addr>()
        .map_err(|_| KsctlError::InvalidParameter(
            format!("Invalid IPv4 address: {}", addr)
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_interface_names() {
        assert!(validate_interface_name("en0").is_ok());
        assert!(validate_interface_name("utun3").is_ok());
        assert!(validate_interface_name("ppp0").is_ok());
        assert!(validate_interface_name("bridge-1").is_ok());
    }

    #[test]
    fn test_invalid_interface_names() {
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("en0; rm -rf /").is_err());
        assert!(validate_interface_name("en0\"").is_err());
        assert!(validate_interface_name("-en0").is_err());
        assert!(validate_interface_name("waytoolonginterface0").is_err());
    }

    #[test]
    fn test_validate_ip_address() {
        assert!(validate_ip_address("1.1.1.1").is_ok());
        assert!(validate_ip_address("fe80::1").is_ok());
        assert!(validate_ip_address("not-an-ip").is_err());
    }

    #[test]
    fn test_validate_ipv4_address() {
        assert!(validate_ipv4_address("203.0.113.9").is_ok());
        assert!(validate_ipv4_address("fe80::1").is_err());
    }
}

//! Error types for ksctl

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum KsctlError {
    /// IO error
    Io(io::Error),
    /// Command execution failed
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },
    /// No default IPv4 route on the host
    NoRouteFound,
    /// No point-to-point interface with an assigned address
    NoTunnelInterface,
    /// Tunnel remote endpoint unknown and the configured fallback forbids
    /// widening the tunnel-establishment rule
    NoTunnelEndpoint,
    /// Rule file write or filter load failed; prior filter state is untouched
    PolicyApply(String),
    /// Privileged credential rejected or insufficient
    Privilege(String),
    /// Filter disable or backup reload failed; the host may still be blocked
    Revert(String),
    /// Invalid parameter
    InvalidParameter(String),
    /// Parse error
    Parse(String),
    /// Configuration error
    Config(String),
    /// Invalid state
    InvalidState(String),
}

impl fmt::Display for KsctlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KsctlError::Io(e) => write!(f, "IO error: {}", e),
            KsctlError::CommandFailed { cmd, code, stderr } => {
                if let Some(code) = code {
                    write!(f, "Command '{}' failed with code {}: {}", cmd, code, stderr)
                } else {
                    write!(f, "Command '{}' failed: {}", cmd, stderr)
                }
            }
            KsctlError::NoRouteFound => write!(f, "No default IPv4 route found"),
            KsctlError::NoTunnelInterface => {
                write!(f, "No point-to-point tunnel interface with an assigned address")
            }
            KsctlError::NoTunnelEndpoint => {
                write!(f, "Tunnel remote endpoint address could not be resolved")
            }
            KsctlError::PolicyApply(msg) => write!(f, "Policy apply failed: {}", msg),
            KsctlError::Privilege(msg) => write!(f, "Privilege failure: {}", msg),
            KsctlError::Revert(msg) => write!(f, "Revert failed: {}", msg),
            KsctlError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            KsctlError::Parse(msg) => write!(f, "Parse error: {}", msg),
            KsctlError::Config(msg) => write!(f, "Configuration error: {}", msg),
            KsctlError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for KsctlError {}

impl From<io::Error> for KsctlError {
    fn from(error: io::Error) -> Self {
        KsctlError::Io(error)
    }
}

impl From<serde_json::Error> for KsctlError {
    fn from(error: serde_json::Error) -> Self {
        KsctlError::Parse(error.to_string())
    }
}

impl KsctlError {
    /// Process exit code for the CLI boundary.
    ///
    /// 0 success, 1 detection failure, 2 apply failure, 3 privilege failure,
    /// 4 revert failure. Callers must treat any non-zero code as "the no-leak
    /// guarantee may not currently hold" and query actual state.
    pub fn exit_code(&self) -> i32 {
        match self {
            KsctlError::NoRouteFound
            | KsctlError::NoTunnelInterface
            | KsctlError::NoTunnelEndpoint => 1,
            KsctlError::PolicyApply(_) => 2,
            KsctlError::Privilege(_) => 3,
            KsctlError::Revert(_) => 4,
            _ => 2,
        }
    }
}

pub type KsctlResult<T> = Result<T, KsctlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(KsctlError::NoRouteFound.exit_code(), 1);
        assert_eq!(KsctlError::NoTunnelInterface.exit_code(), 1);
        assert_eq!(KsctlError::PolicyApply("x".into()).exit_code(), 2);
        assert_eq!(KsctlError::Privilege("x".into()).exit_code(), 3);
        assert_eq!(KsctlError::Revert("x".into()).exit_code(), 4);
    }

    #[test]
    fn test_display_includes_command() {
        let e = KsctlError::CommandFailed {
            cmd: "pfctl -d".to_string(),
            code: Some(1),
            stderr: "denied".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pfctl -d"));
        assert!(msg.contains("denied"));
    }
}

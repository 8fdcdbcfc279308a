//! Kill-switch orchestration
//!
//! [`KillSwitchController`] ties the read-only pipeline (resolver, DNS
//! collector, synthesizer) to the side-effecting applier and the tunnel
//! monitor. Apply and revert are serialized by one advisory lock so a
//! monitor-triggered revert can never race a user-triggered re-apply.

use crate::applier::{ApplyResult, PfApplier, PersistedState};
use crate::config::KillSwitchSettings;
use crate::dns;
use crate::error::{KsctlError, KsctlResult};
use crate::inspector::SystemInspector;
use crate::monitor::{MonitorState, TunnelMonitor};
use crate::policy;
use crate::resolver;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Supplies the elevated-privilege credential per privileged invocation
///
/// The controller never persists the credential beyond the lifetime of the
/// call it was fetched for.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> KsctlResult<String>;
}

/// Reads the credential from an environment variable on every call
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    pub fn new(var: &str) -> Self {
        Self { var: var.to_string() }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credential(&self) -> KsctlResult<String> {
        std::env::var(&self.var).map_err(|_| {
            KsctlError::Privilege(format!("credential variable {} not set", self.var))
        })
    }
}

/// Snapshot of controller state for status reporting
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub monitor_state: MonitorState,
    pub persisted: Option<PersistedState>,
}

/// Orchestrates enable/disable cycles and automatic revert on tunnel loss
pub struct KillSwitchController {
    inspector: Arc<dyn SystemInspector>,
    applier: Arc<PfApplier>,
    credentials: Arc<dyn CredentialProvider>,
    settings: KillSwitchSettings,
    monitor: Arc<TunnelMonitor>,
    /// Advisory lock serializing apply and revert
    apply_lock: Arc<Mutex<()>>,
    current: Arc<RwLock<Option<ApplyResult>>>,
}

impl KillSwitchController {
    pub fn new(
        inspector: Arc<dyn SystemInspector>,
        applier: Arc<PfApplier>,
        credentials: Arc<dyn CredentialProvider>,
        settings: KillSwitchSettings,
    ) -> Self {
        Self {
            inspector,
            applier,
            credentials,
            settings,
            monitor: Arc::new(TunnelMonitor::new()),
            apply_lock: Arc::new(Mutex::new(())),
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Enable the kill switch
    ///
    /// Resolves interfaces and DNS fresh, synthesizes the policy, applies it,
    /// and starts the tunnel monitor. Detection failures abort before any
    /// mutation. Re-enabling while already active replaces the loaded policy;
    /// the single flush-and-load command guarantees only one policy is ever
    /// loaded.
    pub async fn enable(&self, tunnel_hint: Option<&str>) -> KsctlResult<ApplyResult> {
        // Detection happens before anything mutates
        let physical = resolver::resolve_physical(self.inspector.as_ref()).await?;
        let tunnel = resolver::resolve_tunnel(self.inspector.as_ref(), tunnel_hint).await?;
        let dns_servers = dns::collect_dns_servers(self.inspector.as_ref()).await;
        if dns_servers.is_empty() {
            warn!("No DNS servers discovered; policy will not allow DNS");
        }

        // Quiesce a previous activation's monitor before re-applying
        self.monitor.stop().await;

        let _guard = self.apply_lock.lock().await;

        let generation = self.applier.next_generation().await?;
        let policy = policy::synthesize(
            &physical,
            &tunnel,
            &dns_servers,
            generation,
            self.settings.tunnel_endpoint_fallback,
        )?;

        let credential = self.credentials.credential().await?;
        let result = self.applier.apply(&policy, &credential).await?;
        drop(credential);

        *self.current.write().await = Some(result.clone());

        self.monitor.arm().await;
        let mut lost_rx = self
            .monitor
            .start(self.inspector.clone(), tunnel.name.clone(), self.settings.clone())
            .await;

        // Automatic revert path: waits for a single tunnel-loss report
        let applier = self.applier.clone();
        let credentials = self.credentials.clone();
        let monitor = self.monitor.clone();
        let apply_lock = self.apply_lock.clone();
        let current = self.current.clone();
        tokio::spawn(async move {
            if lost_rx.recv().await.is_none() {
                return;
            }
            let _guard = apply_lock.lock().await;
            let result = current.read().await.clone();
            match credentials.credential().await {
                Ok(credential) => {
                    if let Err(e) = applier.revert(result.as_ref(), &credential).await {
                        error!("Automatic revert failed: {}", e);
                        return;
                    }
                }
                Err(e) => {
                    error!("Automatic revert could not obtain credential: {}", e);
                    return;
                }
            }
            *current.write().await = None;
            monitor.mark_inactive().await;
            info!("Tunnel loss handled, kill switch reverted");
        });

        info!(generation = result.generation, tunnel = %tunnel.name, "Kill switch enabled");
        Ok(result)
    }

    /// Disable the kill switch
    ///
    /// Cancels the monitor first so it cannot re-detect the interface's
    /// legitimate absence after revert. Idempotent when nothing is active.
    pub async fn disable(&self) -> KsctlResult<()> {
        self.monitor.stop().await;

        let _guard = self.apply_lock.lock().await;
        let result = self.current.read().await.clone();

        let credential = self.credentials.credential().await?;
        self.applier.revert(result.as_ref(), &credential).await?;
        drop(credential);

        *self.current.write().await = None;
        self.monitor.mark_inactive().await;
        info!("Kill switch disabled");
        Ok(())
    }

    /// Revert a policy left loaded by a crash between apply and revert
    ///
    /// Called on startup; a no-op when the persisted record shows nothing
    /// active.
    pub async fn recover(&self) -> KsctlResult<()> {
        let persisted = self.applier.load_state().await?;
        match persisted {
            Some(state) if state.active => {
                warn!(
                    generation = state.result.generation,
                    "Stale kill-switch policy found on startup, reverting"
                );
                let _guard = self.apply_lock.lock().await;
                let credential = self.credentials.credential().await?;
                self.applier.revert(Some(&state.result), &credential).await
            }
            _ => Ok(()),
        }
    }

    /// Current controller and persisted state
    pub async fn status(&self) -> KsctlResult<ControllerStatus> {
        Ok(ControllerStatus {
            monitor_state: self.monitor.state().await,
            persisted: self.applier.load_state().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_env_credential_read_per_call() {
        let provider = EnvCredentialProvider::new("KSCTL_TEST_CREDENTIAL");

        std::env::set_var("KSCTL_TEST_CREDENTIAL", "first");
        assert_eq!(provider.credential().await.unwrap(), "first");

        // Each call reads fresh; rotation takes effect without a restart
        std::env::set_var("KSCTL_TEST_CREDENTIAL", "second");
        assert_eq!(provider.credential().await.unwrap(), "second");

        std::env::remove_var("KSCTL_TEST_CREDENTIAL");
        let err = provider.credential().await.unwrap_err();
        assert!(matches!(err, KsctlError::Privilege(_)));
        assert_eq!(err.exit_code(), 3);
    }
}

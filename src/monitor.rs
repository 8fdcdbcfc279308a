//! Tunnel liveness monitoring
//!
//! Background task polling the interface table at a fixed interval while a
//! policy is loaded. A transient inspector error is retried on the next
//! interval and counts for nothing; only repeated confirmed absence of the
//! tunnel interface reports a loss, exactly once.

use crate::config::KillSwitchSettings;
use crate::inspector::SystemInspector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Monitor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No policy loaded
    Inactive,
    /// Policy computed and applied, tunnel presence not yet confirmed
    Armed,
    /// Policy applied and tunnel confirmed present
    Active,
    /// Tunnel loss detected, revert pending
    Reverted,
}

/// Sent once when the tunnel interface is confirmed gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelLost {
    pub tunnel_if_missing_polls: u32,
}

/// Watches for the tunnel interface disappearing while a policy is loaded
///
/// Each `start` bumps an activation epoch and the spawned loop only acts
/// while its own epoch is current, so a loop from a previous activation that
/// was mid-sleep across a stop/start cycle exits instead of watching a stale
/// interface name.
pub struct TunnelMonitor {
    state: Arc<RwLock<MonitorState>>,
    epoch: Arc<RwLock<u64>>,
}

impl TunnelMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::Inactive)),
            epoch: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    /// Mark the policy applied but not yet confirmed
    pub async fn arm(&self) {
        *self.state.write().await = MonitorState::Armed;
    }

    /// Return to the idle state after a completed revert or disable
    pub async fn mark_inactive(&self) {
        *self.state.write().await = MonitorState::Inactive;
    }

    /// Start polling; the returned receiver yields at most one [`TunnelLost`]
    pub async fn start(
        &self,
        inspector: Arc<dyn SystemInspector>,
        tunnel_if: String,
        settings: KillSwitchSettings,
    ) -> mpsc::Receiver<TunnelLost> {
        let (lost_tx, lost_rx) = mpsc::channel(1);

        let my_epoch = {
            let mut epoch = self.epoch.write().await;
            *epoch += 1;
            *epoch
        };
        let state = self.state.clone();
        let epoch = self.epoch.clone();

        tokio::spawn(async move {
            Self::poll_loop(inspector, tunnel_if, settings, state, epoch, my_epoch, lost_tx)
                .await;
        });

        lost_rx
    }

    /// Stop polling without touching the loaded policy
    ///
    /// Called before an explicit revert so the monitor does not re-detect the
    /// interface's legitimate absence afterwards. Invalidates every loop
    /// spawned so far.
    pub async fn stop(&self) {
        *self.epoch.write().await += 1;
        info!("Tunnel monitor stopped");
    }

    async fn poll_loop(
        inspector: Arc<dyn SystemInspector>,
        tunnel_if: String,
        settings: KillSwitchSettings,
        state: Arc<RwLock<MonitorState>>,
        epoch: Arc<RwLock<u64>>,
        my_epoch: u64,
        lost_tx: mpsc::Sender<TunnelLost>,
    ) {
        let interval = Duration::from_secs(settings.poll_interval_secs).max(Duration::from_millis(10));
        let mut misses: u32 = 0;

        info!(interface = %tunnel_if, "Tunnel monitor started");

        loop {
            tokio::time::sleep(interval).await;

            if *epoch.read().await != my_epoch {
                break;
            }

            let snapshots = match inspector.interfaces().await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    // Transient query failure: retried next interval
                    warn!("Interface poll failed, retrying: {}", e);
                    continue;
                }
            };

            // A restart may have happened during the query; a superseded loop
            // must not touch the shared state or report anything
            if *epoch.read().await != my_epoch {
                break;
            }

            let present = snapshots.iter().any(|s| s.name == tunnel_if);

            if present {
                misses = 0;
                let mut state = state.write().await;
                if *state == MonitorState::Armed {
                    debug!(interface = %tunnel_if, "Tunnel presence confirmed");
                    *state = MonitorState::Active;
                }
                continue;
            }

            // Only a confirmed, repeated absence while Active triggers revert
            if *state.read().await != MonitorState::Active {
                continue;
            }

            misses += 1;
            debug!(interface = %tunnel_if, misses, "Tunnel interface absent");
            if misses >= settings.absence_threshold.max(1) {
                // The report decision is atomic with stop/start: a loop that
                // lost its epoch under the write lock stays silent
                let mut epoch_guard = epoch.write().await;
                if *epoch_guard != my_epoch {
                    break;
                }
                *epoch_guard += 1;
                drop(epoch_guard);

                info!(interface = %tunnel_if, "Tunnel lost, requesting revert");
                *state.write().await = MonitorState::Reverted;
                let _ = lost_tx.send(TunnelLost { tunnel_if_missing_polls: misses }).await;
                break;
            }
        }
    }
}

impl Default for TunnelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

//! Policy apply and revert
//!
//! The applier is the only component with side effects. Apply renders the
//! policy to a freshly created temp path, then loads it with a single
//! privileged `pfctl -f <file> -e`; a failed load leaves the previous filter
//! state untouched. Revert disables the filter and reloads the backed-up
//! system configuration, and is safe to call when nothing is active.
//!
//! The privileged credential is supplied per call and never stored or logged.

use crate::error::{KsctlError, KsctlResult};
use crate::pfconf;
use crate::policy::FirewallPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

const STATE_FILE: &str = "state.json";
const BACKUP_SNAPSHOT: &str = "pf.conf.backup";
const LOCK_FILE: &str = "apply.lock";

/// Exclusive advisory lock over the state directory
///
/// Held for the duration of an apply or revert. The flock is per open file
/// description, so it also serializes against other processes sharing the
/// same state directory (a resident `enable` and a separate `disable` or
/// `recover` invocation). Released when dropped.
struct StateLock {
    file: std::fs::File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // SAFETY: the fd is owned by `file` and stays open until after this
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Where the pre-activation filter configuration can be found for revert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// The system's default filter configuration path
    pub original_path: PathBuf,
    /// Content snapshot taken before first apply, when readable
    pub snapshot_path: Option<PathBuf>,
}

/// Outcome of a successful apply, durable across process restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub generation: u64,
    pub applied_at: DateTime<Utc>,
    pub backup: BackupDescriptor,
}

/// Persisted cross-invocation state
///
/// This is the sole record shared between apply, revert and crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Whether a kill-switch policy is believed to be loaded
    pub active: bool,
    pub result: ApplyResult,
}

/// Executes a privileged command with a caller-supplied credential
#[async_trait]
pub trait PrivilegedRunner: Send + Sync {
    async fn run_privileged(
        &self,
        credential: &str,
        program: &str,
        args: &[&str],
    ) -> KsctlResult<String>;
}

/// Production runner using `sudo -S` with the credential piped to stdin,
/// or direct invocation when already running as root
pub struct SudoRunner;

impl SudoRunner {
    pub fn new() -> Self {
        Self
    }

    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no failure modes
        unsafe { libc::geteuid() == 0 }
    }
}

impl Default for SudoRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrivilegedRunner for SudoRunner {
    async fn run_privileged(
        &self,
        credential: &str,
        program: &str,
        args: &[&str],
    ) -> KsctlResult<String> {
        let cmd_str = format!("{} {}", program, args.join(" "));

        let output = if self.is_root() {
            Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|e| KsctlError::CommandFailed {
                    cmd: cmd_str.clone(),
                    code: None,
                    stderr: e.to_string(),
                })?
        } else {
            // -S reads the password from stdin, -p '' suppresses the prompt
            let mut child = Command::new("sudo")
                .arg("-S")
                .arg("-p")
                .arg("")
                .arg("--")
                .arg(program)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| KsctlError::CommandFailed {
                    cmd: format!("sudo {}", cmd_str),
                    code: None,
                    stderr: e.to_string(),
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(credential.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
            }

            child
                .wait_with_output()
                .await
                .map_err(|e| KsctlError::CommandFailed {
                    cmd: format!("sudo {}", cmd_str),
                    code: None,
                    stderr: e.to_string(),
                })?
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            if is_credential_rejection(&stderr) {
                return Err(KsctlError::Privilege(
                    "sudo rejected the supplied credential".to_string(),
                ));
            }
            return Err(KsctlError::CommandFailed {
                cmd: cmd_str,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Classify sudo stderr output that indicates a credential problem rather
/// than a failure of the wrapped command
pub fn is_credential_rejection(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("sorry, try again")
        || stderr.contains("incorrect password")
        || stderr.contains("a password is required")
        || stderr.contains("not in the sudoers file")
}

/// Applies and reverts kill-switch policies via pfctl
pub struct PfApplier {
    runner: Box<dyn PrivilegedRunner>,
    state_dir: PathBuf,
    pf_conf_path: PathBuf,
}

impl PfApplier {
    pub fn new(runner: Box<dyn PrivilegedRunner>, state_dir: PathBuf, pf_conf_path: PathBuf) -> Self {
        Self { runner, state_dir, pf_conf_path }
    }

    fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Load the persisted apply record, if any
    pub async fn load_state(&self) -> KsctlResult<Option<PersistedState>> {
        let path = self.state_file();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_state(&self, state: &PersistedState) -> KsctlResult<()> {
        let content = serde_json::to_string_pretty(state)?;
        tokio::fs::write(self.state_file(), content).await?;
        Ok(())
    }

    /// Next generation counter, monotonic across restarts
    pub async fn next_generation(&self) -> KsctlResult<u64> {
        Ok(match self.load_state().await? {
            Some(state) => state.result.generation + 1,
            None => 1,
        })
    }

    async fn ensure_state_dir(&self) -> KsctlResult<()> {
        if !self.state_dir.exists() {
            tokio::fs::create_dir_all(&self.state_dir).await?;
            info!("Created state directory {:?}", self.state_dir);
        }
        Ok(())
    }

    /// Take the exclusive advisory lock serializing apply and revert across
    /// processes sharing this state directory
    async fn lock_state(&self) -> KsctlResult<StateLock> {
        self.ensure_state_dir().await?;
        let path = self.state_dir.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)?;
            // Blocks until a concurrent apply/revert releases the lock
            // SAFETY: flock on an fd we own for the call's duration
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(file)
        })
        .await
        .map_err(|e| KsctlError::InvalidState(format!("lock task aborted: {}", e)))??;
        Ok(StateLock { file })
    }

    /// Snapshot the pre-existing filter configuration before first apply
    ///
    /// Always yields a descriptor; a missing snapshot (unreadable source or
    /// failed write) is the degraded signal, and revert then falls back to
    /// the original path.
    async fn capture_backup(&self) -> BackupDescriptor {
        let snapshot_path = self.state_dir.join(BACKUP_SNAPSHOT);
        match tokio::fs::read(&self.pf_conf_path).await {
            Ok(content) => {
                if !snapshot_path.exists() {
                    if let Err(e) = tokio::fs::write(&snapshot_path, &content).await {
                        warn!("Failed to write backup snapshot: {}", e);
                        return BackupDescriptor {
                            original_path: self.pf_conf_path.clone(),
                            snapshot_path: None,
                        };
                    }
                    debug!("Captured filter backup to {:?}", snapshot_path);
                }
                BackupDescriptor {
                    original_path: self.pf_conf_path.clone(),
                    snapshot_path: Some(snapshot_path),
                }
            }
            Err(e) => {
                warn!("Could not read {:?} for backup: {}", self.pf_conf_path, e);
                BackupDescriptor {
                    original_path: self.pf_conf_path.clone(),
                    snapshot_path: None,
                }
            }
        }
    }

    /// Write the rendered policy to a freshly created generation-suffixed
    /// path, load it and enable the filter as a single privileged command
    ///
    /// On load failure the temp file is discarded and the previous filter
    /// state is left untouched.
    pub async fn apply(
        &self,
        policy: &FirewallPolicy,
        credential: &str,
    ) -> KsctlResult<ApplyResult> {
        let _lock = self.lock_state().await?;

        let backup = self.capture_backup().await;

        let rule_path = self.state_dir.join(format!(
            "pf.conf.gen{}.{}",
            policy.generation,
            std::process::id()
        ));
        let conf = pfconf::render(policy);
        write_private(&rule_path, &conf)
            .await
            .map_err(|e| KsctlError::PolicyApply(format!("rule file write: {}", e)))?;

        let rule_path_str = rule_path.to_string_lossy().to_string();
        let load = self
            .runner
            .run_privileged(credential, "pfctl", &["-f", &rule_path_str, "-e"])
            .await;

        match load {
            Ok(_) => {}
            // pf already enabled still loads the rule set
            Err(KsctlError::CommandFailed { ref stderr, .. })
                if stderr.to_lowercase().contains("already enabled") => {}
            Err(KsctlError::Privilege(msg)) => {
                let _ = tokio::fs::remove_file(&rule_path).await;
                return Err(KsctlError::Privilege(msg));
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&rule_path).await;
                return Err(KsctlError::PolicyApply(e.to_string()));
            }
        }

        let result = ApplyResult {
            generation: policy.generation,
            applied_at: Utc::now(),
            backup,
        };
        self.save_state(&PersistedState { active: true, result: result.clone() })
            .await?;

        info!(generation = policy.generation, "Kill-switch policy applied");
        Ok(result)
    }

    /// Disable the filter and reload the backed-up system configuration
    ///
    /// Idempotent: a no-op when no policy is recorded as active. Falls back
    /// to the well-known system default when the backup snapshot is missing.
    pub async fn revert(
        &self,
        result: Option<&ApplyResult>,
        credential: &str,
    ) -> KsctlResult<()> {
        let _lock = self.lock_state().await?;
        let persisted = self.load_state().await?;

        let (generation, backup) = match (result, &persisted) {
            (Some(r), _) => (r.generation, r.backup.clone()),
            (None, Some(s)) if s.active => (s.result.generation, s.result.backup.clone()),
            (None, _) => {
                debug!("No active policy; revert is a no-op");
                return Ok(());
            }
        };

        if let Err(e) = self.runner.run_privileged(credential, "pfctl", &["-d"]).await {
            match e {
                // Already disabled is the state we wanted
                KsctlError::CommandFailed { ref stderr, .. }
                    if stderr.to_lowercase().contains("not enabled") => {}
                KsctlError::Privilege(msg) => return Err(KsctlError::Privilege(msg)),
                e => {
                    error!("Filter disable failed; the host may still be blocked: {}", e);
                    return Err(KsctlError::Revert(e.to_string()));
                }
            }
        }

        // Reload whatever configuration predates the kill switch
        let reload_path = backup
            .snapshot_path
            .clone()
            .filter(|p| p.exists())
            .unwrap_or_else(|| backup.original_path.clone());
        let reload_str = reload_path.to_string_lossy().to_string();

        if let Err(e) = self
            .runner
            .run_privileged(credential, "pfctl", &["-f", &reload_str])
            .await
        {
            match e {
                KsctlError::Privilege(msg) => return Err(KsctlError::Privilege(msg)),
                e => {
                    error!("Backup reload failed; the host may still be blocked: {}", e);
                    return Err(KsctlError::Revert(e.to_string()));
                }
            }
        }

        if let Some(mut state) = persisted {
            state.active = false;
            self.save_state(&state).await?;
        }

        info!(generation, "Kill-switch policy reverted");
        Ok(())
    }
}

/// Write content to a fresh file readable only by the owner
async fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::write(path, content).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_rejection_classification() {
        assert!(is_credential_rejection("Sorry, try again.\n"));
        assert!(is_credential_rejection("sudo: 1 incorrect password attempt"));
        assert!(is_credential_rejection("sudo: a password is required"));
        assert!(!is_credential_rejection("pfctl: syntax error on line 3"));
        assert!(!is_credential_rejection(""));
    }

    #[test]
    fn test_persisted_state_round_trip() {
        let state = PersistedState {
            active: true,
            result: ApplyResult {
                generation: 3,
                applied_at: Utc::now(),
                backup: BackupDescriptor {
                    original_path: PathBuf::from("/etc/pf.conf"),
                    snapshot_path: None,
                },
            },
        };
        let json = serde_json::to_string(&state).unwrap();
        let parsed: PersistedState = serde_json::from_str(&json).unwrap();
        assert!(parsed.active);
        assert_eq!(parsed.result.generation, 3);
        assert_eq!(parsed.result.backup, state.result.backup);
    }

    struct NoopRunner;

    #[async_trait]
    impl PrivilegedRunner for NoopRunner {
        async fn run_privileged(
            &self,
            _credential: &str,
            _program: &str,
            _args: &[&str],
        ) -> KsctlResult<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_state_lock_serializes_across_appliers() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_dir = dir.path().join("run");
        let pf_conf = dir.path().join("pf.conf");

        let first = PfApplier::new(Box::new(NoopRunner), state_dir.clone(), pf_conf.clone());
        let second = PfApplier::new(Box::new(NoopRunner), state_dir, pf_conf);

        let held = first.lock_state().await.unwrap();

        // A second applier over the same state dir (a separate controller,
        // as in a concurrent disable) must wait for the lock
        let pending = tokio::spawn(async move { second.lock_state().await.map(|_| ()) });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!pending.is_finished(), "lock must block a concurrent acquisition");

        drop(held);
        tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .expect("lock acquisition should complete after release")
            .unwrap()
            .unwrap();
    }
}

//! Cooperative self-restart: the SIGUSR1 scheduler and the one-shot restart
//! sentinel consumed after the next boot.

use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

/// Default delay before the self-signal fires.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_200;

/// Exit code asking the launcher to start a fresh process. Used on platforms
/// without SIGUSR1 and by the signal handler itself.
pub const RESTART_EXIT_CODE: i32 = 64;

/// Delivery routing copied into the sentinel for post-restart resumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SentinelDelivery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SentinelStats {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One-shot payload written before a cooperative restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartSentinel {
    pub kind: String, // always "restart"
    pub status: String,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_context: Option<SentinelDelivery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub doctor_hint: String,
    pub stats: SentinelStats,
}

impl RestartSentinel {
    pub fn new(reason: Option<String>, session_key: Option<String>) -> Self {
        Self {
            kind: "restart".into(),
            status: "restarting".into(),
            ts: clawgate_common::time::now_ms(),
            session_key,
            delivery_context: None,
            thread_id: None,
            message: None,
            doctor_hint: "gateway restarted itself; run the doctor if it fails to come back".into(),
            stats: SentinelStats {
                mode: "gateway".into(),
                reason,
            },
        }
    }
}

/// What `scheduleSelfRestart` reports back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartInfo {
    pub pid: u32,
    pub signal: String,
    pub delay_ms: u64,
}

#[cfg(unix)]
pub const SELF_SIGNAL: &str = "SIGUSR1";
#[cfg(not(unix))]
pub const SELF_SIGNAL: &str = "restart-exit";

/// The restart plane: sentinel staging + the delayed self-signal.
pub struct RestartPlane {
    sentinel_path: PathBuf,
}

impl RestartPlane {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            sentinel_path: state_dir.into().join("restart.json"),
        }
    }

    /// Stage a sentinel for the upcoming restart. Persisted immediately so a
    /// hard kill between scheduling and the signal still leaves the
    /// breadcrumb.
    pub fn stage(&self, sentinel: RestartSentinel) {
        self.write_sentinel(&sentinel);
    }

    /// Persist a sentinel atomically. Best-effort: failures log and never
    /// block the restart.
    pub fn write_sentinel(&self, sentinel: &RestartSentinel) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.sentinel_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let body = serde_json::to_string_pretty(sentinel)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let tmp = self.sentinel_path.with_extension("tmp");
            std::fs::write(&tmp, body)?;
            std::fs::rename(&tmp, &self.sentinel_path)
        })();
        if let Err(e) = result {
            warn!(error = %e, "failed to write restart sentinel");
        }
    }

    /// Read and delete the sentinel. Consumed exactly once per boot.
    pub fn consume_sentinel(&self) -> Option<RestartSentinel> {
        let raw = std::fs::read_to_string(&self.sentinel_path).ok()?;
        if let Err(e) = std::fs::remove_file(&self.sentinel_path) {
            warn!(error = %e, "failed to delete restart sentinel");
        }
        match serde_json::from_str(&raw) {
            Ok(sentinel) => Some(sentinel),
            Err(e) => {
                warn!(error = %e, "restart sentinel unreadable, dropping");
                None
            },
        }
    }

    /// Schedule the cooperative self-restart. The signal fires after
    /// `delay_ms` regardless of in-flight work.
    pub fn schedule_self_restart(
        &self,
        delay_ms: Option<u64>,
        reason: Option<String>,
        session_key: Option<String>,
    ) -> RestartInfo {
        let delay_ms = delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS);
        self.stage(RestartSentinel::new(reason.clone(), session_key));

        let pid = std::process::id();
        info!(pid, delay_ms, reason = reason.as_deref().unwrap_or(""), "restart scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            send_self_signal(pid);
        });

        RestartInfo {
            pid,
            signal: SELF_SIGNAL.to_string(),
            delay_ms,
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_self_signal(pid: u32) {
    // SAFETY: kill(2) with our own pid and a standard signal has no memory
    // safety implications.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGUSR1) };
    if rc != 0 {
        warn!(pid, "self SIGUSR1 failed, exiting for the launcher instead");
        std::process::exit(RESTART_EXIT_CODE);
    }
}

#[cfg(not(unix))]
fn send_self_signal(_pid: u32) {
    // No SIGUSR1 on this platform: exit with the restart code so the
    // launcher brings up a fresh process.
    std::process::exit(RESTART_EXIT_CODE);
}

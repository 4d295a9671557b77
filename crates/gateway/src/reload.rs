//! The reload plan: diff the running config against the file, hot-apply what
//! can change in place, and schedule a restart for the rest.

use std::sync::Arc;

use {
    clawgate_bus::BusSettings,
    clawgate_config::{ConfigSnapshot, ReloadMode, ReloadPlan, classify_paths, diff_paths},
    tracing::info,
};

use crate::state::GatewayState;

/// Record the config the process booted with. Restart-required paths are
/// compared against this until the next restart.
pub async fn record_boot_config(state: &Arc<GatewayState>, snapshot: &ConfigSnapshot) {
    *state.applied_config.write().await = (snapshot.raw.clone(), snapshot.hash.clone());
}

/// Push hot-reloadable settings from a snapshot into the running services.
pub async fn apply_hot(state: &Arc<GatewayState>, snapshot: &ConfigSnapshot) {
    let Some(config) = &snapshot.config else {
        return;
    };
    state.bus.update_settings(BusSettings {
        show_heartbeat_ok: config.heartbeat_visibility.show_ok,
        default_verbosity: config.tools.verbosity.clone(),
    });
}

/// Called after any API-driven config write: hot paths take effect
/// immediately, restart paths wait for an explicit reload or restart.
pub async fn after_config_write(state: &Arc<GatewayState>, snapshot: &ConfigSnapshot) {
    apply_hot(state, snapshot).await;
}

/// Compute the plan between the boot config and a snapshot.
pub async fn plan_against_boot(state: &Arc<GatewayState>, snapshot: &ConfigSnapshot) -> ReloadPlan {
    let boot_raw = state.applied_config.read().await.0.clone();
    let boot_value: serde_json::Value =
        serde_json::from_str(&boot_raw).unwrap_or(serde_json::Value::Object(Default::default()));
    classify_paths(diff_paths(&boot_value, &snapshot.value()))
}

/// Whether restart-required paths changed since boot.
pub async fn pending_restart(state: &Arc<GatewayState>, snapshot: &ConfigSnapshot) -> bool {
    plan_against_boot(state, snapshot).await.restart_required()
}

/// The `/reload` entry point, shared by the admin pipe.
pub async fn run_reload(state: &Arc<GatewayState>) -> serde_json::Value {
    let snapshot = match state.config.read_snapshot() {
        Ok(s) => s,
        Err(e) => {
            return serde_json::json!({"ok": false, "error": e.to_string()});
        },
    };
    if !snapshot.valid {
        return serde_json::json!({
            "ok": false,
            "error": "config is invalid",
            "issues": snapshot.issues,
        });
    }

    let mode = snapshot
        .config
        .as_ref()
        .map(|c| c.reload.mode)
        .unwrap_or_default();
    if mode == ReloadMode::Off {
        return serde_json::json!({"ok": true, "mode": "off", "hotPaths": [], "restartPaths": []});
    }

    let plan = plan_against_boot(state, &snapshot).await;
    apply_hot(state, &snapshot).await;

    let force_restart = mode == ReloadMode::Restart && !plan.is_empty();
    let restart_scheduled = plan.restart_required() || force_restart;
    if restart_scheduled {
        info!(paths = ?plan.restart_paths, "reload requires restart");
        state
            .restart
            .schedule_self_restart(None, Some("config reload".into()), None);
    }

    serde_json::json!({
        "ok": true,
        "mode": match mode {
            ReloadMode::Hot => "hot",
            ReloadMode::Restart => "restart",
            ReloadMode::Off => "off",
        },
        "hotPaths": plan.hot_paths,
        "restartPaths": plan.restart_paths,
        "restartScheduled": restart_scheduled,
    })
}

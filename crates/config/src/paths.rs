//! State and config path resolution.
//!
//! Honors the OpenClaw-compatible environment variables: `OPENCLAW_STATE_DIR`
//! (state root), `OPENCLAW_PROFILE` (suffix for side-by-side installs), and
//! `OPENCLAW_ADMIN_PIPE` (admin socket path).

use std::path::PathBuf;

/// Standard config file names, checked in order.
pub const CONFIG_FILENAMES: &[&str] = &[
    "clawgate.json",
    "clawgate.toml",
    "clawgate.yaml",
    "clawgate.yml",
];

/// Resolve the state directory.
///
/// `OPENCLAW_STATE_DIR` wins; otherwise `~/.local/share/clawgate[-<profile>]`
/// via the platform data dir.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPENCLAW_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let name = match std::env::var("OPENCLAW_PROFILE") {
        Ok(p) if !p.trim().is_empty() => format!("clawgate-{}", p.trim()),
        _ => "clawgate".to_string(),
    };
    directories::ProjectDirs::from("", "", &name)
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".").join(name))
}

/// Find the first config file under the state dir, falling back to the
/// user-global config dir.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = state_dir().join(name);
        if p.exists() {
            return Some(p);
        }
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "clawgate") {
        for name in CONFIG_FILENAMES {
            let p = dirs.config_dir().join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Returns the path of an existing config file, or the default JSON path
/// under the state dir.
pub fn find_or_default_config_path() -> PathBuf {
    find_config_file().unwrap_or_else(|| state_dir().join("clawgate.json"))
}

/// Resolve the admin pipe path: `OPENCLAW_ADMIN_PIPE`, then the config
/// override, then `<state_dir>/admin.sock`.
pub fn admin_pipe_path(config_override: Option<&str>) -> PathBuf {
    if let Ok(p) = std::env::var("OPENCLAW_ADMIN_PIPE") {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    if let Some(p) = config_override {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    state_dir().join("admin.sock")
}

/// Restart sentinel path under the state dir.
pub fn restart_sentinel_path() -> PathBuf {
    state_dir().join("restart.json")
}

/// Model-catalog cache path under the state dir.
pub fn model_catalog_path() -> PathBuf {
    state_dir().join("model-catalog.json")
}

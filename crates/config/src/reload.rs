//! Hot-reload vs restart classification for config changes.

use serde::{Deserialize, Serialize};

/// How `/reload` reacts to config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Apply hot-reloadable changes in place; schedule a restart only when a
    /// restart-required path changed.
    #[default]
    Hot,
    /// Always restart on any change.
    Restart,
    /// Ignore config changes entirely.
    Off,
}

/// Classification of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadClass {
    Hot,
    RestartRequired,
}

/// Paths that can only take effect through a process restart. Matched by
/// dotted-prefix against diff paths.
const RESTART_PREFIXES: &[&str] = &["gateway", "admin", "mcp.providers"];

/// Classify a single dotted path.
pub fn classify_path(path: &str) -> ReloadClass {
    for prefix in RESTART_PREFIXES {
        if path == *prefix || path.starts_with(&format!("{prefix}.")) {
            return ReloadClass::RestartRequired;
        }
    }
    ReloadClass::Hot
}

/// The plan computed from a config diff.
#[derive(Debug, Clone, Default)]
pub struct ReloadPlan {
    pub hot_paths: Vec<String>,
    pub restart_paths: Vec<String>,
}

impl ReloadPlan {
    pub fn restart_required(&self) -> bool {
        !self.restart_paths.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.hot_paths.is_empty() && self.restart_paths.is_empty()
    }
}

/// Split changed paths into hot-reloadable and restart-required sets.
pub fn classify_paths<I, S>(paths: I) -> ReloadPlan
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut plan = ReloadPlan::default();
    for path in paths {
        let path = path.into();
        match classify_path(&path) {
            ReloadClass::Hot => plan.hot_paths.push(path),
            ReloadClass::RestartRequired => plan.restart_paths.push(path),
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_changes_need_restart() {
        assert_eq!(classify_path("gateway.port"), ReloadClass::RestartRequired);
        assert_eq!(
            classify_path("mcp.providers.mcp:exa"),
            ReloadClass::RestartRequired
        );
        assert_eq!(classify_path("admin.pipe"), ReloadClass::RestartRequired);
    }

    #[test]
    fn visibility_and_logging_are_hot() {
        assert_eq!(
            classify_path("heartbeatVisibility.showOk"),
            ReloadClass::Hot
        );
        assert_eq!(classify_path("logging.level"), ReloadClass::Hot);
        assert_eq!(classify_path("tools.verbosity"), ReloadClass::Hot);
    }

    #[test]
    fn plan_splits_paths() {
        let plan = classify_paths(vec!["gateway.port", "logging.level"]);
        assert_eq!(plan.restart_paths, vec!["gateway.port"]);
        assert_eq!(plan.hot_paths, vec!["logging.level"]);
        assert!(plan.restart_required());
    }

    #[test]
    fn empty_plan() {
        let plan = classify_paths(Vec::<String>::new());
        assert!(plan.is_empty());
        assert!(!plan.restart_required());
    }
}

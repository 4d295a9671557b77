//! Gateway-owned session store.
//!
//! Persists session state as a JSON map `sessionKey → SessionEntry`. Updates
//! are serialized per path through an advisory file lock and written with
//! temp-file + rename so concurrent updaters observe linearizable state.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Result, session_key::sanitize_session_key};

/// Routing context for delivering replies back to the originating channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeliveryContext {
    pub channel: Option<String>,
    pub to: Option<String>,
    pub account_id: Option<String>,
}

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionEntry {
    /// Stable for the lifetime of the session key.
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_context: Option<DeliveryContext>,
}

impl SessionEntry {
    /// Fresh entry with a newly minted session id.
    pub fn new_now() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            updated_at: clawgate_common::time::now_ms(),
            ..Default::default()
        }
    }
}

pub type SessionMap = BTreeMap<String, SessionEntry>;

/// JSON-file session store, one map per path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the store path from `config.session.store`: absolute paths are
    /// used as-is, relative paths land under the state dir, absence means
    /// `<state_dir>/sessions/sessions.json`.
    pub fn resolve_path(state_dir: &Path, config_store: Option<&str>) -> PathBuf {
        match config_store {
            Some(p) if !p.trim().is_empty() => {
                let p = Path::new(p.trim());
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    state_dir.join(p)
                }
            },
            _ => state_dir.join("sessions").join("sessions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current map; a missing file is an empty map.
    pub fn load(&self) -> Result<SessionMap> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic read-modify-write under an advisory file lock.
    ///
    /// Legacy node keys are migrated before `f` runs, so callers always see
    /// canonical keys.
    pub fn update<T>(
        &self,
        resolve_display_name: impl Fn(&str) -> Option<String>,
        f: impl FnOnce(&mut SessionMap) -> T,
    ) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = self.path.with_extension("lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;

        let mut map = self.load()?;
        let migrated = migrate_legacy_keys(&mut map, &resolve_display_name);
        if migrated > 0 {
            tracing::info!(migrated, path = %self.path.display(), "migrated legacy session keys");
        }

        let out = f(&mut map);

        let body = serde_json::to_string_pretty(&map)?;
        let tmp = self.path.with_extension("tmp");
        let write_result = (|| -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(out)
    }
}

/// Rewrite legacy node keys to their sanitized form, merging entries that
/// collide. The newer `updatedAt` wins field-by-field (whole entry).
/// Returns the number of keys rewritten.
pub fn migrate_legacy_keys(
    map: &mut SessionMap,
    resolve_display_name: impl Fn(&str) -> Option<String>,
) -> usize {
    let renames: Vec<(String, String)> = map
        .keys()
        .filter_map(|key| {
            sanitize_session_key(key, &resolve_display_name).map(|clean| (key.clone(), clean))
        })
        .collect();

    let mut migrated = 0;
    for (old, new) in renames {
        let Some(entry) = map.remove(&old) else {
            continue;
        };
        match map.get(&new) {
            Some(existing) if existing.updated_at >= entry.updated_at => {
                // Existing canonical entry is newer; legacy entry is dropped.
            },
            _ => {
                map.insert(new, entry);
            },
        }
        migrated += 1;
    }
    migrated
}

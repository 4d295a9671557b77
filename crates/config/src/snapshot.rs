//! Hashed, immutable config snapshots with optimistic-concurrency writes.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::SystemTime,
};

use sha2::{Digest, Sha256};

use crate::{env_subst::substitute_env, schema::GatewayConfig, validate};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config serialize error: {0}")]
    Serialize(String),

    #[error("stale base hash: expected {expected}, got {got}")]
    StaleHash { expected: String, got: String },

    #[error("config is invalid: {0:?}")]
    Invalid(Vec<ConfigIssue>),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single validation problem at a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// An immutable view of configuration: canonical raw text, its digest, and
/// the validated typed tree (absent when invalid).
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub exists: bool,
    pub valid: bool,
    pub config: Option<GatewayConfig>,
    pub issues: Vec<ConfigIssue>,
    /// Canonical serialized form (sorted-key pretty JSON).
    pub raw: String,
    /// Lowercase hex SHA-256 over `raw`.
    pub hash: String,
}

impl ConfigSnapshot {
    /// The parsed canonical value; empty object when the raw text is not
    /// parseable (invalid snapshots keep the original file text in `raw`).
    pub fn value(&self) -> serde_json::Value {
        serde_json::from_str(&self.raw).unwrap_or(serde_json::Value::Object(Default::default()))
    }
}

/// Render a JSON value with recursively sorted object keys, pretty-printed.
/// This is the canonical form every hash is computed over.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or_default()
            },
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            },
            other => other.clone(),
        }
    }
    serde_json::to_string_pretty(&sort(value)).unwrap_or_else(|_| "{}".into())
}

/// Lowercase hex SHA-256 digest of the canonical raw text.
pub fn hash_raw(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

struct CacheEntry {
    modified: Option<SystemTime>,
    snapshot: ConfigSnapshot,
}

/// Single-writer config store. Readers obtain snapshots; writers present a
/// `baseHash` and get `StaleHash` when it no longer matches.
pub struct ConfigStore {
    path: PathBuf,
    cache: Mutex<Option<CacheEntry>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Store at the discovered (or default) config path.
    pub fn discover() -> Self {
        Self::new(crate::paths::find_or_default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Read the current snapshot, lazily, cached until the file changes.
    pub fn read_snapshot(&self) -> Result<ConfigSnapshot> {
        let modified = self.mtime();
        {
            let cache = self.cache.lock().map_err(|_| poisoned())?;
            if let Some(entry) = cache.as_ref() {
                if entry.modified == modified {
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        let snapshot = self.build_snapshot()?;
        let mut cache = self.cache.lock().map_err(|_| poisoned())?;
        *cache = Some(CacheEntry {
            modified,
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    fn build_snapshot(&self) -> Result<ConfigSnapshot> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Absent file: valid defaults with an empty canonical raw.
                let raw = canonical_json(&serde_json::Value::Object(Default::default()));
                let hash = hash_raw(&raw);
                return Ok(ConfigSnapshot {
                    exists: false,
                    valid: true,
                    config: Some(GatewayConfig::default()),
                    issues: Vec::new(),
                    raw,
                    hash,
                });
            },
            Err(e) => return Err(e.into()),
        };

        let substituted = substitute_env(&text);
        let value = match parse_value(&substituted, &self.path) {
            Ok(v) => v,
            Err(message) => {
                // Unparseable: hash the file text so writers still get a
                // stable base hash to race against.
                return Ok(ConfigSnapshot {
                    exists: true,
                    valid: false,
                    config: None,
                    issues: vec![ConfigIssue::new("", message)],
                    hash: hash_raw(&text),
                    raw: text,
                });
            },
        };

        let raw = canonical_json(&value);
        let hash = hash_raw(&raw);
        let issues = validate::validate_value(&value);
        if !issues.is_empty() {
            return Ok(ConfigSnapshot {
                exists: true,
                valid: false,
                config: None,
                issues,
                raw,
                hash,
            });
        }

        let config: GatewayConfig = serde_json::from_value(value)
            .map_err(|e| Error::Parse(format!("config deserialize: {e}")))?;
        Ok(ConfigSnapshot {
            exists: true,
            valid: true,
            config: Some(config),
            issues: Vec::new(),
            raw,
            hash,
        })
    }

    /// Write the next config value atomically.
    ///
    /// When the file already exists the caller must present the hash of the
    /// snapshot it based its edit on; a mismatch fails with [`Error::StaleHash`]
    /// and leaves the file untouched.
    pub fn write(
        &self,
        next: &serde_json::Value,
        base_hash: Option<&str>,
    ) -> Result<ConfigSnapshot> {
        let current = self.read_snapshot()?;
        if current.exists {
            match base_hash {
                Some(h) if h == current.hash => {},
                Some(h) => {
                    return Err(Error::StaleHash {
                        expected: current.hash,
                        got: h.to_string(),
                    });
                },
                None => {
                    return Err(Error::StaleHash {
                        expected: current.hash,
                        got: "(none)".to_string(),
                    });
                },
            }
        }

        let issues = validate::validate_value(next);
        if !issues.is_empty() {
            return Err(Error::Invalid(issues));
        }

        let body = serialize_for(&self.path, next)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let write_result = (|| -> std::io::Result<()> {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(body.as_bytes())?;
            f.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::info!(path = %self.path.display(), "config written");
        // Rebuilt on every write.
        {
            let mut cache = self.cache.lock().map_err(|_| poisoned())?;
            *cache = None;
        }
        self.read_snapshot()
    }

    /// Resolve a `{hash?, raw?}` reference to a concrete hash, when possible.
    pub fn resolve_hash(&self, hash: Option<&str>, raw: Option<&str>) -> Option<String> {
        if let Some(h) = hash {
            let t = h.trim();
            if !t.is_empty() {
                return Some(t.to_lowercase());
            }
        }
        let raw = raw?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        Some(hash_raw(&canonical_json(&value)))
    }
}

fn poisoned() -> Error {
    Error::Parse("config cache lock poisoned".into())
}

fn parse_value(raw: &str, path: &Path) -> std::result::Result<serde_json::Value, String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    match ext {
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        other => Err(format!("unsupported config format: .{other}")),
    }
}

fn serialize_for(path: &Path, value: &serde_json::Value) -> Result<String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    match ext {
        "json" => Ok(canonical_json(value)),
        "toml" => toml::to_string_pretty(value).map_err(|e| Error::Serialize(e.to_string())),
        "yaml" | "yml" => serde_yaml::to_string(value).map_err(|e| Error::Serialize(e.to_string())),
        other => Err(Error::Serialize(format!(
            "unsupported config format: .{other}"
        ))),
    }
}

//! Model-catalog cache.
//!
//! A small JSON cache `{version: 1, updatedAtMs, models: […]}` written at
//! mode 0600. A bootstrap failure never poisons the singleton: the next call
//! reloads from disk.

use std::{
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use serde::{Deserialize, Serialize};

pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCatalog {
    pub version: u32,
    pub updated_at_ms: u64,
    pub models: Vec<serde_json::Value>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            updated_at_ms: 0,
            models: Vec::new(),
        }
    }
}

static CACHE: OnceLock<Mutex<Option<ModelCatalog>>> = OnceLock::new();

fn cache() -> &'static Mutex<Option<ModelCatalog>> {
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Load the catalog, reusing the in-process copy when present. A failed load
/// leaves the cache empty so a later call retries.
pub fn load(path: Option<PathBuf>) -> ModelCatalog {
    if let Ok(guard) = cache().lock() {
        if let Some(cat) = guard.as_ref() {
            return cat.clone();
        }
    }

    let path = path.unwrap_or_else(crate::paths::model_catalog_path);
    let loaded = std::fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str::<ModelCatalog>(&raw).ok())
        .filter(|cat| cat.version == CATALOG_VERSION);

    match loaded {
        Some(cat) => {
            if let Ok(mut guard) = cache().lock() {
                *guard = Some(cat.clone());
            }
            cat
        },
        None => ModelCatalog::default(),
    }
}

/// Persist the catalog (best-effort caller contract: errors propagate, the
/// in-process copy is only replaced on success).
pub fn store(path: Option<PathBuf>, catalog: &ModelCatalog) -> std::io::Result<()> {
    let path = path.unwrap_or_else(crate::paths::model_catalog_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    let body = serde_json::to_string_pretty(catalog)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, &path)?;

    if let Ok(mut guard) = cache().lock() {
        *guard = Some(catalog.clone());
    }
    Ok(())
}

/// Drop the in-process copy (tests, reload).
pub fn invalidate() {
    if let Ok(mut guard) = cache().lock() {
        *guard = None;
    }
}

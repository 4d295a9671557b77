//! File-backed secret store.
//!
//! Each secret is one file under a 0700 directory, mode 0600, named after the
//! sanitized ref. Values never appear in config snapshots; only refs do.
//! Writes are crash-atomic: temp file, fsync, rename.

use std::path::{Path, PathBuf};

pub mod refs;

pub use refs::provider_secret_ref;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("secret I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid secret ref: {0}")]
    InvalidRef(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Keyed secret CRUD with durable storage.
#[derive(Debug, Clone)]
pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, r#ref: &str) -> Result<PathBuf> {
        let name = refs::sanitize_ref(r#ref);
        if name.is_empty() {
            return Err(Error::InvalidRef(r#ref.to_string()));
        }
        Ok(self.dir.join(name))
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Read a secret value, or `None` when absent.
    pub fn get(&self, r#ref: &str) -> Result<Option<String>> {
        let path = self.file_for(r#ref)?;
        match std::fs::read_to_string(&path) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True when the ref exists with a non-empty value.
    pub fn has(&self, r#ref: &str) -> bool {
        matches!(self.get(r#ref), Ok(Some(v)) if !v.is_empty())
    }

    /// Write a secret value. Crash-atomic: temp file in the same directory,
    /// fsync, then rename over the destination.
    pub fn set(&self, r#ref: &str, value: &str) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_for(r#ref)?;
        let tmp = self.dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            path.file_name().and_then(|n| n.to_str()).unwrap_or("secret")
        ));

        let write_result = (|| -> std::io::Result<()> {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                f.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }
            f.write_all(value.as_bytes())?;
            f.sync_all()?;
            std::fs::rename(&tmp, &path)
        })();

        if let Err(e) = write_result {
            // Unlink the temp file on any failed exit path.
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(r#ref = %r#ref, "secret written");
        Ok(())
    }

    /// Delete a secret. Missing refs are not an error.
    pub fn delete(&self, r#ref: &str) -> Result<()> {
        let path = self.file_for(r#ref)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(r#ref = %r#ref, "secret deleted");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List stored refs starting with `prefix` (sanitized comparison).
    ///
    /// Used by provider uninstall sweeps to catch refs that are no longer
    /// listed in the provider entry.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let wanted = refs::sanitize_ref(prefix);
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(".tmp-") {
                continue;
            }
            if name.starts_with(&wanted) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store() -> (SecretStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SecretStore::new(dir.path().join("secrets")), dir)
    }

    #[test]
    fn set_get_roundtrip() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "t0ken").unwrap();
        assert_eq!(
            s.get("mcp:provider:mcp:exa:token").unwrap().as_deref(),
            Some("t0ken")
        );
    }

    #[test]
    fn get_missing_is_none() {
        let (s, _d) = store();
        assert!(s.get("mcp:provider:mcp:none:token").unwrap().is_none());
    }

    #[test]
    fn has_requires_non_empty() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:a:token", "").unwrap();
        assert!(!s.has("mcp:provider:mcp:a:token"));
        s.set("mcp:provider:mcp:a:token", "x").unwrap();
        assert!(s.has("mcp:provider:mcp:a:token"));
    }

    #[test]
    fn delete_is_idempotent() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:a:token", "x").unwrap();
        s.delete("mcp:provider:mcp:a:token").unwrap();
        s.delete("mcp:provider:mcp:a:token").unwrap();
        assert!(s.get("mcp:provider:mcp:a:token").unwrap().is_none());
    }

    #[test]
    fn overwrite_replaces_value() {
        let (s, _d) = store();
        s.set("r", "one").unwrap();
        s.set("r", "two").unwrap();
        assert_eq!(s.get("r").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn list_filters_by_prefix() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "a").unwrap();
        s.set("mcp:provider:mcp:exa:apikey", "b").unwrap();
        s.set("mcp:provider:mcp:other:token", "c").unwrap();
        let refs = s.list("mcp:provider:mcp:exa:").unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.starts_with("mcp_provider_mcp_exa_")));
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let (s, _d) = store();
        s.set("r", "v").unwrap();
        let path = s.file_for("r").unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn dir_mode_is_0700() {
        use std::os::unix::fs::PermissionsExt;
        let (s, _d) = store();
        s.set("r", "v").unwrap();
        let mode = std::fs::metadata(s.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

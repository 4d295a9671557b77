//! Auth-profile store: completed flows persist their tokens here and the
//! config references the profile id.

use std::{collections::BTreeMap, path::PathBuf};

use {
    secrecy::ExposeSecret,
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{Result, types::OAuthTokens};

/// A persisted credential for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProfile {
    pub provider: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub updated_at: u64,
}

/// File-backed profile store at `<state_dir>/auth-profiles.json`, mode 0600.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, AuthProfile>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, map: &BTreeMap<String, AuthProfile>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Write the tokens from a completed flow. Returns the profile id the
    /// config should reference.
    pub fn store_tokens(&self, provider: &str, tokens: &OAuthTokens) -> Result<String> {
        let profile_id = format!("{provider}:default");
        let mut map = self.load()?;
        map.insert(profile_id.clone(), AuthProfile {
            provider: provider.to_string(),
            access_token: tokens.access_token.expose_secret().clone(),
            refresh_token: tokens
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
            expires_at: tokens.expires_at,
            updated_at: clawgate_common::time::now_ms(),
        });
        self.save(&map)?;
        info!(provider, profile = %profile_id, "auth profile stored");
        Ok(profile_id)
    }

    pub fn get(&self, profile_id: &str) -> Result<Option<AuthProfile>> {
        Ok(self.load()?.get(profile_id).cloned())
    }

    pub fn delete(&self, profile_id: &str) -> Result<bool> {
        let mut map = self.load()?;
        let removed = map.remove(profile_id).is_some();
        if removed {
            self.save(&map)?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }
}

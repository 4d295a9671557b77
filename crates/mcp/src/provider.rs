//! Materialized provider rows for snapshots, and secret satisfaction.

use std::collections::BTreeMap;

use {
    clawgate_config::{GatewayConfig, McpProviderEntry},
    clawgate_secrets::SecretStore,
    serde::Serialize,
};

use crate::auth::TOKEN_ALIASES;

/// One row of `mcp.providers.snapshot`: config state plus masked secret
/// presence. Secret values never leave the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRow {
    pub provider_id: String,
    pub enabled: bool,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<clawgate_config::ProviderSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    pub tool_count: usize,
    /// Field → whether a non-empty secret is stored.
    pub secrets: BTreeMap<String, bool>,
    pub required_secrets: Vec<String>,
    pub secrets_satisfied: bool,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub updated_at: u64,
    pub installed_at: u64,
}

/// Presence map for a provider's secret refs.
fn secret_presence(entry: &McpProviderEntry, store: &SecretStore) -> BTreeMap<String, bool> {
    entry
        .secret_refs
        .iter()
        .map(|(field, r#ref)| (field.clone(), store.has(r#ref)))
        .collect()
}

/// Required secrets are satisfied iff each required key has a non-empty
/// stored value, where `token`/`apiKey`/`authToken` are interchangeable.
pub fn secrets_satisfied(entry: &McpProviderEntry, store: &SecretStore) -> bool {
    let presence = secret_presence(entry, store);
    let any_alias_set = TOKEN_ALIASES.iter().any(|alias| {
        presence
            .iter()
            .any(|(field, set)| *set && field.eq_ignore_ascii_case(alias))
    });

    entry.required_secrets.iter().all(|required| {
        let direct = presence
            .iter()
            .any(|(field, set)| *set && field.eq_ignore_ascii_case(required));
        if direct {
            return true;
        }
        TOKEN_ALIASES
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(required))
            && any_alias_set
    })
}

/// Whether the entry is configured at all: a connection with a deployment URL.
pub fn is_configured(entry: &McpProviderEntry) -> bool {
    entry
        .connection
        .as_ref()
        .is_some_and(|c| !c.deployment_url.trim().is_empty())
}

/// Materialize all provider rows from the config tree.
pub fn provider_rows(config: &GatewayConfig, store: &SecretStore) -> Vec<ProviderRow> {
    config
        .mcp
        .providers
        .iter()
        .map(|(id, entry)| ProviderRow {
            provider_id: id.clone(),
            enabled: entry.enabled,
            configured: is_configured(entry),
            label: entry.label.clone(),
            source: entry.source,
            qualified_name: entry.qualified_name.clone(),
            deployment_url: entry.connection.as_ref().map(|c| c.deployment_url.clone()),
            tool_count: entry.tools.len(),
            secrets: secret_presence(entry, store),
            required_secrets: entry.required_secrets.clone(),
            secrets_satisfied: secrets_satisfied(entry, store),
            fields: entry.fields.clone(),
            updated_at: entry.updated_at,
            installed_at: entry.installed_at,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clawgate_config::{AuthType, ProviderConnection};

    use super::*;

    fn store() -> (SecretStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SecretStore::new(dir.path().join("secrets")), dir)
    }

    fn entry_with(required: &[&str], refs: &[(&str, &str)]) -> McpProviderEntry {
        McpProviderEntry {
            enabled: true,
            required_secrets: required.iter().map(|s| s.to_string()).collect(),
            secret_refs: refs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            connection: Some(ProviderConnection {
                kind: "http".into(),
                deployment_url: "https://exa.run.tools".into(),
                auth_type: AuthType::Bearer,
                config_schema: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn satisfied_with_direct_secret() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "t").unwrap();
        let e = entry_with(&["token"], &[("token", "mcp:provider:mcp:exa:token")]);
        assert!(secrets_satisfied(&e, &s));
    }

    #[test]
    fn alias_substitutes_for_required_token() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:apikey", "k").unwrap();
        let e = entry_with(&["token"], &[("apiKey", "mcp:provider:mcp:exa:apikey")]);
        assert!(secrets_satisfied(&e, &s));
    }

    #[test]
    fn non_alias_required_secret_is_strict() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "t").unwrap();
        let e = entry_with(
            &["webhookSecret"],
            &[("token", "mcp:provider:mcp:exa:token")],
        );
        assert!(!secrets_satisfied(&e, &s));
    }

    #[test]
    fn empty_value_not_satisfied() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "").unwrap();
        let e = entry_with(&["token"], &[("token", "mcp:provider:mcp:exa:token")]);
        assert!(!secrets_satisfied(&e, &s));
    }

    #[test]
    fn rows_mask_secret_values() {
        let (s, _d) = store();
        s.set("mcp:provider:mcp:exa:token", "super-secret").unwrap();
        let mut config = GatewayConfig::default();
        config.mcp.providers.insert(
            "mcp:exa".into(),
            entry_with(&["token"], &[("token", "mcp:provider:mcp:exa:token")]),
        );

        let rows = provider_rows(&config, &s);
        assert_eq!(rows.len(), 1);
        let json = serde_json::to_string(&rows[0]).unwrap();
        assert!(!json.contains("super-secret"));
        assert_eq!(rows[0].secrets["token"], true);
        assert!(rows[0].configured);
    }

    #[test]
    fn unconfigured_without_connection() {
        let mut e = entry_with(&[], &[]);
        e.connection = None;
        assert!(!is_configured(&e));
    }
}

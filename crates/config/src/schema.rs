//! Config schema types (gateway, admin, session, tools, MCP, auth, reload).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    pub gateway: GatewaySection,
    pub admin: AdminSection,
    pub session: SessionSection,
    pub heartbeat_visibility: HeartbeatVisibility,
    pub tools: ToolsSection,
    pub mcp: McpSection,
    pub auth: AuthSection,
    pub logging: LoggingSection,
    pub reload: ReloadSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySection {
    pub port: u16,
    pub bind: String,
    /// Bearer token required in the `hello` frame. Loopback connections with
    /// no configured token are accepted.
    pub auth_token: Option<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            port: 18789,
            bind: "127.0.0.1".into(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminSection {
    /// Unix-socket path override; `OPENCLAW_ADMIN_PIPE` wins over this.
    pub pipe: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSection {
    /// Session store path override; relative paths resolve under the state dir.
    pub store: Option<String>,
    pub defaults: SessionDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionDefaults {
    pub thinking_level: Option<String>,
    pub verbose_level: Option<String>,
    pub reasoning_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatVisibility {
    /// When false, successful heartbeat runs are suppressed from the chat
    /// broadcast (per-session unicast is still delivered).
    pub show_ok: bool,
}

impl Default for HeartbeatVisibility {
    fn default() -> Self {
        Self { show_ok: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsSection {
    /// Default tool-event verbosity: "on" or "off". Run and session scopes
    /// override this.
    pub verbosity: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            verbosity: "on".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpSection {
    /// Installed providers keyed by normalized provider id (`mcp:<slug>`).
    pub providers: BTreeMap<String, McpProviderEntry>,
    /// Provider templates offered by `mcp.presets.list`.
    pub presets: Vec<McpPreset>,
    /// Market registry base URL override.
    pub registry_base_url: Option<String>,
    /// Allow MCP/registry calls to loopback and private ranges. Off by
    /// default; tests and local development turn it on.
    pub allow_private_networks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSection {
    /// OAuth provider → auth profile id written by completed flows.
    pub profiles: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReloadSection {
    pub mode: crate::reload::ReloadMode,
}

// ── MCP provider entries ─────────────────────────────────────────────────────

/// Where a provider entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSource {
    Manual,
    Catalog,
}

/// Bearer-or-nothing authentication for the HTTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    #[default]
    Bearer,
}

/// HTTP connection details for an MCP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConnection {
    /// Always "http" today; kept as a field for wire parity.
    #[serde(rename = "type", default = "default_connection_type")]
    pub kind: String,
    pub deployment_url: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
}

fn default_connection_type() -> String {
    "http".into()
}

/// A tool schema cached from the provider's last discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// The command invoked upstream; usually equals `name`.
    pub command: String,
}

/// An installed MCP provider, keyed in the config by `mcp:<slug>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpProviderEntry {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ProviderSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ProviderConnection>,
    /// Non-secret scalar fields from the provider's config schema.
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Field name → opaque secret ref. Values live in the secret store only.
    pub secret_refs: BTreeMap<String, String>,
    pub required_secrets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_hints: Option<serde_json::Value>,
    /// Cached tool schemas from the last discovery.
    pub tools: Vec<CachedTool>,
    pub updated_at: u64,
    pub installed_at: u64,
}

/// A provider template from the presets catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpPreset {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub required_secrets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ProviderConnection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
}

/// Normalize a provider id: lowercase with the `mcp:` prefix applied.
pub fn normalize_provider_id(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    if lower.starts_with("mcp:") {
        lower
    } else {
        format!("mcp:{lower}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_port() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.gateway.port, 18789);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert!(cfg.heartbeat_visibility.show_ok);
    }

    #[test]
    fn normalize_provider_id_applies_prefix() {
        assert_eq!(normalize_provider_id("Exa"), "mcp:exa");
        assert_eq!(normalize_provider_id("mcp:Exa"), "mcp:exa");
        assert_eq!(normalize_provider_id("  mcp:exa  "), "mcp:exa");
    }

    #[test]
    fn provider_entry_roundtrip_camel_case() {
        let mut entry = McpProviderEntry {
            enabled: true,
            label: Some("Exa".into()),
            source: Some(ProviderSource::Catalog),
            connection: Some(ProviderConnection {
                kind: "http".into(),
                deployment_url: "https://exa.run.tools".into(),
                auth_type: AuthType::Bearer,
                config_schema: None,
            }),
            ..Default::default()
        };
        entry
            .secret_refs
            .insert("token".into(), "mcp:provider:mcp:exa:token".into());

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["connection"]["deploymentUrl"], "https://exa.run.tools");
        assert_eq!(json["connection"]["type"], "http");
        assert_eq!(json["secretRefs"]["token"], "mcp:provider:mcp:exa:token");

        let back: McpProviderEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.label.as_deref(), Some("Exa"));
    }

    #[test]
    fn preset_strips_unknown_fields_on_reserialize() {
        let raw = serde_json::json!({
            "id": "exa",
            "label": "Exa Search",
            "requiredSecrets": ["token"],
            "internalScore": 99
        });
        let preset: McpPreset = serde_json::from_value(raw).unwrap();
        let clean = serde_json::to_value(&preset).unwrap();
        assert!(clean.get("internalScore").is_none());
        assert_eq!(clean["label"], "Exa Search");
    }

    #[test]
    fn auth_type_parses_lowercase() {
        let t: AuthType = serde_json::from_value(serde_json::json!("none")).unwrap();
        assert_eq!(t, AuthType::None);
    }
}

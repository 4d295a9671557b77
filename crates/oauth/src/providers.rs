//! Built-in OAuth provider endpoint definitions.

/// Endpoints and identity for one provider. `base_override` lets tests point
/// a provider at a mock server.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// Canonical provider id stored in config and profiles.
    pub id: &'static str,
    /// Method alias on the wire (`oauth.<alias>.start`).
    pub alias: &'static str,
    pub client_id: &'static str,
    pub device_auth_path: &'static str,
    pub token_path: &'static str,
    pub default_base: &'static str,
    /// Device flows may still carry a PKCE verifier (qwen portal does).
    pub uses_pkce: bool,
}

pub const QWEN_PORTAL: ProviderEndpoints = ProviderEndpoints {
    id: "qwen-portal",
    alias: "qwen",
    client_id: "f0304373b74a44d2b584a3fb70ca9e56",
    device_auth_path: "/api/v1/oauth2/device/code",
    token_path: "/api/v1/oauth2/token",
    default_base: "https://chat.qwen.ai",
    uses_pkce: true,
};

pub const ANTHROPIC: ProviderEndpoints = ProviderEndpoints {
    id: "anthropic",
    alias: "anthropic",
    client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
    device_auth_path: "/oauth/authorize",
    token_path: "/v1/oauth/token",
    default_base: "https://claude.ai",
    uses_pkce: true,
};

/// Look a provider up by its wire alias or canonical id.
pub fn provider_by_alias(alias: &str) -> Option<&'static ProviderEndpoints> {
    [&QWEN_PORTAL, &ANTHROPIC]
        .into_iter()
        .find(|p| p.alias == alias || p.id == alias)
}

//! Token shapes shared by flows and the profile store.

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Tokens obtained from a completed flow. The access token never appears in
/// Debug output or logs.
#[derive(Clone)]
pub struct OAuthTokens {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    /// Seconds since the Unix epoch, when known.
    pub expires_at: Option<u64>,
}

/// Response from a device-code request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Some providers return a complete URI with the code embedded.
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    900
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenPollResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub error: Option<String>,
}

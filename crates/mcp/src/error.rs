use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("remote JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request to {url} blocked: {reason}")]
    Ssrf { url: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No tools exposed by MCP provider")]
    PreflightEmpty,

    #[error("config error: {0}")]
    Config(#[from] clawgate_config::Error),

    #[error("secret store error: {0}")]
    Secrets(#[from] clawgate_secrets::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wire code for the closed protocol error set.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TIMEOUT",
            Self::Config(clawgate_config::Error::StaleHash { .. }) => "STALE_HASH",
            Self::Http(_)
            | Self::Rpc { .. }
            | Self::Ssrf { .. }
            | Self::Protocol(_)
            | Self::PreflightEmpty => "UNAVAILABLE",
            _ => "INTERNAL",
        }
    }
}

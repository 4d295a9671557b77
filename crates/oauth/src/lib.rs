//! OAuth device-code and PKCE flows with state-bounded in-memory sessions
//! and an auth-profile store for obtained tokens.

pub mod flow;
pub mod pkce;
pub mod profiles;
pub mod providers;
pub mod types;

pub use {
    flow::{FlowOutcome, FlowRegistry, StartedFlow, StartedPkce},
    pkce::PkcePair,
    profiles::{AuthProfile, ProfileStore},
    providers::{ProviderEndpoints, provider_by_alias},
    types::OAuthTokens,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("profile store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("profile store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

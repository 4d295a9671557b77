//! MCP hub: provider registry over the config tree, the Streamable-HTTP
//! JSON-RPC client, preflight, market registry proxy, and the single-pass
//! provider apply pipeline.

pub mod apply;
pub mod auth;
pub mod error;
pub mod http;
pub mod market;
pub mod preflight;
pub mod provider;
pub mod sse;
pub mod ssrf;
pub mod types;

pub use {
    apply::{ApplyOutcome, FieldError, ProviderInput, apply_providers},
    auth::resolve_bearer_token,
    error::{Error, Result},
    http::McpHttpClient,
    market::MarketClient,
    preflight::{PreflightReport, preflight},
    provider::{ProviderRow, provider_rows, secrets_satisfied},
    ssrf::SsrfGuard,
    types::{DiscoveredTool, JsonRpcRequest, JsonRpcResponse},
};

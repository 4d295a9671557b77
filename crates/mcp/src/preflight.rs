//! Provider preflight: discovery plus an optional safe-verb smoke test.

use {serde::Serialize, tracing::debug};

use crate::{
    error::{Error, Result},
    http::McpHttpClient,
};

/// Tool names that are safe to invoke with no arguments as a liveness check.
const SAFE_VERBS: &[&str] = &[
    "list", "get", "search", "read", "fetch", "status", "health", "info",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    pub ok: bool,
    pub tool_count: usize,
    pub listed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke_tool: Option<String>,
    pub deployment_url: String,
}

fn is_safe_verb(name: &str) -> bool {
    let last = name
        .rsplit(|c: char| c == '.' || c == '_' || c == '-' || c == '/')
        .next()
        .unwrap_or(name)
        .to_lowercase();
    SAFE_VERBS.contains(&last.as_str())
}

/// Validate that a provider is reachable and exposes at least one tool.
///
/// When some tool has no required arguments and a safe-verb name, invoke it
/// once as a smoke test; a smoke failure fails the preflight.
pub async fn preflight(client: &McpHttpClient) -> Result<PreflightReport> {
    let tools = client.list_tools().await?;
    if tools.is_empty() {
        return Err(Error::PreflightEmpty);
    }

    let listed: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();

    let smoke = tools
        .iter()
        .find(|t| !t.has_required_args() && is_safe_verb(&t.name));

    let mut smoke_tool = None;
    if let Some(tool) = smoke {
        debug!(tool = %tool.name, "running preflight smoke call");
        client
            .call_tool(&tool.name, serde_json::json!({}))
            .await?;
        smoke_tool = Some(tool.name.clone());
    }

    Ok(PreflightReport {
        ok: true,
        tool_count: listed.len(),
        listed_tools: listed,
        smoke_tool,
        deployment_url: client.deployment_url().to_string(),
    })
}

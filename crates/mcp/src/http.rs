//! Streamable-HTTP JSON-RPC client for a single MCP provider.
//!
//! Protocol sequence: `initialize` (recording the optional `Mcp-Session-Id`
//! response header), a `notifications/initialized` notification, then
//! `tools/list` / `tools/call`. The client probes the base deployment URL and
//! `{base}/mcp`, in that order, and sticks with the first endpoint that
//! answers the handshake.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {tokio::sync::Mutex, tracing::debug};

use crate::{
    error::{Error, Result},
    sse,
    ssrf::SsrfGuard,
    types::{
        ClientCapabilities, ClientInfo, DiscoveredTool, InitializeParams, JsonRpcNotification,
        JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ToolsCallParams, ToolsListResult,
    },
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// HTTP client bound to one provider deployment.
pub struct McpHttpClient {
    http: reqwest::Client,
    guard: SsrfGuard,
    deployment_url: String,
    bearer: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
    /// Endpoint that answered the handshake, set by `ensure_initialized`.
    endpoint: Mutex<Option<String>>,
    /// `Mcp-Session-Id` returned by `initialize`, echoed on later calls.
    session_id: Mutex<Option<String>>,
}

impl McpHttpClient {
    pub fn new(
        deployment_url: impl Into<String>,
        bearer: Option<String>,
        timeout_ms: Option<u64>,
        guard: SsrfGuard,
    ) -> Result<Self> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
            .max(MIN_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            guard,
            deployment_url: deployment_url.into(),
            bearer,
            timeout,
            next_id: AtomicU64::new(1),
            endpoint: Mutex::new(None),
            session_id: Mutex::new(None),
        })
    }

    pub fn deployment_url(&self) -> &str {
        &self.deployment_url
    }

    /// Candidate endpoints, in probe order.
    fn candidates(&self) -> Vec<String> {
        let base = self.deployment_url.trim_end_matches('/').to_string();
        if base.ends_with("/mcp") {
            vec![base]
        } else {
            vec![base.clone(), format!("{base}/mcp")]
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<(reqwest::StatusCode, Option<String>, String, Option<String>)> {
        self.guard.check_url(endpoint).await?;

        let mut req = self
            .http
            .post(endpoint)
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = &self.bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(sid) = self.session_id.lock().await.as_ref() {
            req = req.header(SESSION_HEADER, sid.clone());
        }

        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Error::Http)?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let new_session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = tokio::time::timeout(self.timeout, resp.text())
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Error::Http)?;
        Ok((status, content_type, text, new_session))
    }

    fn parse_rpc(content_type: Option<&str>, body: &str) -> Result<JsonRpcResponse> {
        let value = if content_type.is_some_and(|ct| ct.contains("text/event-stream")) {
            sse::last_json_payload(body)
                .ok_or_else(|| Error::Protocol("no JSON payload in event stream".into()))?
        } else {
            serde_json::from_str(body)
                .map_err(|e| Error::Protocol(format!("invalid JSON-RPC response: {e}")))?
        };
        let resp: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed JSON-RPC response: {e}")))?;
        if let Some(err) = &resp.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message.clone(),
            });
        }
        Ok(resp)
    }

    /// Probe candidates with `initialize` and complete the handshake.
    /// Idempotent: a second call reuses the resolved endpoint.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.endpoint.lock().await.is_some() {
            return Ok(());
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "clawgate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let init = serde_json::to_value(JsonRpcRequest::new(
            id,
            "initialize",
            Some(serde_json::to_value(&params)?),
        ))?;

        let mut last_err: Option<Error> = None;
        for candidate in self.candidates() {
            debug!(endpoint = %candidate, "probing MCP endpoint");
            match self.post(&candidate, &init).await {
                Ok((status, content_type, body, new_session)) if status.is_success() => {
                    match Self::parse_rpc(content_type.as_deref(), &body) {
                        Ok(_) => {
                            if let Some(sid) = new_session {
                                *self.session_id.lock().await = Some(sid);
                            }
                            *self.endpoint.lock().await = Some(candidate.clone());

                            // Complete the handshake.
                            let notif = serde_json::to_value(JsonRpcNotification {
                                jsonrpc: "2.0".into(),
                                method: "notifications/initialized".into(),
                                params: None,
                            })?;
                            let _ = self.post(&candidate, &notif).await?;
                            return Ok(());
                        },
                        Err(e) => last_err = Some(e),
                    }
                },
                Ok((status, _, body, _)) => {
                    last_err = Some(Error::Protocol(format!(
                        "initialize returned HTTP {status}: {}",
                        body.chars().take(200).collect::<String>()
                    )));
                },
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Protocol("no endpoint candidates".into())))
    }

    /// Issue a JSON-RPC request against the resolved endpoint.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.ensure_initialized().await?;
        let endpoint = self
            .endpoint
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Protocol("endpoint not resolved".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        let (status, content_type, text, _) = self.post(&endpoint, &body).await?;
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "'{method}' returned HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        let resp = Self::parse_rpc(content_type.as_deref(), &text)?;
        resp.result
            .ok_or_else(|| Error::Protocol(format!("'{method}' returned no result")))
    }

    /// Discover the provider's tools.
    pub async fn list_tools(&self) -> Result<Vec<DiscoveredTool>> {
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("malformed tools/list result: {e}")))?;
        debug!(count = parsed.tools.len(), url = %self.deployment_url, "discovered MCP tools");
        Ok(parsed.tools)
    }

    /// Invoke a tool; the upstream result is returned as-is.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        self.request("tools/call", Some(serde_json::to_value(&params)?))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{Router, response::IntoResponse, routing::post};

    use super::*;

    /// Start a mock MCP server and return its base URL.
    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn rpc_result(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    fn mcp_router(tools: serde_json::Value, seen_auth: Arc<Mutex<Option<String>>>) -> Router {
        Router::new().route(
            "/mcp",
            post(move |headers: axum::http::HeaderMap, body: String| {
                let seen_auth = Arc::clone(&seen_auth);
                let tools = tools.clone();
                async move {
                    *seen_auth.lock().await = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let req: serde_json::Value = serde_json::from_str(&body).unwrap();
                    let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
                    match req["method"].as_str().unwrap_or_default() {
                        "initialize" => axum::Json(rpc_result(
                            &id,
                            serde_json::json!({
                                "protocolVersion": "2024-11-05",
                                "capabilities": {},
                                "serverInfo": {"name": "mock"}
                            }),
                        ))
                        .into_response(),
                        "notifications/initialized" => {
                            axum::http::StatusCode::ACCEPTED.into_response()
                        },
                        "tools/list" => {
                            axum::Json(rpc_result(&id, serde_json::json!({"tools": tools})))
                                .into_response()
                        },
                        "tools/call" => axum::Json(rpc_result(
                            &id,
                            serde_json::json!({"content": [{"type": "text", "text": "ok"}]}),
                        ))
                        .into_response(),
                        other => axum::Json(serde_json::json!({
                            "jsonrpc": "2.0", "id": id,
                            "error": {"code": -32601, "message": format!("unknown {other}")}
                        }))
                        .into_response(),
                    }
                }
            }),
        )
    }

    fn client(base: &str, bearer: Option<&str>) -> McpHttpClient {
        McpHttpClient::new(
            base,
            bearer.map(str::to_string),
            Some(5_000),
            SsrfGuard::new(true),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn probes_base_then_mcp_suffix() {
        let seen = Arc::new(Mutex::new(None));
        let base = start_mock(mcp_router(serde_json::json!([{"name": "search"}]), seen)).await;
        // Base URL has no /mcp route; the client must fall through to {base}/mcp.
        let c = client(&base, None);
        let tools = c.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
    }

    #[tokio::test]
    async fn bearer_header_sent() {
        let seen = Arc::new(Mutex::new(None));
        let base = start_mock(mcp_router(serde_json::json!([]), Arc::clone(&seen))).await;
        let c = client(&format!("{base}/mcp"), Some("k"));
        let _ = c.list_tools().await;
        assert_eq!(seen.lock().await.as_deref(), Some("Bearer k"));
    }

    #[tokio::test]
    async fn no_auth_header_without_token() {
        let seen = Arc::new(Mutex::new(None));
        let base = start_mock(mcp_router(serde_json::json!([]), Arc::clone(&seen))).await;
        let c = client(&format!("{base}/mcp"), None);
        let _ = c.list_tools().await;
        assert!(seen.lock().await.is_none());
    }

    #[tokio::test]
    async fn sse_response_parsed() {
        let app = Router::new().route(
            "/mcp",
            post(|body: String| async move {
                let req: serde_json::Value = serde_json::from_str(&body).unwrap();
                let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
                let result = match req["method"].as_str().unwrap_or_default() {
                    "initialize" => serde_json::json!({"protocolVersion": "2024-11-05"}),
                    _ => serde_json::json!({"tools": []}),
                };
                let payload = rpc_result(&id, result);
                (
                    [("content-type", "text/event-stream")],
                    format!("data: {payload}\n\n"),
                )
            }),
        );
        let base = start_mock(app).await;
        let c = client(&format!("{base}/mcp"), None);
        let tools = c.list_tools().await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn session_id_recorded_and_echoed() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let app = Router::new().route(
            "/mcp",
            post(move |headers: axum::http::HeaderMap, body: String| {
                let hits = Arc::clone(&hits2);
                async move {
                    let req: serde_json::Value = serde_json::from_str(&body).unwrap();
                    let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n > 0 && req["method"] == "tools/list" {
                        assert_eq!(
                            headers.get("mcp-session-id").and_then(|v| v.to_str().ok()),
                            Some("sess-42")
                        );
                    }
                    let result = match req["method"].as_str().unwrap_or_default() {
                        "initialize" => serde_json::json!({"protocolVersion": "2024-11-05"}),
                        _ => serde_json::json!({"tools": []}),
                    };
                    ([("mcp-session-id", "sess-42")], axum::Json(rpc_result(&id, result)))
                }
            }),
        );
        let base = start_mock(app).await;
        let c = client(&format!("{base}/mcp"), None);
        let _ = c.list_tools().await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_surfaces() {
        let app = Router::new().route(
            "/mcp",
            post(|body: String| async move {
                let req: serde_json::Value = serde_json::from_str(&body).unwrap();
                let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
                if req["method"] == "initialize" {
                    axum::Json(rpc_result(&id, serde_json::json!({"protocolVersion": "x"})))
                        .into_response()
                } else {
                    axum::Json(serde_json::json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": {"code": -32000, "message": "boom"}
                    }))
                    .into_response()
                }
            }),
        );
        let base = start_mock(app).await;
        let c = client(&format!("{base}/mcp"), None);
        let err = c.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32000, .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let c = client("http://127.0.0.1:1", None);
        assert!(c.ensure_initialized().await.is_err());
    }
}

//! End-to-end gateway tests over a real WebSocket connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    futures::{SinkExt, StreamExt},
    tokio_tungstenite::tungstenite::Message,
};

use clawgate_gateway::{MethodRegistry, builtins, restart::RestartPlane, server, state::GatewayState};

struct TestGateway {
    url: String,
    _dir: tempfile::TempDir,
}

async fn start_gateway() -> TestGateway {
    // Provider applies schedule a cooperative SIGUSR1 self-restart; install
    // the daemon's handler so the test process treats it as a notification
    // instead of dying. tokio keeps the underlying handler installed
    // process-wide once registered.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let _ = signal(SignalKind::user_defined1());
    }

    let dir = tempfile::tempdir().unwrap();
    let config = clawgate_config::ConfigStore::new(dir.path().join("clawgate.json"));
    // Local mock servers live on loopback; open the guard for tests.
    config
        .write(
            &serde_json::json!({"mcp": {"allowPrivateNetworks": true}}),
            None,
        )
        .unwrap();
    let secrets = clawgate_secrets::SecretStore::new(dir.path().join("secrets"));
    let sessions = clawgate_sessions::SessionStore::new(dir.path().join("sessions.json"));
    let profiles = clawgate_oauth::ProfileStore::new(dir.path().join("auth-profiles.json"));
    let restart = Arc::new(RestartPlane::new(dir.path()));
    let bus = clawgate_bus::AgentEventBus::default();
    let builtin_registry = builtins::build(Arc::clone(&restart));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = GatewayState::new(
        addr.port(),
        None,
        config,
        secrets,
        sessions,
        profiles,
        bus,
        builtin_registry,
        restart,
    );
    let methods = Arc::new(MethodRegistry::new());

    tokio::spawn(async move {
        let _ = server::serve(state, methods, listener, std::future::pending()).await;
    });

    TestGateway {
        url: format!("ws://{addr}/ws"),
        _dir: dir,
    }
}

struct Client {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    next_id: u64,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let mut client = Self { ws, next_id: 0 };

        let hello = client
            .request(
                "hello",
                serde_json::json!({
                    "client": {
                        "id": "test-ui",
                        "version": "0.0.1",
                        "platform": "test",
                    },
                }),
            )
            .await;
        assert_eq!(hello["ok"], true, "handshake failed: {hello}");
        client
    }

    /// Send a request and wait for its response frame, skipping events.
    async fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let frame = serde_json::json!({
            "kind": "req",
            "id": id,
            "method": method,
            "params": params,
        });
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();

        loop {
            let msg = tokio::time::timeout(std::time::Duration::from_secs(10), self.ws.next())
                .await
                .expect("response timeout")
                .expect("connection closed")
                .unwrap();
            let Message::Text(text) = msg else { continue };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["kind"] == "res" && value["id"] == id {
                return value;
            }
        }
    }
}

#[tokio::test]
async fn hello_then_status() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let resp = client.request("status", serde_json::json!({})).await;
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["result"]["pid"], std::process::id());
    assert!(resp["result"]["configHash"].is_string());
}

#[tokio::test]
async fn unknown_method_is_invalid_request() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let resp = client.request("no.such.method", serde_json::json!({})).await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn tools_list_contains_builtins() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let resp = client.request("tools.list", serde_json::json!({})).await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    assert!(
        tools
            .iter()
            .any(|t| t["name"] == "builtin:gateway.restart")
    );

    // includeBuiltin=false filters them out.
    let resp = client
        .request("tools.list", serde_json::json!({"includeBuiltin": false}))
        .await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    assert!(tools.is_empty());
}

#[tokio::test]
async fn tools_call_unknown_tool() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let resp = client
        .request(
            "tools.call",
            serde_json::json!({"providerId": "mcp:ghost", "toolName": "search"}),
        )
        .await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "TOOL_NOT_FOUND");
}

#[tokio::test]
async fn builtin_ping_round_trip() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let resp = client
        .request(
            "tools.call",
            serde_json::json!({"providerId": "builtin:gateway", "toolName": "ping"}),
        )
        .await;
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["result"]["providerId"], "builtin:gateway");
    assert_eq!(resp["result"]["command"], "ping");
    assert_eq!(resp["result"]["result"]["pong"], true);
}

/// Mock MCP upstream: answers initialize/tools.list/tools.call.
async fn start_mock_mcp() -> String {
    use axum::{Router, routing::post};

    let app = Router::new().route(
        "/mcp",
        post(|body: String| async move {
            let req: serde_json::Value = serde_json::from_str(&body).unwrap();
            let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
            let result = match req["method"].as_str().unwrap_or_default() {
                "initialize" => serde_json::json!({"protocolVersion": "2024-11-05"}),
                "tools/list" => serde_json::json!({
                    "tools": [{"name": "search", "description": "Web search",
                               "inputSchema": {"type": "object", "required": ["q"]}}]
                }),
                "tools/call" => serde_json::json!({
                    "content": [{"type": "text", "text": "results for hello"}]
                }),
                _ => serde_json::json!({}),
            };
            axum::Json(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/mcp")
}

#[tokio::test]
async fn provider_apply_install_and_call_round_trip() {
    let gateway = start_gateway().await;
    let mcp_url = start_mock_mcp().await;
    let mut client = Client::connect(&gateway.url).await;

    let snapshot = client
        .request("mcp.providers.snapshot", serde_json::json!({}))
        .await;
    let base_hash = snapshot["result"]["hash"].as_str().unwrap().to_string();

    // Install with discovery against the mock upstream.
    let apply = client
        .request(
            "mcp.providers.apply",
            serde_json::json!({
                "baseHash": base_hash,
                "providers": [{
                    "providerId": "mcp:exa",
                    "enabled": true,
                    "label": "Exa",
                    "connection": {"type": "http", "deploymentUrl": mcp_url},
                    "secretValues": {"token": "t"},
                    "discoverTools": true,
                }],
            }),
        )
        .await;
    assert_eq!(apply["ok"], true, "apply failed: {apply}");
    assert_eq!(apply["result"]["restartRequired"], true);
    let rows = apply["result"]["providers"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["providerId"], "mcp:exa");
    assert_eq!(rows[0]["enabled"], true);
    assert_eq!(rows[0]["configured"], true);
    assert_eq!(rows[0]["toolCount"], 1);

    // A second apply against the stale base hash must fail atomically.
    let stale = client
        .request(
            "mcp.providers.apply",
            serde_json::json!({
                "baseHash": base_hash,
                "providers": [{
                    "providerId": "mcp:exa",
                    "secretValues": {"token": "hijacked"},
                    "connection": {"deploymentUrl": mcp_url},
                }],
            }),
        )
        .await;
    assert_eq!(stale["ok"], false);
    assert_eq!(stale["error"]["code"], "STALE_HASH");

    // The installed provider's tool is callable end to end.
    let call = client
        .request(
            "tools.call",
            serde_json::json!({
                "providerId": "mcp:exa",
                "toolName": "search",
                "toolArgs": {"q": "hello"},
            }),
        )
        .await;
    assert_eq!(call["ok"], true, "call failed: {call}");
    assert_eq!(call["result"]["providerId"], "mcp:exa");
    assert_eq!(call["result"]["command"], "search");
    assert_eq!(
        call["result"]["result"]["content"][0]["text"],
        "results for hello"
    );
}

#[tokio::test]
async fn market_search_detail_install_happy_path() {
    let gateway = start_gateway().await;
    let mcp_url = start_mock_mcp().await;
    let mut client = Client::connect(&gateway.url).await;

    // Mock registry serving one server whose connection points at the mock
    // MCP upstream.
    let registry_url = {
        use axum::{Router, extract::Path, routing::get};
        let detail_url = mcp_url.clone();
        let app = Router::new()
            .route(
                "/servers",
                get(|| async {
                    axum::Json(serde_json::json!({
                        "servers": [{
                            "qualifiedName": "exa",
                            "displayName": "Exa Search",
                            "description": "web search",
                        }],
                        "pagination": {"currentPage": 1, "pageSize": 20,
                                       "totalPages": 1, "totalCount": 1},
                    }))
                }),
            )
            .route(
                "/servers/{name}",
                get(move |Path(name): Path<String>| {
                    let detail_url = detail_url.clone();
                    async move {
                        assert_eq!(name, "exa");
                        axum::Json(serde_json::json!({
                            "qualifiedName": "exa",
                            "displayName": "Exa Search",
                            "connections": [{
                                "type": "http",
                                "deploymentUrl": detail_url,
                                "authType": "bearer",
                            }],
                        }))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    };

    let search = client
        .request(
            "mcp.market.search",
            serde_json::json!({"query": "exa", "registryBaseUrl": registry_url}),
        )
        .await;
    assert_eq!(search["ok"], true, "search failed: {search}");
    assert_eq!(search["result"]["items"][0]["qualifiedName"], "exa");

    let detail = client
        .request(
            "mcp.market.detail",
            serde_json::json!({"qualifiedName": "exa", "registryBaseUrl": registry_url}),
        )
        .await;
    assert_eq!(detail["result"]["detail"]["connections"][0]["deploymentUrl"], mcp_url);

    let snapshot = client
        .request("mcp.providers.snapshot", serde_json::json!({}))
        .await;
    let base_hash = snapshot["result"]["hash"].as_str().unwrap().to_string();

    let install = client
        .request(
            "mcp.market.install",
            serde_json::json!({
                "baseHash": base_hash,
                "qualifiedName": "exa",
                "providerId": "mcp:exa",
                "secretValues": {"token": "t"},
                "enabled": true,
                "registryBaseUrl": registry_url,
            }),
        )
        .await;
    assert_eq!(install["ok"], true, "install failed: {install}");
    assert_eq!(install["result"]["restartRequired"], true);
    let rows = install["result"]["providers"].as_array().unwrap();
    assert_eq!(rows[0]["providerId"], "mcp:exa");
    assert_eq!(rows[0]["enabled"], true);
    assert_eq!(rows[0]["configured"], true);
    assert_eq!(rows[0]["toolCount"], 1);
    assert_eq!(rows[0]["deploymentUrl"], mcp_url);
    assert_eq!(rows[0]["secrets"]["token"], true);
}

#[tokio::test]
async fn oauth_device_flow_start_poll_success() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    // Mock qwen portal: device code, then pending once, then tokens.
    let polls = Arc::new(AtomicUsize::new(0));
    let upstream = {
        use axum::{Router, routing::post};
        let polls = Arc::clone(&polls);
        let app = Router::new()
            .route(
                "/api/v1/oauth2/device/code",
                post(|| async {
                    axum::Json(serde_json::json!({
                        "device_code": "dc_1",
                        "user_code": "WXYZ-0042",
                        "verification_uri": "https://chat.qwen.ai/device",
                        "interval": 1,
                        "expires_in": 600,
                    }))
                }),
            )
            .route(
                "/api/v1/oauth2/token",
                post(move || {
                    let polls = Arc::clone(&polls);
                    async move {
                        if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                            axum::Json(serde_json::json!({"error": "authorization_pending"}))
                        } else {
                            axum::Json(serde_json::json!({
                                "access_token": "at_1",
                                "refresh_token": "rt_1",
                                "expires_in": 3600,
                            }))
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    };

    let start = client
        .request("oauth.qwen.start", serde_json::json!({"baseUrl": upstream}))
        .await;
    assert_eq!(start["ok"], true, "start failed: {start}");
    let state_token = start["result"]["state"].as_str().unwrap().to_string();
    assert_eq!(start["result"]["userCode"], "WXYZ-0042");
    assert_eq!(start["result"]["intervalMs"], 1000);
    assert!(start["result"]["expiresAtMs"].as_u64().unwrap() > 0);

    let pending = client
        .request("oauth.qwen.poll", serde_json::json!({"state": state_token}))
        .await;
    assert_eq!(pending["result"]["status"], "pending");

    let success = client
        .request("oauth.qwen.poll", serde_json::json!({"state": state_token}))
        .await;
    assert_eq!(success["result"]["status"], "success");
    assert_eq!(success["result"]["profileId"], "qwen-portal:default");

    // The profile store and config both reference the credential now.
    let profiles =
        std::fs::read_to_string(gateway._dir.path().join("auth-profiles.json")).unwrap();
    assert!(profiles.contains("qwen-portal"));
    assert!(profiles.contains("at_1"));

    let config = client.request("config.get", serde_json::json!({})).await;
    assert_eq!(
        config["result"]["config"]["auth"]["profiles"]["qwen-portal"],
        "qwen-portal:default"
    );

    // An unknown state is rejected.
    let invalid = client
        .request("oauth.qwen.poll", serde_json::json!({"state": "nope"}))
        .await;
    assert_eq!(invalid["ok"], false);
    assert_eq!(invalid["error"]["message"], "invalid_state");
}

#[tokio::test]
async fn chat_delta_and_final_over_ws() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(&gateway.url).await;

    let session_key = "agent:main:webchat:dm:u1";
    let sub = client
        .request("chat.subscribe", serde_json::json!({"sessionKey": session_key}))
        .await;
    assert_eq!(sub["ok"], true);

    client
        .request(
            "agent.run.register",
            serde_json::json!({"runId": "r1", "sessionId": "sid-1"}),
        )
        .await;
    client
        .request(
            "chat.run.register",
            serde_json::json!({
                "sessionId": "sid-1",
                "sessionKey": session_key,
                "clientRunId": "cr-1",
            }),
        )
        .await;

    for (seq, stream, data) in [
        (1, "assistant", serde_json::json!({"text": "he"})),
        (2, "assistant", serde_json::json!({"text": "hello"})),
        (3, "lifecycle", serde_json::json!({"phase": "end"})),
    ] {
        let resp = client
            .request(
                "agent.event",
                serde_json::json!({
                    "runId": "r1",
                    "stream": stream,
                    "seq": seq,
                    "ts": 1,
                    "data": data,
                }),
            )
            .await;
        assert_eq!(resp["ok"], true);
    }

    // Collect chat events until the final arrives.
    let mut deltas = 0;
    let mut final_message = None;
    while final_message.is_none() {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), client.ws.next())
            .await
            .expect("expected chat events")
            .expect("connection closed")
            .unwrap();
        let Message::Text(text) = msg else { continue };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        if value["kind"] != "evt" || value["event"] != "chat" {
            continue;
        }
        match value["payload"]["state"].as_str() {
            Some("delta") => deltas += 1,
            Some("final") => final_message = Some(value["payload"]["message"].clone()),
            _ => {},
        }
    }

    // The bus emits broadcast + session unicast per chat event; with both
    // this connection sees each at most twice, throttled to one delta burst.
    assert!(deltas <= 2, "too many deltas: {deltas}");
    assert_eq!(final_message.unwrap(), "hello");
}

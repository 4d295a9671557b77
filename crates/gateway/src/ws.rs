//! WebSocket connection lifecycle: hello handshake (with auth) → message
//! loop → cleanup.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tracing::{debug, info, warn},
};

use clawgate_protocol::{
    ErrorShape, EventFrame, Features, GatewayFrame, HANDSHAKE_TIMEOUT_MS, HelloOk, HelloParams,
    MAX_PAYLOAD_BYTES, PROTOCOL_VERSION, Policy, ResponseFrame, ServerInfo, error_codes, roles,
};

use crate::{
    auth,
    broadcast::{BroadcastOpts, broadcast},
    methods::{MethodContext, MethodRegistry},
    nodes::NodeSession,
    state::{ConnectedClient, GatewayState, client_channel},
};

/// Handle a single WebSocket connection through its full lifecycle.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let remote_ip = remote_addr.ip().to_string();
    info!(conn_id = %conn_id, remote_ip = %remote_ip, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = client_channel();

    // Write loop: forwards frames from the client channel to the socket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    // ── Handshake phase ──────────────────────────────────────────────────

    let hello = match tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_hello(&mut ws_rx),
    )
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(conn_id = %conn_id, error = %e, "ws: handshake failed");
            drop(client_tx);
            write_handle.abort();
            return;
        },
        Err(_) => {
            warn!(conn_id = %conn_id, "ws: handshake timeout");
            drop(client_tx);
            write_handle.abort();
            return;
        },
    };
    let (request_id, params) = hello;

    if !auth::authorize_hello(
        state.auth_token.as_deref(),
        params.token.as_deref(),
        &remote_ip,
    ) {
        warn!(conn_id = %conn_id, "ws: auth failed");
        let err = ResponseFrame::err(
            &request_id,
            ErrorShape::new(error_codes::UNAUTHORIZED, "authentication failed"),
        );
        if let Ok(json) = serde_json::to_string(&err) {
            let _ = client_tx.send(json).await;
        }
        drop(client_tx);
        // Let the write loop flush the rejection before tearing down.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        write_handle.abort();
        return;
    }

    let role = params.role.clone().unwrap_or_else(|| roles::OPERATOR.into());
    let hello_ok = HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            version: state.version.clone(),
            host: Some(state.hostname.clone()),
            conn_id: conn_id.clone(),
        },
        features: Features {
            methods: methods.method_names(),
            events: vec![
                "tick".into(),
                "agent".into(),
                "chat".into(),
                "presence".into(),
                "oauth.updated".into(),
                "node.invoke.request".into(),
                "restart.resume".into(),
            ],
        },
        policy: Policy::default_policy(),
    };
    match serde_json::to_value(&hello_ok) {
        Ok(payload) => {
            let resp = ResponseFrame::ok(&request_id, payload);
            if let Ok(json) = serde_json::to_string(&resp) {
                let _ = client_tx.send(json).await;
            }
        },
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "ws: hello serialization failed");
            drop(client_tx);
            write_handle.abort();
            return;
        },
    }

    info!(
        conn_id = %conn_id,
        client_id = %params.client.id,
        client_version = %params.client.version,
        role = %role,
        "ws: handshake complete"
    );

    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            role: role.clone(),
            sender: client_tx.clone(),
            connected_at: std::time::Instant::now(),
        })
        .await;

    // Companion nodes register their action catalog at connect time.
    if role == roles::NODE {
        let actions: Vec<clawgate_tools::NodeAction> = params
            .actions
            .clone()
            .unwrap_or_default()
            .iter()
            .filter_map(|a| serde_json::from_value(a.clone()).ok())
            .collect();
        let permissions = params
            .permissions
            .as_ref()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
                    .collect()
            })
            .unwrap_or_default();

        state.nodes.write().await.register(NodeSession {
            node_id: params.client.id.clone(),
            conn_id: conn_id.clone(),
            display_name: params.client.display_name.clone(),
            platform: params.client.platform.clone(),
            version: params.client.version.clone(),
            actions,
            permissions,
            connected_at_ms: clawgate_common::time::now_ms(),
        });

        broadcast(
            &state,
            "presence",
            serde_json::json!({
                "type": "node.connected",
                "nodeId": params.client.id,
                "platform": params.client.platform,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }

    // ── Message loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            let evt = EventFrame::new(
                "error",
                serde_json::json!({ "message": "payload too large", "maxBytes": MAX_PAYLOAD_BYTES }),
            );
            if let Ok(json) = serde_json::to_string(&evt) {
                let _ = client_tx.try_send(json);
            }
            continue;
        }

        let frame: GatewayFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                let evt = EventFrame::new(
                    "error",
                    serde_json::json!({ "message": "invalid frame" }),
                );
                if let Ok(json) = serde_json::to_string(&evt) {
                    let _ = client_tx.try_send(json);
                }
                continue;
            },
        };

        match frame {
            GatewayFrame::Request(req) => {
                let ctx = MethodContext {
                    request_id: req.id.clone(),
                    method: req.method.clone(),
                    params: req.params.unwrap_or(serde_json::Value::Null),
                    conn_id: conn_id.clone(),
                    role: role.clone(),
                    state: Arc::clone(&state),
                };
                // Bounded dispatcher pool: the read loop keeps draining while
                // handlers run.
                let methods = Arc::clone(&methods);
                let state = Arc::clone(&state);
                let sender = client_tx.clone();
                tokio::spawn(async move {
                    let _permit = state.dispatch.acquire().await;
                    let response = methods.dispatch(ctx).await;
                    if let Ok(json) = serde_json::to_string(&response) {
                        let _ = sender.send(json).await;
                    }
                });
            },
            _ => {
                debug!(conn_id = %conn_id, "ws: ignoring non-request frame");
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    let removed = state.remove_client(&conn_id).await;
    if let Some(node_id) = &removed.node_id {
        info!(conn_id = %conn_id, node_id = %node_id, "node unregistered");
        broadcast(
            &state,
            "presence",
            serde_json::json!({
                "type": "node.disconnected",
                "nodeId": node_id,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }

    let duration = removed
        .client
        .map(|c| c.connected_at.elapsed())
        .unwrap_or_default();
    info!(
        conn_id = %conn_id,
        duration_secs = duration.as_secs(),
        "ws: connection closed"
    );

    drop(client_tx);
    write_handle.abort();
}

/// Wait for the first `hello` request frame.
async fn wait_for_hello(
    rx: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<(String, HelloParams), String> {
    while let Some(msg) = rx.next().await {
        let text = match msg.map_err(|e| e.to_string())? {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => return Err("connection closed before handshake".into()),
            _ => continue,
        };

        let frame: GatewayFrame = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        match frame {
            GatewayFrame::Request(req) => {
                if req.method != "hello" {
                    return Err(format!("first message must be 'hello', got '{}'", req.method));
                }
                let params: HelloParams =
                    serde_json::from_value(req.params.unwrap_or(serde_json::Value::Null))
                        .map_err(|e| e.to_string())?;
                return Ok((req.id, params));
            },
            _ => return Err("first message must be a request frame".into()),
        }
    }
    Err("connection closed before handshake".into())
}

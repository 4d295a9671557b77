//! Node handler family: listing, invocation, and the node-side result path.

use std::{sync::Arc, time::Duration};

use {
    clawgate_protocol::{ErrorShape, EventFrame, error_codes, validate::ParamReader},
    serde_json::Value,
    tracing::debug,
};

use {
    super::{MethodRegistry, MethodResult},
    crate::state::{GatewayState, PendingInvoke},
};

pub const DEFAULT_INVOKE_TIMEOUT_MS: u64 = 30_000;
const MIN_INVOKE_TIMEOUT_MS: u64 = 1_000;
const MAX_INVOKE_TIMEOUT_MS: u64 = 120_000;

pub(super) fn register(reg: &mut MethodRegistry) {
    // node.list
    reg.register(
        "node.list",
        Box::new(|ctx| {
            Box::pin(async move {
                let nodes = ctx.state.nodes.read().await;
                let list: Vec<_> = nodes
                    .list()
                    .iter()
                    .map(|n| {
                        serde_json::json!({
                            "nodeId": n.node_id,
                            "displayName": n.display_name,
                            "platform": n.platform,
                            "version": n.version,
                            "actions": n.actions,
                            "permissions": n.permissions,
                            "connectedAtMs": n.connected_at_ms,
                        })
                    })
                    .collect();
                Ok(serde_json::json!(list))
            })
        }),
    );

    // node.invoke: forward a command to a connected node.
    reg.register(
        "node.invoke",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let node_id = reader.require_str("nodeId");
                let command = reader.require_str("command");
                let timeout_ms = reader.opt_u64_bounded(
                    "timeoutMs",
                    MIN_INVOKE_TIMEOUT_MS,
                    MAX_INVOKE_TIMEOUT_MS,
                );
                let idempotency_key = reader.opt_str("idempotencyKey");
                reader.finish()?;
                let (Some(node_id), Some(command)) = (node_id, command) else {
                    return Err(ErrorShape::invalid("missing nodeId or command"));
                };
                let params = ctx
                    .params
                    .get("params")
                    .cloned()
                    .unwrap_or(serde_json::json!({}));

                invoke_node(
                    &ctx.state,
                    &node_id,
                    &command,
                    params,
                    timeout_ms,
                    idempotency_key.as_deref(),
                )
                .await
            })
        }),
    );

    // node.invoke.result: a node returns the result of an invoke.
    reg.register(
        "node.invoke.result",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let invoke_id = reader.require_str("invokeId");
                reader.finish()?;
                let Some(invoke_id) = invoke_id else {
                    return Err(ErrorShape::invalid("missing invokeId"));
                };

                let mut result = serde_json::Map::new();
                result.insert(
                    "ok".into(),
                    ctx.params.get("ok").cloned().unwrap_or(Value::Bool(true)),
                );
                for key in ["payload", "payloadJSON", "error"] {
                    if let Some(v) = ctx.params.get(key) {
                        result.insert(key.into(), v.clone());
                    }
                }

                let pending = ctx.state.pending_invokes.write().await.remove(&invoke_id);
                match pending {
                    Some(invoke) => {
                        let _ = invoke.sender.send(Value::Object(result));
                        Ok(serde_json::json!({}))
                    },
                    None => Err(ErrorShape::invalid("no pending invoke for this id")),
                }
            })
        }),
    );

    // node.actions.set: a node publishes (or replaces) its action catalog.
    reg.register(
        "node.actions.set",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let actions = reader.require_array("actions").cloned();
                reader.finish()?;
                let Some(actions) = actions else {
                    return Err(ErrorShape::invalid("missing actions"));
                };

                let parsed: Vec<clawgate_tools::NodeAction> = actions
                    .iter()
                    .filter_map(|a| serde_json::from_value(a.clone()).ok())
                    .collect();

                // The caller is the node itself; find it by connection.
                let node_id = {
                    let nodes = ctx.state.nodes.read().await;
                    nodes
                        .list()
                        .iter()
                        .find(|n| n.conn_id == ctx.conn_id)
                        .map(|n| n.node_id.clone())
                };
                let Some(node_id) = node_id else {
                    return Err(ErrorShape::unavailable("caller is not a registered node"));
                };

                let count = parsed.len();
                ctx.state
                    .nodes
                    .write()
                    .await
                    .set_actions(&node_id, parsed)
                    .map_err(|e| ErrorShape::unavailable(e.to_string()))?;
                debug!(node_id = %node_id, actions = count, "node actions updated");
                Ok(serde_json::json!({"ok": true, "actions": count}))
            })
        }),
    );
}

/// Forward a command to a node and wait for its reply.
///
/// Duplicate `idempotencyKey`s within the dedupe window short-circuit to the
/// previous result. Disconnection cancels the wait with `UNAVAILABLE`.
pub async fn invoke_node(
    state: &Arc<GatewayState>,
    node_id: &str,
    command: &str,
    params: Value,
    timeout_ms: Option<u64>,
    idempotency_key: Option<&str>,
) -> MethodResult {
    if let Some(key) = idempotency_key {
        if let Some(previous) = state.dedupe.write().await.get(key) {
            debug!(key, "node invoke deduplicated");
            return Ok(previous);
        }
    }

    let sender = {
        let nodes = state.nodes.read().await;
        let node = nodes
            .get(node_id)
            .ok_or_else(|| ErrorShape::unavailable("node not connected"))?;
        let clients = state.clients.read().await;
        clients
            .get(&node.conn_id)
            .map(|c| c.sender.clone())
            .ok_or_else(|| ErrorShape::unavailable("node connection lost"))?
    };

    let invoke_id = uuid::Uuid::new_v4().to_string();
    let frame = EventFrame::new(
        "node.invoke.request",
        serde_json::json!({
            "invokeId": invoke_id,
            "command": command,
            "params": params,
        }),
    );
    let json = serde_json::to_string(&frame)
        .map_err(|e| ErrorShape::internal(e.to_string()))?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    state.pending_invokes.write().await.insert(
        invoke_id.clone(),
        PendingInvoke {
            node_id: node_id.to_string(),
            sender: tx,
            created_at: std::time::Instant::now(),
        },
    );

    if sender.try_send(json).is_err() {
        state.pending_invokes.write().await.remove(&invoke_id);
        return Err(ErrorShape::unavailable("node send failed"));
    }

    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_INVOKE_TIMEOUT_MS));
    let result = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            return Err(ErrorShape::unavailable("invoke cancelled"));
        },
        Err(_) => {
            state.pending_invokes.write().await.remove(&invoke_id);
            return Err(ErrorShape::new(error_codes::TIMEOUT, "node invoke timeout"));
        },
    };

    // Surface the node's structured error when present.
    if result.get("ok").and_then(Value::as_bool) == Some(false) {
        let (code, message) = result
            .get("error")
            .map(|e| {
                (
                    e.get("code")
                        .and_then(Value::as_str)
                        .unwrap_or(error_codes::UNAVAILABLE)
                        .to_string(),
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("node invoke failed")
                        .to_string(),
                )
            })
            .unwrap_or((error_codes::UNAVAILABLE.into(), "node invoke failed".into()));
        return Err(ErrorShape::new(code, message));
    }

    if let Some(key) = idempotency_key {
        state.dedupe.write().await.record(key, result.clone());
    }
    Ok(result)
}

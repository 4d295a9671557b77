//! Chat/agent stream family: subscriptions, run registration, event ingest,
//! and aborts.

use {
    clawgate_bus::{AgentEvent, ChatLink, RunMeta},
    clawgate_protocol::{ErrorShape, validate::ParamReader},
};

use {super::MethodRegistry, crate::broadcast::deliver_bus_emits};

pub(super) fn register(reg: &mut MethodRegistry) {
    // chat.subscribe: attach this connection to a session key's stream.
    reg.register(
        "chat.subscribe",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let session_key = reader.require_str("sessionKey");
                reader.finish()?;
                let Some(session_key) = session_key else {
                    return Err(ErrorShape::invalid("missing sessionKey"));
                };

                ctx.state.subscribe_session(&session_key, &ctx.conn_id).await;
                Ok(serde_json::json!({"ok": true}))
            })
        }),
    );

    // chat.run.register: FIFO-enqueue a chat link for a session.
    reg.register(
        "chat.run.register",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let session_id = reader.require_str("sessionId");
                let session_key = reader.require_str("sessionKey");
                let client_run_id = reader.require_str("clientRunId");
                reader.finish()?;
                let (Some(session_id), Some(session_key), Some(client_run_id)) =
                    (session_id, session_key, client_run_id)
                else {
                    return Err(ErrorShape::invalid("missing chat link fields"));
                };
                let delivery: Option<clawgate_sessions::DeliveryContext> = ctx
                    .params
                    .get("deliveryContext")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());

                ctx.state.bus.register_chat_run(&session_id, ChatLink {
                    session_key: session_key.clone(),
                    client_run_id,
                });

                // Every interaction touches the session entry; legacy node
                // keys are migrated on the way through.
                let resolver = {
                    let nodes = ctx.state.nodes.read().await;
                    let names: std::collections::HashMap<String, String> = nodes
                        .list()
                        .iter()
                        .filter_map(|n| {
                            n.display_name.clone().map(|d| (n.node_id.clone(), d))
                        })
                        .collect();
                    move |node_id: &str| names.get(node_id).cloned()
                };
                let update = ctx.state.sessions.update(resolver, |map| {
                    let entry = map
                        .entry(session_key.clone())
                        .or_insert_with(clawgate_sessions::SessionEntry::new_now);
                    entry.updated_at = clawgate_common::time::now_ms();
                    if let Some(delivery) = delivery {
                        entry.last_channel = delivery.channel.clone();
                        entry.last_to = delivery.to.clone();
                        entry.delivery_context = Some(delivery);
                    }
                    entry.session_id.clone()
                });
                match update {
                    Ok(stored_session_id) => Ok(serde_json::json!({
                        "ok": true,
                        "sessionId": stored_session_id,
                    })),
                    Err(e) => {
                        // Best-effort persistence; the chat link is already
                        // registered.
                        tracing::warn!(error = %e, "session store update failed");
                        Ok(serde_json::json!({"ok": true}))
                    },
                }
            })
        }),
    );

    // agent.run.register: run context for the bus (heartbeat, verbosity,
    // session join).
    reg.register(
        "agent.run.register",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let run_id = reader.require_str("runId");
                let session_id = reader.opt_str("sessionId");
                let session_key = reader.opt_str("sessionKey");
                let heartbeat = reader.opt_bool("heartbeat").unwrap_or(false);
                let verbosity = reader.opt_str("verbosity");
                reader.finish()?;
                let Some(run_id) = run_id else {
                    return Err(ErrorShape::invalid("missing runId"));
                };

                // Session-scope verbosity comes from the stored session entry.
                let session_verbosity = match &session_key {
                    Some(key) => ctx
                        .state
                        .sessions
                        .load()
                        .ok()
                        .and_then(|map| map.get(key).and_then(|e| e.verbose_level.clone())),
                    None => None,
                };

                ctx.state.bus.register_run(&run_id, RunMeta {
                    session_id,
                    session_key,
                    heartbeat,
                    verbosity,
                    session_verbosity,
                });
                Ok(serde_json::json!({"ok": true}))
            })
        }),
    );

    // agent.event: one sequenced run event into the bus.
    reg.register(
        "agent.event",
        Box::new(|ctx| {
            Box::pin(async move {
                let event: AgentEvent = serde_json::from_value(ctx.params.clone())
                    .map_err(|e| ErrorShape::invalid(format!("malformed agent event: {e}")))?;
                let emits = ctx.state.bus.handle_event(&event);
                deliver_bus_emits(&ctx.state, emits).await;
                Ok(serde_json::json!({"ok": true}))
            })
        }),
    );

    // chat.abort: drain the run without a final chat event.
    reg.register(
        "chat.abort",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let run_id = reader.require_str("runId");
                reader.finish()?;
                let Some(run_id) = run_id else {
                    return Err(ErrorShape::invalid("missing runId"));
                };

                ctx.state.bus.mark_aborted(&run_id);
                Ok(serde_json::json!({"ok": true}))
            })
        }),
    );
}

//! Event fanout: broadcast to all clients and per-session unicast.

use std::sync::Arc;

use {
    clawgate_protocol::EventFrame,
    tracing::{debug, warn},
};

use crate::state::GatewayState;

#[derive(Default, Clone, Copy)]
pub struct BroadcastOpts {
    /// Shed this event for clients whose send queue is past the watermark.
    pub drop_if_slow: bool,
}

/// Push an event to every connected client. Slow consumers either shed the
/// event (`drop_if_slow`) or get it queued behind their backlog.
pub async fn broadcast(
    state: &Arc<GatewayState>,
    event: &str,
    payload: serde_json::Value,
    opts: BroadcastOpts,
) {
    let frame = EventFrame::new(event, payload);
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(event, error = %e, "failed to serialize broadcast event");
            return;
        },
    };

    let clients = state.clients.read().await;
    debug!(event, clients = clients.len(), "broadcasting event");
    for client in clients.values() {
        if !client.try_send(&json) && !opts.drop_if_slow {
            // The queue is full and this event must not be shed; fall back
            // to an owned task so the read loop is never blocked.
            let sender = client.sender.clone();
            let json = json.clone();
            tokio::spawn(async move {
                let _ = sender.send(json).await;
            });
        }
    }
}

/// Send an event to the connections subscribed to one session key.
pub async fn send_to_session(
    state: &Arc<GatewayState>,
    session_key: &str,
    event: &str,
    payload: serde_json::Value,
) {
    let frame = EventFrame::new(event, payload);
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(event, error = %e, "failed to serialize session event");
            return;
        },
    };

    let conn_ids: Vec<String> = {
        let subs = state.session_subs.read().await;
        subs.get(session_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    };
    if conn_ids.is_empty() {
        return;
    }

    let clients = state.clients.read().await;
    for conn_id in conn_ids {
        if let Some(client) = clients.get(&conn_id) {
            let _ = client.try_send(&json);
        }
    }
}

/// Deliver bus emissions through the right fanout.
pub async fn deliver_bus_emits(state: &Arc<GatewayState>, emits: Vec<clawgate_bus::BusEmit>) {
    for emit in emits {
        match emit.target {
            clawgate_bus::EmitTarget::Broadcast => {
                broadcast(state, emit.event, emit.payload, BroadcastOpts {
                    drop_if_slow: true,
                })
                .await;
            },
            clawgate_bus::EmitTarget::Session(key) => {
                send_to_session(state, &key, emit.event, emit.payload).await;
            },
        }
    }
}

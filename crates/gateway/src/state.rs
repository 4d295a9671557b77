//! Shared gateway runtime state.
//!
//! Initialized once in the boot sequence; torn down in reverse order. No
//! module-load side effects: every store and registry is constructed
//! explicitly and handed to `GatewayState`.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tokio::sync::{RwLock, mpsc, oneshot};

use {
    clawgate_bus::AgentEventBus,
    clawgate_config::ConfigStore,
    clawgate_mcp::SsrfGuard,
    clawgate_oauth::{FlowRegistry, ProfileStore},
    clawgate_protocol::SEND_QUEUE_HIGH_WATERMARK,
    clawgate_secrets::SecretStore,
    clawgate_sessions::SessionStore,
    clawgate_tools::BuiltinRegistry,
};

use crate::{dedupe::DedupeCache, nodes::NodeRegistry, restart::RestartPlane};

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub role: String,
    /// Bounded channel for serialized frames to this client's write loop.
    pub sender: mpsc::Sender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Best-effort push. Returns false when the queue is past the high
    /// watermark or the connection is gone.
    pub fn try_send(&self, frame: &str) -> bool {
        self.sender.try_send(frame.to_string()).is_ok()
    }

    /// Queue a frame, waiting for room. Used for responses, which are never
    /// shed.
    pub async fn send(&self, frame: String) -> bool {
        self.sender.send(frame).await.is_ok()
    }
}

/// Channel capacity for each client's outbound queue.
pub fn client_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(SEND_QUEUE_HIGH_WATERMARK)
}

/// Size of the bounded dispatcher pool for handler execution.
pub const DISPATCHER_POOL_SIZE: usize = 16;

/// What `remove_client` tore down.
#[derive(Default)]
pub struct RemovedClient {
    pub client: Option<ConnectedClient>,
    /// Set when the connection was a registered node.
    pub node_id: Option<String>,
}

// ── Pending node invoke ─────────────────────────────────────────────────────

/// An RPC forwarded to a node, awaiting its result.
pub struct PendingInvoke {
    pub node_id: String,
    pub sender: oneshot::Sender<serde_json::Value>,
    pub created_at: Instant,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared runtime state, wrapped in `Arc` across tasks.
pub struct GatewayState {
    pub version: String,
    pub hostname: String,
    pub started_at: Instant,
    pub port: u16,
    /// Bearer token required in `hello`; `None` accepts loopback only.
    pub auth_token: Option<String>,

    pub config: ConfigStore,
    pub secrets: SecretStore,
    pub sessions: SessionStore,
    pub profiles: ProfileStore,
    pub bus: AgentEventBus,
    pub builtins: BuiltinRegistry,
    pub flows: FlowRegistry,
    pub restart: Arc<RestartPlane>,

    /// All connected clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Per-session fanout: sessionKey → subscribed conn_ids.
    pub session_subs: RwLock<HashMap<String, HashSet<String>>>,
    /// Connected companion nodes.
    pub nodes: RwLock<NodeRegistry>,
    /// invokeId → pending node invoke.
    pub pending_invokes: RwLock<HashMap<String, PendingInvoke>>,
    /// Idempotency cache for node invokes.
    pub dedupe: RwLock<DedupeCache>,
    /// Raw+hash of the config as last applied (reload diffs against this).
    pub applied_config: RwLock<(String, String)>,
    /// Bounded dispatcher pool for handler execution.
    pub dispatch: tokio::sync::Semaphore,

    seq: AtomicU64,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port: u16,
        auth_token: Option<String>,
        config: ConfigStore,
        secrets: SecretStore,
        sessions: SessionStore,
        profiles: ProfileStore,
        bus: AgentEventBus,
        builtins: BuiltinRegistry,
        restart: Arc<RestartPlane>,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            started_at: Instant::now(),
            port,
            auth_token,
            config,
            secrets,
            sessions,
            profiles,
            bus,
            builtins,
            flows: FlowRegistry::new(),
            restart,
            clients: RwLock::new(HashMap::new()),
            session_subs: RwLock::new(HashMap::new()),
            nodes: RwLock::new(NodeRegistry::new()),
            pending_invokes: RwLock::new(HashMap::new()),
            dedupe: RwLock::new(DedupeCache::new()),
            applied_config: RwLock::new((String::new(), String::new())),
            dispatch: tokio::sync::Semaphore::new(DISPATCHER_POOL_SIZE),
            seq: AtomicU64::new(0),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// SSRF guard configured from the current snapshot.
    pub fn ssrf_guard(&self) -> SsrfGuard {
        let allow = self
            .config
            .read_snapshot()
            .ok()
            .and_then(|s| s.config)
            .map(|c| c.mcp.allow_private_networks)
            .unwrap_or(false);
        SsrfGuard::new(allow)
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client);
    }

    /// Remove a client and everything hanging off its connection:
    /// session subscriptions, node registration, and in-flight invokes
    /// (cancelled with an unavailable marker).
    pub async fn remove_client(&self, conn_id: &str) -> RemovedClient {
        for subs in self.session_subs.write().await.values_mut() {
            subs.remove(conn_id);
        }

        let removed_node = self.nodes.write().await.unregister_by_conn(conn_id);
        let node_id = removed_node.map(|n| n.node_id);
        if let Some(node_id) = &node_id {
            let mut pending = self.pending_invokes.write().await;
            let cancelled: Vec<String> = pending
                .iter()
                .filter(|(_, p)| &p.node_id == node_id)
                .map(|(id, _)| id.clone())
                .collect();
            for invoke_id in cancelled {
                if let Some(p) = pending.remove(&invoke_id) {
                    let _ = p.sender.send(serde_json::json!({
                        "ok": false,
                        "error": {"code": "UNAVAILABLE", "message": "node disconnected"},
                    }));
                }
            }
        }

        RemovedClient {
            client: self.clients.write().await.remove(conn_id),
            node_id,
        }
    }

    /// Subscribe a connection to a session key's event stream.
    pub async fn subscribe_session(&self, session_key: &str, conn_id: &str) {
        self.session_subs
            .write()
            .await
            .entry(session_key.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

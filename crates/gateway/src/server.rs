//! HTTP/WS listener wiring and the periodic tick broadcaster.

use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::IntoResponse,
        routing::get,
    },
    tracing::info,
};

use clawgate_protocol::TICK_INTERVAL_MS;

use crate::{
    broadcast::{BroadcastOpts, broadcast},
    methods::MethodRegistry,
    state::GatewayState,
    ws,
};

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
}

/// Build the gateway router: a single WebSocket upgrade endpoint.
pub fn router(gateway: Arc<GatewayState>, methods: Arc<MethodRegistry>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .with_state(AppState { gateway, methods })
}

async fn upgrade(
    upgrade: WebSocketUpgrade,
    State(app): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| {
        ws::handle_connection(socket, app.gateway, app.methods, remote_addr)
    })
}

/// Bind the listener and serve until `shutdown` resolves.
pub async fn serve(
    gateway: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let app = router(gateway, methods).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Periodic tick broadcast; slow consumers shed it.
pub fn spawn_tick_loop(state: Arc<GatewayState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(TICK_INTERVAL_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            broadcast(
                &state,
                "tick",
                serde_json::json!({ "ts": clawgate_common::time::now_ms() }),
                BroadcastOpts { drop_if_slow: true },
            )
            .await;
        }
    })
}

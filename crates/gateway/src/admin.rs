//! Admin pipe: a local-only HTTP API on a Unix-domain socket, wrapping the
//! same handler families as the WebSocket surface.

use std::{future::Future, path::PathBuf, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderValue, StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    tracing::{debug, info, warn},
};

use clawgate_protocol::error_codes;

use crate::{
    methods::{MethodContext, MethodRegistry},
    reload,
    state::GatewayState,
};

#[derive(Clone)]
struct AdminState {
    gateway: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
}

/// Build the admin router.
pub fn router(gateway: Arc<GatewayState>, methods: Arc<MethodRegistry>) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/nodes", get(nodes))
        .route("/api/v1/nodes/invoke", post(nodes_invoke))
        .route("/api/v1/config", get(config))
        .route("/api/v1/reload", post(reload_endpoint))
        .route("/api/v1/oauth/{provider}/{action}", post(oauth))
        .route("/api/v1/shim-test", post(shim_test))
        .fallback(not_found)
        .with_state(AdminState { gateway, methods })
}

/// Serve the router on a Unix-domain socket; a stale socket file is
/// unlinked first.
#[cfg(unix)]
pub async fn serve(
    gateway: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    pipe_path: PathBuf,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Some(parent) = pipe_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&pipe_path);
    let listener = tokio::net::UnixListener::bind(&pipe_path)?;
    info!(path = %pipe_path.display(), "admin pipe listening");

    let app = router(gateway, methods);
    let mut make_svc = app.into_make_service();
    let mut shutdown = std::pin::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _)) => {
                        let svc_future = <_ as tower::Service<_>>::call(&mut make_svc, ());
                        tokio::spawn(async move {
                            let Ok(svc) = svc_future.await;
                            let io = hyper_util::rt::TokioIo::new(stream);
                            let hyper_svc = hyper_util::service::TowerToHyperService::new(svc);
                            let _ = hyper_util::server::conn::auto::Builder::new(
                                hyper_util::rt::TokioExecutor::new(),
                            )
                            .serve_connection_with_upgrades(io, hyper_svc)
                            .await;
                        });
                    },
                    Err(e) => {
                        debug!(error = %e, "admin pipe accept error");
                    },
                }
            }
        }
    }
    let _ = std::fs::remove_file(&pipe_path);
    Ok(())
}

/// Named-pipe transport is not wired on this platform; the WebSocket surface
/// carries the same methods.
#[cfg(not(unix))]
pub async fn serve(
    _gateway: Arc<GatewayState>,
    _methods: Arc<MethodRegistry>,
    pipe_path: PathBuf,
    _shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    warn!(path = %pipe_path.display(), "admin pipe unsupported on this platform");
    Ok(())
}

// ── Endpoint glue ────────────────────────────────────────────────────────────

/// Dispatch into the shared method registry and map the response frame onto
/// HTTP semantics.
async fn call_method(app: &AdminState, method: &str, params: serde_json::Value) -> Response {
    let ctx = MethodContext {
        request_id: uuid::Uuid::new_v4().to_string(),
        method: method.to_string(),
        params,
        conn_id: "admin".into(),
        role: clawgate_protocol::roles::OPERATOR.into(),
        state: Arc::clone(&app.gateway),
    };
    let frame = app.methods.dispatch(ctx).await;

    if frame.ok {
        return json_response(
            StatusCode::OK,
            frame.result.unwrap_or(serde_json::json!({})),
        );
    }

    let error = frame.error.unwrap_or_else(|| {
        clawgate_protocol::ErrorShape::internal("missing error on failed response")
    });
    let status = match error.code.as_str() {
        error_codes::INVALID_REQUEST => StatusCode::BAD_REQUEST,
        error_codes::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        error_codes::NOT_FOUND | error_codes::TOOL_NOT_FOUND => StatusCode::NOT_FOUND,
        error_codes::STALE_HASH => StatusCode::CONFLICT,
        error_codes::UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        error_codes::TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(method, code = %error.code, "admin request failed");
    json_response(
        status,
        serde_json::json!({ "error": error, "result": frame.result }),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    let mut resp = (status, Json(body)).into_response();
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    resp
}

async fn status(State(app): State<AdminState>) -> Response {
    call_method(&app, "status", serde_json::json!({})).await
}

async fn nodes(State(app): State<AdminState>) -> Response {
    call_method(&app, "node.list", serde_json::json!({})).await
}

async fn nodes_invoke(
    State(app): State<AdminState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    call_method(&app, "node.invoke", body).await
}

async fn config(State(app): State<AdminState>) -> Response {
    call_method(&app, "config.get", serde_json::json!({})).await
}

async fn reload_endpoint(State(app): State<AdminState>) -> Response {
    let outcome = reload::run_reload(&app.gateway).await;
    json_response(StatusCode::OK, outcome)
}

async fn oauth(
    State(app): State<AdminState>,
    Path((provider, action)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !matches!(action.as_str(), "start" | "poll" | "complete") {
        return json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({"error": {"code": "NOT_FOUND", "message": "unknown oauth action"}}),
        );
    }
    call_method(&app, &format!("oauth.{provider}.{action}"), body).await
}

async fn shim_test(Json(body): Json<serde_json::Value>) -> Response {
    // Round-trip probe for shim clients: echoes the body back.
    json_response(
        StatusCode::OK,
        serde_json::json!({"ok": true, "echo": body}),
    )
}

async fn not_found() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({"error": {"code": "NOT_FOUND", "message": "unknown endpoint"}}),
    )
}

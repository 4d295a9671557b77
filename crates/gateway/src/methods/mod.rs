//! Method registry: dotted method names → async handlers.
//!
//! All handler families are wired at startup; there is no runtime import
//! fallback. A handler resolves to exactly one response frame; panics are
//! captured and translated to `INTERNAL`.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, warn};

use clawgate_protocol::{ErrorShape, ResponseFrame, error_codes};

use crate::state::GatewayState;

mod chat;
mod config;
mod mcp;
mod node;
mod oauth;
mod system;
mod tools;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: String,
    pub method: String,
    pub params: serde_json::Value,
    pub conn_id: String,
    pub role: String,
    pub state: Arc<GatewayState>,
}

/// The result a method handler produces.
pub type MethodResult = Result<serde_json::Value, ErrorShape>;

/// A boxed async method handler.
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

// ── Role authorization ───────────────────────────────────────────────────────

/// Methods only a connected node may call.
const NODE_METHODS: &[&str] = &["node.invoke.result", "node.actions.set"];

/// Check the caller's role for a method. `None` means authorized.
pub fn authorize_method(method: &str, role: &str) -> Option<ErrorShape> {
    if NODE_METHODS.contains(&method) {
        if role == clawgate_protocol::roles::NODE {
            return None;
        }
        return Some(ErrorShape::new(
            error_codes::UNAUTHORIZED,
            format!("method {method} requires the node role"),
        ));
    }
    if role == clawgate_protocol::roles::OPERATOR {
        return None;
    }
    Some(ErrorShape::new(
        error_codes::UNAUTHORIZED,
        format!("unauthorized role: {role}"),
    ))
}

// ── Method registry ──────────────────────────────────────────────────────────

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_defaults();
        reg
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    /// Dispatch a request to its handler and build the single response
    /// frame. Handler panics surface as `INTERNAL`.
    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();
        let conn_id = ctx.conn_id.clone();

        if let Some(err) = authorize_method(&method, &ctx.role) {
            warn!(method, conn_id = %conn_id, code = %err.code, "method auth denied");
            return ResponseFrame::err(&request_id, err);
        }

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, conn_id = %conn_id, "unknown method");
            return ResponseFrame::err(
                &request_id,
                ErrorShape::new(
                    error_codes::INVALID_REQUEST,
                    format!("unknown method: {method}"),
                ),
            );
        };

        debug!(method, request_id = %request_id, conn_id = %conn_id, "dispatching method");
        let fut = handler(ctx);
        let outcome = tokio::spawn(fut).await;

        match outcome {
            Ok(Ok(payload)) => {
                debug!(method, request_id = %request_id, "method ok");
                ResponseFrame::ok(&request_id, payload)
            },
            Ok(Err(err)) => {
                if err.code == error_codes::UNAVAILABLE {
                    debug!(method, request_id = %request_id, code = %err.code, msg = %err.message, "method unavailable");
                } else {
                    warn!(method, request_id = %request_id, code = %err.code, msg = %err.message, "method error");
                }
                // Field-level validation errors ride along in the result so
                // UIs can highlight inputs without a second round-trip.
                let field_errors = err
                    .details
                    .as_ref()
                    .and_then(|d| d.get("fieldErrors"))
                    .cloned();
                match field_errors {
                    Some(errors) => ResponseFrame::err_with_result(
                        &request_id,
                        err,
                        serde_json::json!({ "fieldErrors": errors }),
                    ),
                    None => ResponseFrame::err(&request_id, err),
                }
            },
            Err(join_err) => {
                warn!(method, request_id = %request_id, error = %join_err, "handler panicked");
                ResponseFrame::err(
                    &request_id,
                    ErrorShape::new(error_codes::INTERNAL, "handler failed"),
                )
            },
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        chat::register(self);
        config::register(self);
        mcp::register(self);
        node::register(self);
        oauth::register(self);
        system::register(self);
        tools::register(self);
    }
}

// ── Shared handler helpers ──────────────────────────────────────────────────

/// Map an MCP hub error onto the wire error set.
pub(crate) fn mcp_error(err: clawgate_mcp::Error) -> ErrorShape {
    let message = clawgate_protocol::truncate_remote_message(&err.to_string());
    ErrorShape::new(err.wire_code(), message)
}

/// Map a config store error onto the wire error set.
pub(crate) fn config_error(err: clawgate_config::Error) -> ErrorShape {
    match err {
        clawgate_config::Error::StaleHash { expected, got } => ErrorShape::new(
            error_codes::STALE_HASH,
            "base hash is stale; re-fetch the snapshot and retry",
        )
        .with_details(serde_json::json!({"expected": expected, "got": got})),
        clawgate_config::Error::Invalid(issues) => ErrorShape::new(
            error_codes::INVALID_REQUEST,
            "config validation failed",
        )
        .with_details(serde_json::json!({"issues": issues})),
        other => ErrorShape::internal(other.to_string()),
    }
}

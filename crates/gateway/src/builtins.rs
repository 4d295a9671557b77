//! Builtin gateway tools registered at boot.

use std::sync::Arc;

use clawgate_tools::{BuiltinRegistry, BuiltinTool};

use crate::restart::RestartPlane;

/// Register the gateway's own tools under `builtin:gateway`.
pub fn build(restart: Arc<RestartPlane>) -> BuiltinRegistry {
    let mut registry = BuiltinRegistry::new();

    registry.register(BuiltinTool {
        provider_id: "builtin:gateway".into(),
        provider_label: "Gateway".into(),
        command: "ping".into(),
        description: Some("Round-trip liveness check".into()),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
        handler: Arc::new(|_args| {
            Box::pin(async move {
                Ok(serde_json::json!({"pong": true, "ts": clawgate_common::time::now_ms()}))
            })
        }),
    });

    registry.register(BuiltinTool {
        provider_id: "builtin:gateway".into(),
        provider_label: "Gateway".into(),
        command: "restart".into(),
        description: Some("Schedule a cooperative gateway restart".into()),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "delayMs": {"type": "integer"},
                "reason": {"type": "string"},
                "sessionKey": {"type": "string"},
            },
        }),
        handler: Arc::new(move |args| {
            let restart = Arc::clone(&restart);
            Box::pin(async move {
                let delay_ms = args.get("delayMs").and_then(|v| v.as_u64());
                let reason = args
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                // Legacy node keys are sanitized before they reach the
                // sentinel; non-node keys pass through untouched.
                let session_key = args
                    .get("sessionKey")
                    .and_then(|v| v.as_str())
                    .map(|key| {
                        clawgate_sessions::sanitize_session_key(key, |_| None)
                            .unwrap_or_else(|| key.to_string())
                    });

                let info = restart.schedule_self_restart(delay_ms, reason, session_key);
                serde_json::to_value(&info).map_err(|e| e.to_string())
            })
        }),
    });

    registry
}

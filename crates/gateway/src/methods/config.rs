//! Config handler family: get/schema/apply/patch plus the reload entry
//! point shared with the admin pipe.

use {
    clawgate_protocol::{ErrorShape, validate::ParamReader},
    serde_json::Value,
};

use super::{MethodRegistry, config_error};

pub(super) fn register(reg: &mut MethodRegistry) {
    // config.get: the current snapshot (raw, hash, validity, issues).
    reg.register(
        "config.get",
        Box::new(|ctx| {
            Box::pin(async move {
                let snapshot = ctx.state.config.read_snapshot().map_err(config_error)?;
                Ok(serde_json::json!({
                    "exists": snapshot.exists,
                    "valid": snapshot.valid,
                    "hash": snapshot.hash,
                    "raw": snapshot.raw,
                    "config": snapshot.config,
                    "issues": snapshot.issues,
                    "path": ctx.state.config.path().display().to_string(),
                }))
            })
        }),
    );

    // config.schema: defaults rendered as a template for editors.
    reg.register(
        "config.schema",
        Box::new(|_ctx| {
            Box::pin(async move {
                let defaults = clawgate_config::GatewayConfig::default();
                Ok(serde_json::json!({
                    "defaults": defaults,
                    "restartPaths": ["gateway", "admin", "mcp.providers"],
                }))
            })
        }),
    );

    // config.apply: replace the whole tree under a base hash.
    reg.register(
        "config.apply",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.opt_str("baseHash");
                let raw_hash = reader.opt_str("baseRaw");
                let next = ctx.params.get("config").cloned();
                reader.finish()?;

                let Some(next) = next else {
                    return Err(ErrorShape::invalid("params.config: required"));
                };
                let base = ctx
                    .state
                    .config
                    .resolve_hash(base_hash.as_deref(), raw_hash.as_deref());
                let snapshot = ctx
                    .state
                    .config
                    .write(&next, base.as_deref())
                    .map_err(config_error)?;

                crate::reload::after_config_write(&ctx.state, &snapshot).await;
                Ok(serde_json::json!({
                    "ok": true,
                    "hash": snapshot.hash,
                    "restartRequired": crate::reload::pending_restart(&ctx.state, &snapshot).await,
                }))
            })
        }),
    );

    // config.patch: merge a partial tree into the current value.
    reg.register(
        "config.patch",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.opt_str("baseHash");
                let patch = ctx.params.get("patch").cloned();
                reader.finish()?;

                let Some(patch) = patch else {
                    return Err(ErrorShape::invalid("params.patch: required"));
                };
                let current = ctx.state.config.read_snapshot().map_err(config_error)?;
                let mut next = current.value();
                merge_patch(&mut next, &patch);

                let base = base_hash.or(Some(current.hash.clone()));
                let snapshot = ctx
                    .state
                    .config
                    .write(&next, base.as_deref())
                    .map_err(config_error)?;

                crate::reload::after_config_write(&ctx.state, &snapshot).await;
                Ok(serde_json::json!({
                    "ok": true,
                    "hash": snapshot.hash,
                    "restartRequired": crate::reload::pending_restart(&ctx.state, &snapshot).await,
                }))
            })
        }),
    );
}

/// RFC 7396-style merge: objects merge recursively, null deletes, everything
/// else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(
                            target_map.entry(key.clone()).or_insert(Value::Null),
                            value,
                        );
                    }
                }
            }
        },
        other => *target = other.clone(),
    }
}

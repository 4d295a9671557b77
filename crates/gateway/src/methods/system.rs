//! Process-level methods: status and the update runner.

use clawgate_config::model_catalog;

use super::MethodRegistry;

pub(super) fn register(reg: &mut MethodRegistry) {
    // status: process metadata, mirrored by the admin pipe.
    reg.register(
        "status",
        Box::new(|ctx| {
            Box::pin(async move {
                let state = ctx.state;
                let snapshot = state.config.read_snapshot().ok();
                Ok(serde_json::json!({
                    "pid": std::process::id(),
                    "version": state.version,
                    "host": state.hostname,
                    "port": state.port,
                    "uptimeSecs": state.uptime_secs(),
                    "clients": state.client_count().await,
                    "nodes": state.nodes.read().await.count(),
                    "configPath": state.config.path().display().to_string(),
                    "configHash": snapshot.as_ref().map(|s| s.hash.clone()),
                    "configValid": snapshot.as_ref().map(|s| s.valid),
                }))
            })
        }),
    );

    // update.run: refresh the model-catalog cache. A failed bootstrap never
    // poisons the singleton; the next call reloads it.
    reg.register(
        "update.run",
        Box::new(|_ctx| {
            Box::pin(async move {
                model_catalog::invalidate();
                let catalog = model_catalog::load(None);
                let refreshed = model_catalog::ModelCatalog {
                    version: model_catalog::CATALOG_VERSION,
                    updated_at_ms: clawgate_common::time::now_ms(),
                    models: catalog.models.clone(),
                };
                if let Err(e) = model_catalog::store(None, &refreshed) {
                    tracing::warn!(error = %e, "model catalog persistence failed");
                }
                Ok(serde_json::json!({
                    "ok": true,
                    "updatedAtMs": refreshed.updated_at_ms,
                    "models": refreshed.models.len(),
                }))
            })
        }),
    );
}

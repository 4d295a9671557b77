//! MCP hub handler family: presets, providers snapshot/apply, market
//! search/detail/install/uninstall/refresh.

use std::sync::Arc;

use {
    clawgate_mcp::{ApplyOutcome, MarketClient, ProviderInput, apply_providers, provider_rows},
    clawgate_protocol::{ErrorShape, validate::ParamReader},
};

use {
    super::{MethodRegistry, MethodResult, config_error, mcp_error},
    crate::state::GatewayState,
};

pub(super) fn register(reg: &mut MethodRegistry) {
    // mcp.presets.list: templates straight from the config, sanitized by the
    // typed schema on the way through.
    reg.register(
        "mcp.presets.list",
        Box::new(|ctx| {
            Box::pin(async move {
                let snapshot = ctx.state.config.read_snapshot().map_err(config_error)?;
                let presets = snapshot
                    .config
                    .map(|c| c.mcp.presets)
                    .unwrap_or_default();
                Ok(serde_json::json!({ "presets": presets }))
            })
        }),
    );

    // mcp.providers.snapshot: materialized rows plus the concurrency token.
    reg.register(
        "mcp.providers.snapshot",
        Box::new(|ctx| Box::pin(async move { providers_snapshot(&ctx.state) })),
    );

    // mcp.providers.apply: the single-pass editor.
    reg.register(
        "mcp.providers.apply",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.require_str("baseHash");
                let providers = reader.require_array("providers").cloned();
                let discover_all = reader.opt_bool("discoverTools").unwrap_or(false);
                reader.finish()?;

                let (Some(base_hash), Some(providers)) = (base_hash, providers) else {
                    return Err(ErrorShape::invalid("missing baseHash or providers"));
                };

                let mut inputs = Vec::new();
                let mut field_errors = Vec::new();
                for value in &providers {
                    match ProviderInput::parse(value) {
                        Ok(mut input) => {
                            input.discover_tools |= discover_all;
                            inputs.push(input);
                        },
                        Err(err) => field_errors.push(err),
                    }
                }
                if !field_errors.is_empty() {
                    return Err(field_errors_shape(field_errors));
                }

                run_apply(&ctx.state, &base_hash, inputs).await
            })
        }),
    );

    // mcp.providers.preflight: discovery plus a safe-verb smoke call.
    reg.register(
        "mcp.providers.preflight",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let provider_id = reader.require_str("providerId");
                let timeout_ms = reader.opt_u64_bounded("timeoutMs", 1_000, 120_000);
                reader.finish()?;
                let Some(provider_id) = provider_id else {
                    return Err(ErrorShape::invalid("missing providerId"));
                };
                let provider_id = clawgate_config::normalize_provider_id(&provider_id);

                let snapshot = ctx.state.config.read_snapshot().map_err(config_error)?;
                let config = snapshot.config.unwrap_or_default();
                let entry = config.mcp.providers.get(&provider_id).ok_or_else(|| {
                    ErrorShape::new(
                        clawgate_protocol::error_codes::NOT_FOUND,
                        format!("provider not installed: {provider_id}"),
                    )
                })?;
                let connection = entry
                    .connection
                    .as_ref()
                    .ok_or_else(|| ErrorShape::unavailable("provider has no connection"))?;

                let mut secrets = std::collections::BTreeMap::new();
                for (field, r#ref) in &entry.secret_refs {
                    if let Ok(Some(value)) = ctx.state.secrets.get(r#ref) {
                        secrets.insert(field.clone(), value);
                    }
                }
                let bearer = clawgate_mcp::resolve_bearer_token(
                    Some(connection.auth_type),
                    &secrets,
                );
                let client = clawgate_mcp::McpHttpClient::new(
                    connection.deployment_url.clone(),
                    bearer,
                    timeout_ms,
                    ctx.state.ssrf_guard(),
                )
                .map_err(mcp_error)?;

                match clawgate_mcp::preflight(&client).await {
                    Ok(report) => Ok(serde_json::to_value(&report)
                        .map_err(|e| ErrorShape::internal(e.to_string()))?),
                    Err(e) => Ok(serde_json::json!({
                        "ok": false,
                        "error": clawgate_protocol::truncate_remote_message(&e.to_string()),
                        "deploymentUrl": connection.deployment_url,
                    })),
                }
            })
        }),
    );

    // mcp.market.search
    reg.register(
        "mcp.market.search",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let query = reader.opt_str("query");
                let page = reader.opt_u64_bounded("page", 1, 10_000).unwrap_or(1);
                let page_size = reader.opt_u64_bounded("pageSize", 1, 100).unwrap_or(20);
                let registry_base = reader.opt_str("registryBaseUrl");
                reader.finish()?;

                let client = market_client(&ctx.state, registry_base)?;
                let result = client
                    .search(query.as_deref(), page, page_size)
                    .await
                    .map_err(mcp_error)?;
                Ok(serde_json::json!({
                    "items": result.items,
                    "pagination": result.pagination,
                }))
            })
        }),
    );

    // mcp.market.detail
    reg.register(
        "mcp.market.detail",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let qualified_name = reader.require_str("qualifiedName");
                let registry_base = reader.opt_str("registryBaseUrl");
                reader.finish()?;
                let Some(qualified_name) = qualified_name else {
                    return Err(ErrorShape::invalid("missing qualifiedName"));
                };

                let client = market_client(&ctx.state, registry_base)?;
                let detail = client.detail(&qualified_name).await.map_err(mcp_error)?;
                Ok(serde_json::json!({ "detail": detail }))
            })
        }),
    );

    // mcp.market.install: detail + apply with discovery.
    reg.register(
        "mcp.market.install",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.require_str("baseHash");
                let qualified_name = reader.require_str("qualifiedName");
                let provider_id = reader.opt_str("providerId");
                let enabled = reader.opt_bool("enabled");
                let registry_base = reader.opt_str("registryBaseUrl");
                reader.finish()?;
                let (Some(base_hash), Some(qualified_name)) = (base_hash, qualified_name) else {
                    return Err(ErrorShape::invalid("missing baseHash or qualifiedName"));
                };

                let client = market_client(&ctx.state, registry_base)?;
                let detail = client.detail(&qualified_name).await.map_err(mcp_error)?;
                let connection = detail.connections.first().ok_or_else(|| {
                    ErrorShape::unavailable(format!(
                        "registry server '{qualified_name}' has no http connection"
                    ))
                })?;

                let provider_id = provider_id.unwrap_or_else(|| qualified_name.clone());
                let mut input_value = serde_json::json!({
                    "providerId": provider_id,
                    "label": detail.display_name,
                    "source": "catalog",
                    "qualifiedName": detail.qualified_name,
                    "enabled": enabled.unwrap_or(true),
                    "connection": {
                        "type": "http",
                        "deploymentUrl": connection.deployment_url,
                        "authType": connection.auth_type.clone().unwrap_or_else(|| "bearer".into()),
                        "configSchema": connection.config_schema,
                    },
                    "discoverTools": true,
                });
                if let Some(secrets) = ctx.params.get("secretValues") {
                    input_value["secretValues"] = secrets.clone();
                }
                if let Some(required) = ctx.params.get("requiredSecrets") {
                    input_value["requiredSecrets"] = required.clone();
                }

                let input = ProviderInput::parse(&input_value)
                    .map_err(|e| field_errors_shape(vec![e]))?;
                run_apply(&ctx.state, &base_hash, vec![input]).await
            })
        }),
    );

    // mcp.market.uninstall: configured=false apply.
    reg.register(
        "mcp.market.uninstall",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.require_str("baseHash");
                let provider_id = reader.require_str("providerId");
                reader.finish()?;
                let (Some(base_hash), Some(provider_id)) = (base_hash, provider_id) else {
                    return Err(ErrorShape::invalid("missing baseHash or providerId"));
                };

                let input = ProviderInput::parse(&serde_json::json!({
                    "providerId": provider_id,
                    "configured": false,
                }))
                .map_err(|e| field_errors_shape(vec![e]))?;
                run_apply(&ctx.state, &base_hash, vec![input]).await
            })
        }),
    );

    // mcp.market.refresh: re-discover one provider's tools.
    reg.register(
        "mcp.market.refresh",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let base_hash = reader.require_str("baseHash");
                let provider_id = reader.require_str("providerId");
                reader.finish()?;
                let (Some(base_hash), Some(provider_id)) = (base_hash, provider_id) else {
                    return Err(ErrorShape::invalid("missing baseHash or providerId"));
                };

                let input = ProviderInput::parse(&serde_json::json!({
                    "providerId": provider_id,
                    "discoverTools": true,
                }))
                .map_err(|e| field_errors_shape(vec![e]))?;
                run_apply(&ctx.state, &base_hash, vec![input]).await
            })
        }),
    );
}

fn market_client(
    state: &Arc<GatewayState>,
    base_override: Option<String>,
) -> Result<MarketClient, ErrorShape> {
    let configured = state
        .config
        .read_snapshot()
        .ok()
        .and_then(|s| s.config)
        .and_then(|c| c.mcp.registry_base_url);
    MarketClient::new(base_override.or(configured), state.ssrf_guard()).map_err(mcp_error)
}

fn providers_snapshot(state: &Arc<GatewayState>) -> MethodResult {
    let snapshot = state.config.read_snapshot().map_err(config_error)?;
    let rows = snapshot
        .config
        .as_ref()
        .map(|c| provider_rows(c, &state.secrets))
        .unwrap_or_default();
    Ok(serde_json::json!({
        "hash": snapshot.hash,
        "providers": rows,
    }))
}

fn field_errors_shape(errors: Vec<clawgate_mcp::FieldError>) -> ErrorShape {
    ErrorShape::invalid("provider validation failed").with_details(serde_json::json!({
        "fieldErrors": errors,
    }))
}

/// Shared apply tail: run the editor, schedule the restart, and answer with
/// a fresh snapshot.
async fn run_apply(
    state: &Arc<GatewayState>,
    base_hash: &str,
    inputs: Vec<ProviderInput>,
) -> MethodResult {
    let outcome = apply_providers(
        &state.config,
        &state.secrets,
        state.ssrf_guard(),
        base_hash,
        inputs,
    )
    .await
    .map_err(mcp_error)?;

    match outcome {
        ApplyOutcome::FieldErrors(errors) => Err(field_errors_shape(errors)),
        ApplyOutcome::Applied { snapshot } => {
            crate::reload::after_config_write(state, &snapshot).await;
            state
                .restart
                .schedule_self_restart(None, Some("mcp providers apply".into()), None);

            let rows = snapshot
                .config
                .as_ref()
                .map(|c| provider_rows(c, &state.secrets))
                .unwrap_or_default();
            Ok(serde_json::json!({
                "ok": true,
                "hash": snapshot.hash,
                "providers": rows,
                "restartRequired": true,
            }))
        },
    }
}

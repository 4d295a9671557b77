//! Tools handler family: the protocol surface over the fabric.

use {
    clawgate_mcp::{McpHttpClient, resolve_bearer_token},
    clawgate_protocol::{ErrorShape, error_codes, validate::ParamReader},
    clawgate_tools::{ListFilter, ProviderKind, extract_call_args, list_definitions, resolve_call},
    serde_json::Value,
};

use super::{MethodRegistry, mcp_error};

pub(super) fn register(reg: &mut MethodRegistry) {
    // tools.list
    reg.register(
        "tools.list",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let kind = reader.opt_str("providerKind");
                let provider_id = reader.opt_str("providerId");
                let include_builtin = reader.opt_bool("includeBuiltin");
                let provider_ids = reader
                    .opt_array("providerIds")
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                reader.finish()?;

                let provider_kind = match kind.as_deref() {
                    Some("companion") => Some(ProviderKind::Companion),
                    Some("mcp") => Some(ProviderKind::Mcp),
                    Some("builtin") => Some(ProviderKind::Builtin),
                    Some(other) => {
                        return Err(ErrorShape::invalid(format!(
                            "params.providerKind: unknown kind '{other}'"
                        )));
                    },
                    None => None,
                };

                let mut ids = provider_ids;
                if let Some(id) = provider_id {
                    ids.push(id);
                }

                let snapshot = ctx.state.config.read_snapshot().map_err(super::config_error)?;
                let config = snapshot.config.unwrap_or_default();
                let node_actions = ctx.state.nodes.read().await.node_actions();
                let defs = list_definitions(
                    &node_actions,
                    &config,
                    &ctx.state.secrets,
                    &ctx.state.builtins,
                );
                let filtered = ListFilter {
                    provider_kind,
                    provider_ids: ids,
                    include_builtin,
                }
                .apply(defs);

                Ok(serde_json::json!({ "tools": filtered }))
            })
        }),
    );

    // tools.call
    reg.register(
        "tools.call",
        Box::new(|ctx| {
            Box::pin(async move {
                let mut reader = ParamReader::new(&ctx.params);
                let provider_id = reader.require_str("providerId");
                let tool_name = reader.require_str("toolName");
                let timeout_ms = reader.opt_u64_bounded("timeoutMs", 1_000, 600_000);
                reader.finish()?;
                let (Some(provider_id), Some(tool_name)) = (provider_id, tool_name) else {
                    return Err(ErrorShape::invalid("missing providerId or toolName"));
                };
                let args = extract_call_args(&ctx.params);

                let snapshot = ctx.state.config.read_snapshot().map_err(super::config_error)?;
                let config = snapshot.config.unwrap_or_default();
                let node_actions = ctx.state.nodes.read().await.node_actions();
                let defs = list_definitions(
                    &node_actions,
                    &config,
                    &ctx.state.secrets,
                    &ctx.state.builtins,
                );

                let resolution = resolve_call(&defs, &provider_id, &tool_name).map_err(|e| {
                    match e {
                        clawgate_tools::Error::ToolNotFound(name) => ErrorShape::new(
                            error_codes::TOOL_NOT_FOUND,
                            format!("tool not found: {name}"),
                        ),
                        clawgate_tools::Error::InvalidRequest(msg) => ErrorShape::invalid(msg),
                    }
                })?;
                let def = &resolution.definition;

                let result = match def.provider_kind {
                    ProviderKind::Mcp => {
                        let entry = config
                            .mcp
                            .providers
                            .get(&def.provider_id)
                            .ok_or_else(|| {
                                ErrorShape::unavailable("provider no longer configured")
                            })?;
                        let connection = entry.connection.as_ref().ok_or_else(|| {
                            ErrorShape::unavailable("provider has no connection")
                        })?;

                        let mut secrets = std::collections::BTreeMap::new();
                        for (field, r#ref) in &entry.secret_refs {
                            if let Ok(Some(value)) = ctx.state.secrets.get(r#ref) {
                                secrets.insert(field.clone(), value);
                            }
                        }
                        let bearer =
                            resolve_bearer_token(Some(connection.auth_type), &secrets);
                        let client = McpHttpClient::new(
                            connection.deployment_url.clone(),
                            bearer,
                            timeout_ms,
                            ctx.state.ssrf_guard(),
                        )
                        .map_err(mcp_error)?;
                        client
                            .call_tool(&resolution.command, args)
                            .await
                            .map_err(mcp_error)?
                    },
                    ProviderKind::Companion => {
                        let node_id = def.node_id.as_ref().ok_or_else(|| {
                            ErrorShape::invalid("companion tool has no bound node")
                        })?;
                        super::node::invoke_node(
                            &ctx.state,
                            node_id,
                            &resolution.command,
                            args,
                            timeout_ms,
                            None,
                        )
                        .await?
                    },
                    ProviderKind::Builtin => {
                        let outcome = ctx
                            .state
                            .builtins
                            .invoke(&def.provider_id, &def.command, args)
                            .await
                            .ok_or_else(|| {
                                ErrorShape::new(
                                    error_codes::TOOL_NOT_FOUND,
                                    format!("builtin not registered: {}", def.name),
                                )
                            })?;
                        outcome.map_err(ErrorShape::internal)?
                    },
                };

                Ok(serde_json::json!({
                    "ok": true,
                    "providerId": def.provider_id,
                    "toolName": tool_name,
                    "command": resolution.command,
                    "result": result,
                }))
            })
        }),
    );
}

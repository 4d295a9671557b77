//! The fabric itself: materialize, filter, and resolve tool definitions.

use {
    clawgate_config::{GatewayConfig, normalize_provider_id},
    clawgate_secrets::SecretStore,
    serde_json::Value,
};

use crate::{
    Error, Result,
    builtin::BuiltinRegistry,
    definition::{NodeActions, ProviderKind, ToolDefinition},
    schema::reflect_schema,
};

/// Materialize the unified definition list.
///
/// Companion actions come first, then MCP runtime tools (enabled providers
/// with satisfied secrets only), then builtins. Duplicate action ids across
/// nodes are kept as-is; resolution order picks the first match.
pub fn list_definitions(
    nodes: &[NodeActions],
    config: &GatewayConfig,
    secrets: &SecretStore,
    builtins: &BuiltinRegistry,
) -> Vec<ToolDefinition> {
    let mut out = Vec::new();

    for node in nodes {
        for action in &node.actions {
            let provider_id = action
                .params
                .as_ref()
                .and_then(|p| p.get("providerId"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("companion:{}", node.node_id));
            let kind = ProviderKind::infer(&provider_id);
            let label = action
                .label
                .clone()
                .or_else(|| node.node_name.clone())
                .unwrap_or_else(|| node.node_id.clone());
            let input_schema = action
                .params
                .as_ref()
                .map(reflect_schema)
                .unwrap_or_else(|| serde_json::json!({"type": "object"}));

            out.push(ToolDefinition {
                name: format!("{provider_id}.{}", action.command),
                provider_id,
                provider_kind: kind,
                provider_label: label,
                description: action.description.clone(),
                input_schema,
                command: action.command.clone(),
                node_id: Some(node.node_id.clone()),
                node_name: node.node_name.clone(),
            });
        }
    }

    for (provider_id, entry) in &config.mcp.providers {
        if !entry.enabled {
            continue;
        }
        if !clawgate_mcp::secrets_satisfied(entry, secrets) {
            continue;
        }
        let label = entry.label.clone().unwrap_or_else(|| provider_id.clone());
        for tool in &entry.tools {
            out.push(ToolDefinition {
                name: format!("{provider_id}.{}", tool.command),
                provider_id: provider_id.clone(),
                provider_kind: ProviderKind::Mcp,
                provider_label: label.clone(),
                description: tool.description.clone(),
                input_schema: tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                command: tool.command.clone(),
                node_id: None,
                node_name: None,
            });
        }
    }

    out.extend(builtins.definitions());
    out
}

/// Filters for the protocol-level `tools.list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub provider_kind: Option<ProviderKind>,
    pub provider_ids: Vec<String>,
    /// Builtins are included unless explicitly turned off.
    pub include_builtin: Option<bool>,
}

impl ListFilter {
    pub fn apply(&self, defs: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
        defs.into_iter()
            .filter(|def| {
                if let Some(kind) = self.provider_kind {
                    if def.provider_kind != kind {
                        return false;
                    }
                }
                if !self.provider_ids.is_empty() && !self.provider_ids.contains(&def.provider_id) {
                    return false;
                }
                if self.include_builtin == Some(false) && def.provider_kind == ProviderKind::Builtin
                {
                    return false;
                }
                true
            })
            .collect()
    }
}

/// A resolved `tools.call` target.
#[derive(Debug, Clone)]
pub struct CallResolution {
    pub definition: ToolDefinition,
    /// The underlying command after stripping a `<providerId>.` prefix.
    pub command: String,
}

/// Resolve a call target against the definition list.
///
/// Provider ids are normalized (MCP ids gain the `mcp:` prefix, lowercase).
/// A leading `<providerId>.` on the tool name is stripped to get the
/// command. Exact-name matches win over prefix matches; ties break by
/// source order (companion < mcp < builtin), then materialization order.
pub fn resolve_call(
    defs: &[ToolDefinition],
    provider_id_raw: &str,
    tool_name: &str,
) -> Result<CallResolution> {
    let trimmed = provider_id_raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidRequest("providerId is required".into()));
    }
    // Companion/builtin ids pass through; everything else is treated as MCP
    // and normalized.
    let provider_id = if trimmed.contains(':') && !trimmed.starts_with("mcp:") {
        trimmed.to_string()
    } else {
        normalize_provider_id(trimmed)
    };

    let command = tool_name
        .strip_prefix(&format!("{provider_id}."))
        .unwrap_or(tool_name)
        .to_string();
    if command.trim().is_empty() {
        return Err(Error::InvalidRequest("toolName is required".into()));
    }

    let mut best: Option<(bool, u8, usize, &ToolDefinition)> = None;
    for (index, def) in defs.iter().enumerate() {
        if def.provider_id != provider_id {
            continue;
        }
        let exact = def.command == command || def.name == tool_name;
        let prefix = command.starts_with(&format!("{}.", def.command));
        if !exact && !prefix {
            continue;
        }
        let rank = def.provider_kind.source_rank();
        let candidate = (exact, rank, index, def);
        let wins = match &best {
            None => true,
            Some((best_exact, best_rank, best_index, _)) => {
                (candidate.0 && !best_exact)
                    || (candidate.0 == *best_exact
                        && (rank < *best_rank || (rank == *best_rank && index < *best_index)))
            },
        };
        if wins {
            best = Some(candidate);
        }
    }

    match best {
        Some((_, _, _, def)) => Ok(CallResolution {
            definition: def.clone(),
            command,
        }),
        None => Err(Error::ToolNotFound(format!("{provider_id}.{command}"))),
    }
}

/// Pick the call arguments: first non-empty object among `toolArgs`,
/// `params`, `arguments`, else the top-level keys minus control fields.
pub fn extract_call_args(params: &Value) -> Value {
    for key in ["toolArgs", "params", "arguments"] {
        if let Some(Value::Object(map)) = params.get(key) {
            if !map.is_empty() {
                return Value::Object(map.clone());
            }
        }
    }
    const CONTROL: &[&str] = &[
        "providerId",
        "toolName",
        "toolArgs",
        "params",
        "arguments",
        "timeoutMs",
    ];
    match params {
        Value::Object(map) => {
            let rest: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !CONTROL.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(rest)
        },
        _ => Value::Object(Default::default()),
    }
}

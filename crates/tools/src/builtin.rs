//! Builtin tools: process-local command handlers registered at startup.

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use crate::definition::{ProviderKind, ToolDefinition};

/// Boxed async handler for a builtin command.
pub type BuiltinHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>
        + Send
        + Sync,
>;

/// One builtin tool.
#[derive(Clone)]
pub struct BuiltinTool {
    pub provider_id: String,
    pub provider_label: String,
    pub command: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub handler: BuiltinHandler,
}

impl BuiltinTool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: format!("{}.{}", self.provider_id, self.command),
            provider_id: self.provider_id.clone(),
            provider_kind: ProviderKind::Builtin,
            provider_label: self.provider_label.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            command: self.command.clone(),
            node_id: None,
            node_name: None,
        }
    }
}

/// Builtins registered at boot, keyed by `<providerId>.<command>`.
#[derive(Default, Clone)]
pub struct BuiltinRegistry {
    tools: BTreeMap<String, BuiltinTool>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: BuiltinTool) {
        let key = format!("{}.{}", tool.provider_id, tool.command);
        self.tools.insert(key, tool);
    }

    pub fn get(&self, provider_id: &str, command: &str) -> Option<&BuiltinTool> {
        self.tools.get(&format!("{provider_id}.{command}"))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(BuiltinTool::definition).collect()
    }

    pub async fn invoke(
        &self,
        provider_id: &str,
        command: &str,
        args: Value,
    ) -> Option<Result<Value, String>> {
        let tool = self.get(provider_id, command)?;
        Some((tool.handler)(args).await)
    }
}

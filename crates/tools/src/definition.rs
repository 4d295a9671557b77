//! Runtime tool definitions. Derived on every list, never persisted.

use serde::{Deserialize, Serialize};

/// Where a tool comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Companion,
    Mcp,
    Builtin,
}

impl ProviderKind {
    /// Infer the kind from a provider id prefix.
    pub fn infer(provider_id: &str) -> Self {
        if provider_id.starts_with("mcp:") {
            Self::Mcp
        } else if provider_id.starts_with("builtin:") {
            Self::Builtin
        } else {
            Self::Companion
        }
    }

    /// Source order for tie-breaking: companion < mcp < builtin.
    pub fn source_rank(self) -> u8 {
        match self {
            Self::Companion => 0,
            Self::Mcp => 1,
            Self::Builtin => 2,
        }
    }
}

/// A callable tool in the unified fabric.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// `<providerId>.<command>`.
    pub name: String,
    pub provider_id: String,
    pub provider_kind: ProviderKind,
    pub provider_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// An action advertised by a companion node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A connected node and its current action catalog.
#[derive(Debug, Clone)]
pub struct NodeActions {
    pub node_id: String,
    pub node_name: Option<String>,
    pub actions: Vec<NodeAction>,
}

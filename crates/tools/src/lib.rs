//! Tools fabric: one view over companion-node actions, MCP runtime tools,
//! and builtin gateway capabilities.

pub mod builtin;
pub mod definition;
pub mod fabric;
pub mod schema;

pub use {
    builtin::{BuiltinHandler, BuiltinRegistry, BuiltinTool},
    definition::{NodeAction, NodeActions, ProviderKind, ToolDefinition},
    fabric::{CallResolution, ListFilter, extract_call_args, list_definitions, resolve_call},
    schema::reflect_schema,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

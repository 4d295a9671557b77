//! Agent run event bus and chat run registry.
//!
//! Joins sequenced agent-run streams to user-facing chat runs: seq-gap
//! detection, assistant delta throttling, media accumulation, heartbeat
//! suppression, and abort draining. Bus state is process-local; the gateway
//! owns the fanout sinks.

pub mod event;
pub mod state;

pub use {
    event::{AgentEvent, AgentStream, LifecyclePhase},
    state::{AgentEventBus, BusEmit, BusSettings, ChatLink, EmitTarget, RunMeta},
};

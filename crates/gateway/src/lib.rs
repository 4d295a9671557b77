//! The clawgate gateway: WebSocket RPC server, admin pipe, node registry,
//! restart plane, and the handler families wiring the stores together.

pub mod admin;
pub mod auth;
pub mod broadcast;
pub mod builtins;
pub mod dedupe;
pub mod methods;
pub mod nodes;
pub mod reload;
pub mod restart;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    methods::{MethodContext, MethodRegistry},
    state::{ConnectedClient, GatewayState},
};

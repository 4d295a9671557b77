//! Shared types, error definitions, and utilities used across all clawgate crates.

pub mod error;
pub mod slug;
pub mod text;
pub mod time;

pub use error::{ClawgateError, Error, FromMessage, Result};

//! Per-session-key state: entries, the JSON store, and legacy key migration.

pub mod session_key;
pub mod store;

pub use {
    session_key::{SessionKey, sanitize_session_key},
    store::{DeliveryContext, SessionEntry, SessionMap, SessionStore, migrate_legacy_keys},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Structured session keys.
//!
//! Shape: `agent:<agentId>:<channel>:<scope>:<addr>[:thread:<tid>]`.
//! The address segment for node-backed sessions historically embedded the raw
//! node id (`desktop-<nodeId>`); those keys are sanitized to a stable slug of
//! the node's display name.

use clawgate_common::slug::slugify;

/// Parsed view over a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub agent_id: String,
    pub channel: String,
    pub scope: String,
    pub addr: String,
    pub thread_id: Option<String>,
}

impl SessionKey {
    /// Parse a structured key. Returns `None` when the shape doesn't match.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split(':');
        if parts.next()? != "agent" {
            return None;
        }
        let agent_id = parts.next()?.to_string();
        let channel = parts.next()?.to_string();
        let scope = parts.next()?.to_string();
        let addr = parts.next()?.to_string();
        let thread_id = match (parts.next(), parts.next()) {
            (Some("thread"), Some(tid)) => Some(tid.to_string()),
            (None, _) => None,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            agent_id,
            channel,
            scope,
            addr,
            thread_id,
        })
    }

    pub fn format(&self) -> String {
        let mut out = format!(
            "agent:{}:{}:{}:{}",
            self.agent_id, self.channel, self.scope, self.addr
        );
        if let Some(tid) = &self.thread_id {
            out.push_str(":thread:");
            out.push_str(tid);
        }
        out
    }
}

/// Legacy node-address markers, longest first so `desktop-node-` is not
/// shadowed by `desktop-`.
const LEGACY_MARKERS: &[&str] = &["desktop-node-", "desktop-", "node-"];

const NAME_SLUG_LEN: usize = 48;
const ID_SLUG_LEN: usize = 12;

/// Sanitize a legacy node session key.
///
/// Keys whose address segment is `desktop-<nodeId>`, `desktop-node-<nodeId>`,
/// or `node-<nodeId>` are rewritten to the canonical `desktop-<slug>` where
/// `<slug>` is a 48-char slug of the node's display name (looked up through
/// `resolve_display_name`) or a 12-char slug of the node id. Returns `None`
/// when the key is not a legacy node key.
pub fn sanitize_session_key(
    key: &str,
    resolve_display_name: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let parsed = SessionKey::parse(key)?;
    let (marker, node_id) = LEGACY_MARKERS.iter().find_map(|m| {
        parsed
            .addr
            .strip_prefix(m)
            .filter(|rest| !rest.is_empty())
            .map(|rest| (*m, rest))
    })?;

    let display_slug = resolve_display_name(node_id)
        .map(|name| slugify(&name, NAME_SLUG_LEN))
        .filter(|s| !s.is_empty());
    // A plain `desktop-` suffix is also the canonical shape; without a known
    // node id there is no way to tell a raw id from a finished slug, so leave
    // it alone.
    if display_slug.is_none() && marker == "desktop-" {
        return None;
    }
    let slug = display_slug.unwrap_or_else(|| slugify(node_id, ID_SLUG_LEN));
    if slug.is_empty() {
        return None;
    }

    let sanitized_addr = format!("desktop-{slug}");
    if marker == "desktop-" && parsed.addr == sanitized_addr {
        // Already canonical.
        return None;
    }

    let mut out = parsed;
    out.addr = sanitized_addr;
    let formatted = out.format();
    if formatted == key { None } else { Some(formatted) }
}

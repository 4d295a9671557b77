//! Bearer-token resolution for provider HTTP calls.

use std::collections::BTreeMap;

use clawgate_config::AuthType;

/// Secret field names that may carry the bearer token, checked in order.
pub const TOKEN_ALIASES: &[&str] = &["token", "apiKey", "authToken"];

/// Resolve the bearer token for a provider from its resolved secret values.
///
/// With `authType = none` no token is ever sent. Otherwise the first
/// non-empty alias wins; a `Bearer ` prefix pasted into the secret is
/// stripped so the header never doubles up.
pub fn resolve_bearer_token(
    auth_type: Option<AuthType>,
    secrets: &BTreeMap<String, String>,
) -> Option<String> {
    if auth_type == Some(AuthType::None) {
        return None;
    }
    for alias in TOKEN_ALIASES {
        if let Some(raw) = lookup_case_insensitive(secrets, alias) {
            let trimmed = raw.trim();
            let token = trimmed
                .strip_prefix("Bearer ")
                .or_else(|| trimmed.strip_prefix("bearer "))
                .unwrap_or(trimmed);
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn lookup_case_insensitive<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a String> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

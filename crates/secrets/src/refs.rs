//! Secret ref construction and sanitization.
//!
//! Refs are printable ASCII of the shape `mcp:provider:<providerId>:<field>`,
//! all lowercase. The on-disk file name replaces separator and non-ASCII
//! characters with `_`.

/// Build the canonical ref for a provider secret field.
pub fn provider_secret_ref(provider_id: &str, field: &str) -> String {
    format!(
        "mcp:provider:{}:{}",
        provider_id.to_lowercase(),
        field.to_lowercase()
    )
}

/// Sanitize a ref into a file-system-safe name: lowercase, ASCII
/// alphanumerics, `-` and `.` kept, everything else becomes `_`.
pub fn sanitize_ref(r#ref: &str) -> String {
    r#ref
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

//! Connection authentication for the `hello` handshake.

/// True for loopback peers (IPv4 and IPv6 forms).
pub fn is_loopback(remote_ip: &str) -> bool {
    matches!(remote_ip, "127.0.0.1" | "::1" | "localhost")
        || remote_ip.starts_with("127.")
        || remote_ip == "::ffff:127.0.0.1"
}

/// Authorize a `hello`: a configured token must match; with no token
/// configured only loopback peers are accepted.
pub fn authorize_hello(
    configured_token: Option<&str>,
    provided_token: Option<&str>,
    remote_ip: &str,
) -> bool {
    match configured_token {
        Some(expected) => provided_token == Some(expected),
        None => is_loopback(remote_ip),
    }
}

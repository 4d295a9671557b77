//! Schema validation over the parsed config value.
//!
//! Emits `{path, message}` issues; an invalid snapshot never populates the
//! typed tree.

use serde_json::Value;

use crate::snapshot::ConfigIssue;

/// Validate a parsed config value. Empty result means valid.
pub fn validate_value(value: &Value) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    let Some(root) = value.as_object() else {
        issues.push(ConfigIssue::new("", "config root must be an object"));
        return issues;
    };

    if let Some(gateway) = root.get("gateway") {
        if let Some(port) = gateway.get("port") {
            match port.as_u64() {
                Some(p) if (1..=65_535).contains(&p) => {},
                _ => issues.push(ConfigIssue::new("gateway.port", "must be in 1..=65535")),
            }
        }
    }

    if let Some(tools) = root.get("tools") {
        if let Some(v) = tools.get("verbosity").and_then(Value::as_str) {
            if !matches!(v, "on" | "off") {
                issues.push(ConfigIssue::new(
                    "tools.verbosity",
                    "must be \"on\" or \"off\"",
                ));
            }
        }
    }

    if let Some(reload) = root.get("reload") {
        if let Some(mode) = reload.get("mode").and_then(Value::as_str) {
            if !matches!(mode, "hot" | "restart" | "off") {
                issues.push(ConfigIssue::new(
                    "reload.mode",
                    "must be \"hot\", \"restart\", or \"off\"",
                ));
            }
        }
    }

    if let Some(providers) = root
        .get("mcp")
        .and_then(|m| m.get("providers"))
        .and_then(Value::as_object)
    {
        for (id, entry) in providers {
            validate_provider(id, entry, &mut issues);
        }
    }

    issues
}

fn validate_provider(id: &str, entry: &Value, issues: &mut Vec<ConfigIssue>) {
    let base = format!("mcp.providers.{id}");

    if id != id.to_lowercase() {
        issues.push(ConfigIssue::new(&base, "provider id must be lowercase"));
    }
    if !id.starts_with("mcp:") {
        issues.push(ConfigIssue::new(
            &base,
            "provider id must carry the mcp: prefix",
        ));
    }

    let Some(obj) = entry.as_object() else {
        issues.push(ConfigIssue::new(&base, "must be an object"));
        return;
    };

    // A configured provider must name a deployment URL.
    match obj.get("connection") {
        Some(Value::Object(conn)) => {
            match conn.get("deploymentUrl").and_then(Value::as_str) {
                Some(url) if !url.trim().is_empty() => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        issues.push(ConfigIssue::new(
                            format!("{base}.connection.deploymentUrl"),
                            "must be an http(s) URL",
                        ));
                    }
                },
                _ => issues.push(ConfigIssue::new(
                    format!("{base}.connection.deploymentUrl"),
                    "required",
                )),
            }
            if let Some(auth) = conn.get("authType").and_then(Value::as_str) {
                if !matches!(auth, "none" | "bearer") {
                    issues.push(ConfigIssue::new(
                        format!("{base}.connection.authType"),
                        "must be \"none\" or \"bearer\"",
                    ));
                }
            }
        },
        Some(Value::Null) | None => {
            issues.push(ConfigIssue::new(format!("{base}.connection"), "required"));
        },
        Some(_) => {
            issues.push(ConfigIssue::new(
                format!("{base}.connection"),
                "must be an object",
            ));
        },
    }

    if let Some(refs) = obj.get("secretRefs").and_then(Value::as_object) {
        for (field, r#ref) in refs {
            match r#ref.as_str() {
                Some(s) if !s.trim().is_empty() => {},
                _ => issues.push(ConfigIssue::new(
                    format!("{base}.secretRefs.{field}"),
                    "must be a non-empty string",
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_valid() {
        assert!(validate_value(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn port_zero_flagged() {
        let issues = validate_value(&serde_json::json!({"gateway": {"port": 0}}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "gateway.port");
    }

    #[test]
    fn provider_without_connection_flagged() {
        let issues = validate_value(&serde_json::json!({
            "mcp": {"providers": {"mcp:exa": {"enabled": true}}}
        }));
        assert!(issues.iter().any(|i| i.path == "mcp.providers.mcp:exa.connection"));
    }

    #[test]
    fn provider_with_http_connection_ok() {
        let issues = validate_value(&serde_json::json!({
            "mcp": {"providers": {"mcp:exa": {
                "enabled": true,
                "connection": {"type": "http", "deploymentUrl": "https://exa.run.tools"}
            }}}
        }));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn uppercase_provider_id_flagged() {
        let issues = validate_value(&serde_json::json!({
            "mcp": {"providers": {"mcp:Exa": {
                "connection": {"deploymentUrl": "https://x"}
            }}}
        }));
        assert!(issues.iter().any(|i| i.message.contains("lowercase")));
    }

    #[test]
    fn bad_auth_type_flagged() {
        let issues = validate_value(&serde_json::json!({
            "mcp": {"providers": {"mcp:exa": {
                "connection": {"deploymentUrl": "https://x", "authType": "basic"}
            }}}
        }));
        assert!(issues.iter().any(|i| i.path.ends_with("authType")));
    }

    #[test]
    fn bad_reload_mode_flagged() {
        let issues = validate_value(&serde_json::json!({"reload": {"mode": "sometimes"}}));
        assert_eq!(issues[0].path, "reload.mode");
    }
}

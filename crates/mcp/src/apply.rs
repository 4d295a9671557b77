//! Single-pass provider editor with optimistic concurrency and full secret
//! rollback.
//!
//! The apply call edits provider entries in the config tree, writes/deletes
//! their secrets, optionally runs tool discovery, and commits the next config
//! under the caller's `baseHash`. Any field error aborts the whole apply:
//! secret writes are undone and no config file is written.

use std::collections::BTreeMap;

use {
    clawgate_config::{
        CachedTool, ConfigSnapshot, ConfigStore, McpProviderEntry, ProviderConnection,
        ProviderSource, normalize_provider_id,
    },
    clawgate_secrets::{SecretStore, provider_secret_ref},
    serde::Serialize,
    serde_json::Value,
    tracing::{info, warn},
};

use crate::{
    auth::resolve_bearer_token,
    error::{Error, Result},
    http::McpHttpClient,
    ssrf::SsrfGuard,
};

/// A field-level validation failure, reported back to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub provider_id: String,
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(
        provider_id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// One provider edit from the request, already sanitized.
#[derive(Debug, Clone, Default)]
pub struct ProviderInput {
    pub provider_id: String,
    /// `false` uninstalls the provider and deletes its secrets.
    pub configured: bool,
    pub enabled: Option<bool>,
    pub label: Option<String>,
    pub source: Option<ProviderSource>,
    pub qualified_name: Option<String>,
    pub connection: Option<ProviderConnection>,
    pub fields: Option<BTreeMap<String, Value>>,
    pub required_secrets: Option<Vec<String>>,
    pub status_hints: Option<Value>,
    /// Field → value. `None` (JSON null) and empty strings delete.
    pub secret_values: BTreeMap<String, Option<String>>,
    /// Run tool discovery and cache the result on the entry.
    pub discover_tools: bool,
}

impl ProviderInput {
    /// Shared sanitizer for the WebSocket and admin-socket surfaces.
    ///
    /// Whitelisted coercion only: strings are trimmed, unknown connection
    /// fields are dropped, non-scalar `fields` values are rejected.
    pub fn parse(value: &Value) -> std::result::Result<Self, FieldError> {
        let raw_id = value
            .get("providerId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FieldError::new("", "providerId", "required"))?;
        let provider_id = normalize_provider_id(raw_id);

        let configured = value
            .get("configured")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let connection = match value.get("connection") {
            Some(Value::Null) | None => None,
            Some(conn) => {
                let parsed: ProviderConnection = serde_json::from_value(conn.clone())
                    .map_err(|e| FieldError::new(&provider_id, "connection", e.to_string()))?;
                if parsed.deployment_url.trim().is_empty() {
                    return Err(FieldError::new(
                        &provider_id,
                        "connection.deploymentUrl",
                        "required",
                    ));
                }
                Some(parsed)
            },
        };

        let fields = match value.get("fields") {
            Some(Value::Object(map)) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    match v {
                        Value::String(s) => {
                            out.insert(k.clone(), Value::String(s.trim().to_string()));
                        },
                        Value::Number(_) | Value::Bool(_) => {
                            out.insert(k.clone(), v.clone());
                        },
                        Value::Null => {},
                        _ => {
                            return Err(FieldError::new(
                                &provider_id,
                                format!("fields.{k}"),
                                "must be a scalar",
                            ));
                        },
                    }
                }
                Some(out)
            },
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(FieldError::new(&provider_id, "fields", "must be an object"));
            },
        };

        let mut secret_values = BTreeMap::new();
        if let Some(Value::Object(map)) = value.get("secretValues") {
            for (k, v) in map {
                match v {
                    Value::Null => {
                        secret_values.insert(k.clone(), None);
                    },
                    Value::String(s) => {
                        secret_values.insert(k.clone(), Some(s.clone()));
                    },
                    _ => {
                        return Err(FieldError::new(
                            &provider_id,
                            format!("secretValues.{k}"),
                            "must be a string or null",
                        ));
                    },
                }
            }
        }

        let required_secrets = value
            .get("requiredSecrets")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Ok(Self {
            provider_id,
            configured,
            enabled: value.get("enabled").and_then(Value::as_bool),
            label: value
                .get("label")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            source: value
                .get("source")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            qualified_name: value
                .get("qualifiedName")
                .and_then(Value::as_str)
                .map(str::to_string),
            connection,
            fields,
            required_secrets,
            status_hints: value.get("statusHints").cloned().filter(|v| !v.is_null()),
            secret_values,
            discover_tools: value
                .get("discoverTools")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// What an apply produced.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Config written; the caller schedules a restart and reports the snapshot.
    Applied { snapshot: ConfigSnapshot },
    /// Aborted atomically; secrets rolled back, config untouched.
    FieldErrors(Vec<FieldError>),
}

/// Undo journal entry for one secret write: the ref and its previous value.
struct SecretUndo {
    r#ref: String,
    previous: Option<String>,
}

fn rollback(secret_store: &SecretStore, undo: &[SecretUndo]) {
    for entry in undo.iter().rev() {
        let result = match &entry.previous {
            Some(value) => secret_store.set(&entry.r#ref, value),
            None => secret_store.delete(&entry.r#ref),
        };
        if let Err(e) = result {
            warn!(r#ref = %entry.r#ref, error = %e, "secret rollback failed");
        }
    }
}

/// Apply provider edits under `base_hash`.
///
/// Stale hashes and I/O failures return `Err`; per-provider validation
/// problems return `Ok(ApplyOutcome::FieldErrors)` after rolling back every
/// secret written by this call.
pub async fn apply_providers(
    config_store: &ConfigStore,
    secret_store: &SecretStore,
    guard: SsrfGuard,
    base_hash: &str,
    inputs: Vec<ProviderInput>,
) -> Result<ApplyOutcome> {
    let snapshot = config_store.read_snapshot()?;
    if snapshot.exists && snapshot.hash != base_hash {
        return Err(Error::Config(clawgate_config::Error::StaleHash {
            expected: snapshot.hash,
            got: base_hash.to_string(),
        }));
    }

    let mut root = snapshot.value();
    if !root.is_object() {
        root = Value::Object(Default::default());
    }

    let now = clawgate_common::time::now_ms();
    let mut undo: Vec<SecretUndo> = Vec::new();
    let mut field_errors: Vec<FieldError> = Vec::new();

    for input in inputs {
        let id = input.provider_id.clone();
        let existing: Option<McpProviderEntry> = providers_map(&root)
            .get(&id)
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        if !input.configured {
            // Uninstall: delete every referenced secret, then drop the entry.
            if let Some(entry) = &existing {
                for r#ref in entry.secret_refs.values() {
                    if let Err(e) = record_and_delete(secret_store, r#ref, &mut undo) {
                        field_errors.push(FieldError::new(&id, "secretValues", e.to_string()));
                        break;
                    }
                }
            }
            providers_map_mut(&mut root).remove(&id);
            continue;
        }

        // Merge with the previous entry.
        let mut entry = existing.clone().unwrap_or_default();
        entry.enabled = input.enabled.unwrap_or(existing.as_ref().map(|e| e.enabled).unwrap_or(true));
        if input.label.is_some() {
            entry.label = input.label.clone();
        }
        if input.source.is_some() {
            entry.source = input.source;
        }
        if input.qualified_name.is_some() {
            entry.qualified_name = input.qualified_name.clone();
        }
        if let Some(conn) = input.connection.clone() {
            entry.connection = Some(conn);
        }
        if let Some(fields) = input.fields.clone() {
            entry.fields = fields;
        }
        if let Some(required) = input.required_secrets.clone() {
            entry.required_secrets = required;
        }
        if input.status_hints.is_some() {
            entry.status_hints = input.status_hints.clone();
        }
        entry.updated_at = now;
        entry.installed_at = match existing.as_ref().map(|e| e.installed_at) {
            Some(prior) if prior > 0 => prior.min(now),
            _ => now,
        };

        if entry
            .connection
            .as_ref()
            .is_none_or(|c| c.deployment_url.trim().is_empty())
        {
            field_errors.push(FieldError::new(&id, "connection.deploymentUrl", "required"));
            continue;
        }

        // Apply secret values, journaling for rollback.
        let mut secrets_failed = false;
        for (field, value) in &input.secret_values {
            let r#ref = provider_secret_ref(&id, field);
            let result = match value.as_deref().map(str::trim) {
                None | Some("") => {
                    entry.secret_refs.remove(field);
                    record_and_delete(secret_store, &r#ref, &mut undo)
                },
                Some(v) => {
                    entry.secret_refs.insert(field.clone(), r#ref.clone());
                    record_and_set(secret_store, &r#ref, v, &mut undo)
                },
            };
            if let Err(e) = result {
                field_errors.push(FieldError::new(
                    &id,
                    format!("secretValues.{field}"),
                    e.to_string(),
                ));
                secrets_failed = true;
                break;
            }
        }
        if secrets_failed {
            continue;
        }

        // Tool discovery against the edited entry.
        if input.discover_tools {
            match discover(secret_store, guard, &entry).await {
                Ok(tools) => entry.tools = tools,
                Err(e) => {
                    let message = e.to_string();
                    field_errors.push(FieldError::new(
                        &id,
                        "connection.deploymentUrl",
                        clawgate_common::text::truncate_utf8(&message, 500),
                    ));
                    continue;
                },
            }
        }

        let serialized = serde_json::to_value(&entry)?;
        providers_map_mut(&mut root).insert(id, serialized);
    }

    if !field_errors.is_empty() {
        rollback(secret_store, &undo);
        return Ok(ApplyOutcome::FieldErrors(field_errors));
    }

    let write_hash = if snapshot.exists {
        Some(base_hash)
    } else {
        None
    };
    match config_store.write(&root, write_hash) {
        Ok(next) => {
            info!(hash = %next.hash, "provider apply committed");
            Ok(ApplyOutcome::Applied { snapshot: next })
        },
        Err(e) => {
            rollback(secret_store, &undo);
            Err(e.into())
        },
    }
}

fn record_and_set(
    store: &SecretStore,
    r#ref: &str,
    value: &str,
    undo: &mut Vec<SecretUndo>,
) -> clawgate_secrets::Result<()> {
    let previous = store.get(r#ref)?;
    store.set(r#ref, value)?;
    undo.push(SecretUndo {
        r#ref: r#ref.to_string(),
        previous,
    });
    Ok(())
}

fn record_and_delete(
    store: &SecretStore,
    r#ref: &str,
    undo: &mut Vec<SecretUndo>,
) -> clawgate_secrets::Result<()> {
    let previous = store.get(r#ref)?;
    store.delete(r#ref)?;
    undo.push(SecretUndo {
        r#ref: r#ref.to_string(),
        previous,
    });
    Ok(())
}

async fn discover(
    secret_store: &SecretStore,
    guard: SsrfGuard,
    entry: &McpProviderEntry,
) -> Result<Vec<CachedTool>> {
    let connection = entry
        .connection
        .as_ref()
        .ok_or_else(|| Error::Protocol("provider has no connection".into()))?;

    let mut secrets = BTreeMap::new();
    for (field, r#ref) in &entry.secret_refs {
        if let Some(value) = secret_store.get(r#ref)? {
            secrets.insert(field.clone(), value);
        }
    }
    let bearer = resolve_bearer_token(Some(connection.auth_type), &secrets);

    let client = McpHttpClient::new(connection.deployment_url.clone(), bearer, None, guard)?;
    let tools = client.list_tools().await?;
    Ok(tools
        .into_iter()
        .map(|t| CachedTool {
            command: t.name.clone(),
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        })
        .collect())
}

fn providers_map(root: &Value) -> BTreeMap<String, Value> {
    root.get("mcp")
        .and_then(|m| m.get("providers"))
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Coerce a value into a JSON object in place and return the map.
fn ensure_object(value: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Default::default());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("coerced to object above"),
    }
}

fn providers_map_mut(root: &mut Value) -> &mut serde_json::Map<String, Value> {
    let obj = ensure_object(root);
    let mcp = obj
        .entry("mcp")
        .or_insert_with(|| Value::Object(Default::default()));
    let providers = ensure_object(mcp)
        .entry("providers")
        .or_insert_with(|| Value::Object(Default::default()));
    ensure_object(providers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Fixture {
        config: ConfigStore,
        secrets: SecretStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            config: ConfigStore::new(dir.path().join("clawgate.json")),
            secrets: SecretStore::new(dir.path().join("secrets")),
            _dir: dir,
        }
    }

    fn guard() -> SsrfGuard {
        SsrfGuard::new(true)
    }

    fn exa_input(secret: &str) -> ProviderInput {
        ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:exa",
            "enabled": true,
            "label": "Exa",
            "connection": {"type": "http", "deploymentUrl": "https://exa.run.tools"},
            "secretValues": {"token": secret},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn install_writes_secret_and_entry() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;

        let outcome = apply_providers(&fx.config, &fx.secrets, guard(), &base, vec![exa_input("t")])
            .await
            .unwrap();
        let snapshot = match outcome {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected field errors: {errs:?}"),
        };

        assert_eq!(
            fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().as_deref(),
            Some("t")
        );
        let config = snapshot.config.unwrap();
        let entry = &config.mcp.providers["mcp:exa"];
        assert!(entry.enabled);
        assert_eq!(
            entry.connection.as_ref().unwrap().deployment_url,
            "https://exa.run.tools"
        );
        assert_eq!(
            entry.secret_refs["token"],
            "mcp:provider:mcp:exa:token"
        );
        assert!(entry.installed_at > 0);
    }

    #[tokio::test]
    async fn stale_hash_leaves_everything_untouched() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;
        apply_providers(&fx.config, &fx.secrets, guard(), &base, vec![exa_input("t")])
            .await
            .unwrap();

        // Second apply with the original (now stale) hash.
        let err = apply_providers(
            &fx.config,
            &fx.secrets,
            guard(),
            &base,
            vec![exa_input("hijacked")],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(clawgate_config::Error::StaleHash { .. })
        ));
        assert_eq!(
            fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().as_deref(),
            Some("t")
        );
    }

    #[tokio::test]
    async fn field_error_rolls_back_secret_writes() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;

        // First provider is fine; second is missing its deployment URL, so
        // the whole apply must abort and the first secret write must be
        // undone.
        let bad = ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:bad",
            "secretValues": {"token": "x"},
        }))
        .unwrap();
        let outcome = apply_providers(
            &fx.config,
            &fx.secrets,
            guard(),
            &base,
            vec![exa_input("t"), bad],
        )
        .await
        .unwrap();

        let errs = match outcome {
            ApplyOutcome::FieldErrors(errs) => errs,
            ApplyOutcome::Applied { .. } => panic!("apply should have aborted"),
        };
        assert_eq!(errs[0].provider_id, "mcp:bad");
        assert_eq!(errs[0].field, "connection.deploymentUrl");

        // Rolled back: no secrets, no config file.
        assert!(fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().is_none());
        assert!(!fx.config.read_snapshot().unwrap().exists);
    }

    #[tokio::test]
    async fn rollback_restores_previous_secret_value() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;
        let snap = match apply_providers(&fx.config, &fx.secrets, guard(), &base, vec![exa_input("old")])
            .await
            .unwrap()
        {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected: {errs:?}"),
        };

        let bad = ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:bad",
            "secretValues": {"token": "x"},
        }))
        .unwrap();
        let outcome = apply_providers(
            &fx.config,
            &fx.secrets,
            guard(),
            &snap.hash,
            vec![exa_input("new"), bad],
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ApplyOutcome::FieldErrors(_)));

        // The overwrite was undone; the pre-apply value is observable again.
        assert_eq!(
            fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().as_deref(),
            Some("old")
        );
    }

    #[tokio::test]
    async fn uninstall_deletes_all_referenced_secrets() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;
        let snap = match apply_providers(&fx.config, &fx.secrets, guard(), &base, vec![exa_input("t")])
            .await
            .unwrap()
        {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected: {errs:?}"),
        };

        let uninstall = ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:exa",
            "configured": false,
        }))
        .unwrap();
        let snap = match apply_providers(&fx.config, &fx.secrets, guard(), &snap.hash, vec![uninstall])
            .await
            .unwrap()
        {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected: {errs:?}"),
        };

        assert!(fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().is_none());
        assert!(snap.config.unwrap().mcp.providers.is_empty());
    }

    #[tokio::test]
    async fn null_secret_value_deletes() {
        let fx = fixture();
        let base = fx.config.read_snapshot().unwrap().hash;
        let snap = match apply_providers(&fx.config, &fx.secrets, guard(), &base, vec![exa_input("t")])
            .await
            .unwrap()
        {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected: {errs:?}"),
        };

        let clear = ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:exa",
            "connection": {"deploymentUrl": "https://exa.run.tools"},
            "secretValues": {"token": null},
        }))
        .unwrap();
        let snap = match apply_providers(&fx.config, &fx.secrets, guard(), &snap.hash, vec![clear])
            .await
            .unwrap()
        {
            ApplyOutcome::Applied { snapshot } => snapshot,
            ApplyOutcome::FieldErrors(errs) => panic!("unexpected: {errs:?}"),
        };

        assert!(fx.secrets.get("mcp:provider:mcp:exa:token").unwrap().is_none());
        let config = snap.config.unwrap();
        assert!(config.mcp.providers["mcp:exa"].secret_refs.is_empty());
    }

    #[test]
    fn parse_requires_provider_id() {
        let err = ProviderInput::parse(&serde_json::json!({"enabled": true})).unwrap_err();
        assert_eq!(err.field, "providerId");
    }

    #[test]
    fn parse_normalizes_provider_id() {
        let input = ProviderInput::parse(&serde_json::json!({"providerId": "Exa"})).unwrap();
        assert_eq!(input.provider_id, "mcp:exa");
    }

    #[test]
    fn parse_rejects_non_scalar_fields() {
        let err = ProviderInput::parse(&serde_json::json!({
            "providerId": "mcp:exa",
            "fields": {"nested": {"a": 1}},
        }))
        .unwrap_err();
        assert_eq!(err.field, "fields.nested");
    }
}

//! OAuth handler family: device-code and PKCE ceremonies per provider.

use std::sync::Arc;

use {
    clawgate_oauth::{FlowOutcome, provider_by_alias},
    clawgate_protocol::{ErrorShape, validate::ParamReader},
    tracing::warn,
};

use {
    super::{MethodContext, MethodRegistry, MethodResult},
    crate::{broadcast, state::GatewayState},
};

const ALIASES: &[&str] = &["qwen", "anthropic"];

pub(super) fn register(reg: &mut MethodRegistry) {
    for alias in ALIASES.iter().copied() {
        reg.register(
            format!("oauth.{alias}.start"),
            Box::new(move |ctx| Box::pin(start(ctx, alias))),
        );
        reg.register(
            format!("oauth.{alias}.poll"),
            Box::new(move |ctx| Box::pin(poll(ctx, alias))),
        );
        reg.register(
            format!("oauth.{alias}.complete"),
            Box::new(move |ctx| Box::pin(complete(ctx, alias))),
        );
    }
}

async fn start(ctx: MethodContext, alias: &str) -> MethodResult {
    let provider = provider_by_alias(alias)
        .ok_or_else(|| ErrorShape::invalid(format!("unknown oauth provider: {alias}")))?;
    let mut reader = ParamReader::new(&ctx.params);
    let base_url = reader.opt_str("baseUrl");
    let redirect_uri = reader.opt_str("redirectUri");
    reader.finish()?;

    // A redirect URI selects the PKCE callback ceremony; otherwise run the
    // device-code flow.
    if let Some(redirect) = redirect_uri {
        let started = ctx
            .state
            .flows
            .start_pkce(provider, base_url.as_deref(), &redirect);
        return Ok(serde_json::json!({
            "state": started.state,
            "authorizeUrl": started.authorize_url,
            "expiresAtMs": started.expires_at_ms,
        }));
    }

    let started = ctx
        .state
        .flows
        .start_device(provider, base_url.as_deref())
        .await
        .map_err(|e| ErrorShape::unavailable(e.to_string()))?;
    Ok(serde_json::json!({
        "state": started.state,
        "verificationUrl": started.verification_url,
        "userCode": started.user_code,
        "intervalMs": started.interval_ms,
        "expiresAtMs": started.expires_at_ms,
    }))
}

async fn poll(ctx: MethodContext, alias: &str) -> MethodResult {
    let provider = provider_by_alias(alias)
        .ok_or_else(|| ErrorShape::invalid(format!("unknown oauth provider: {alias}")))?;
    let mut reader = ParamReader::new(&ctx.params);
    let state_token = reader.require_str("state");
    reader.finish()?;
    let Some(state_token) = state_token else {
        return Err(ErrorShape::invalid("missing state"));
    };

    let outcome = ctx.state.flows.poll(&state_token).await;
    finish_outcome(&ctx.state, provider.id, outcome).await
}

async fn complete(ctx: MethodContext, alias: &str) -> MethodResult {
    let provider = provider_by_alias(alias)
        .ok_or_else(|| ErrorShape::invalid(format!("unknown oauth provider: {alias}")))?;
    let mut reader = ParamReader::new(&ctx.params);
    let state_token = reader.require_str("state");
    let code = reader.require_str("code");
    reader.finish()?;
    let (Some(state_token), Some(code)) = (state_token, code) else {
        return Err(ErrorShape::invalid("missing state or code"));
    };

    let outcome = ctx.state.flows.complete(&state_token, &code).await;
    finish_outcome(&ctx.state, provider.id, outcome).await
}

/// Map a flow outcome to the wire shape, persisting tokens on success.
async fn finish_outcome(
    state: &Arc<GatewayState>,
    provider_id: &str,
    outcome: FlowOutcome,
) -> MethodResult {
    match outcome {
        FlowOutcome::Pending => Ok(serde_json::json!({"status": "pending"})),
        FlowOutcome::InvalidState => Err(ErrorShape::invalid("invalid_state")),
        FlowOutcome::Expired => Err(ErrorShape::invalid("expired")),
        FlowOutcome::Failed { error } => Ok(serde_json::json!({
            "status": "error",
            "error": error,
        })),
        FlowOutcome::Success(tokens) => {
            let profile_id = state
                .profiles
                .store_tokens(provider_id, &tokens)
                .map_err(|e| ErrorShape::internal(e.to_string()))?;

            if let Err(e) = reference_profile(state, provider_id, &profile_id) {
                // Token persistence succeeded; a config race is recoverable.
                warn!(provider = provider_id, error = %e, "failed to reference auth profile in config");
            }

            broadcast::broadcast(
                state,
                "oauth.updated",
                serde_json::json!({"provider": provider_id, "ok": true}),
                broadcast::BroadcastOpts::default(),
            )
            .await;

            Ok(serde_json::json!({
                "status": "success",
                "profileId": profile_id,
            }))
        },
    }
}

/// Point `auth.profiles.<provider>` at the stored profile.
fn reference_profile(
    state: &Arc<GatewayState>,
    provider_id: &str,
    profile_id: &str,
) -> Result<(), clawgate_config::Error> {
    let snapshot = state.config.read_snapshot()?;
    let mut value = snapshot.value();
    if !value.is_object() {
        value = serde_json::Value::Object(Default::default());
    }
    let auth = value
        .as_object_mut()
        .map(|o| {
            o.entry("auth")
                .or_insert(serde_json::json!({}))
        })
        .and_then(|a| a.as_object_mut());
    if let Some(auth) = auth {
        let profiles = auth
            .entry("profiles")
            .or_insert(serde_json::json!({}));
        if let Some(map) = profiles.as_object_mut() {
            map.insert(provider_id.to_string(), serde_json::json!(profile_id));
        }
    }
    let base = snapshot.exists.then_some(snapshot.hash.as_str());
    state.config.write(&value, base)?;
    Ok(())
}

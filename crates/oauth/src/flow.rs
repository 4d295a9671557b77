//! State-bounded flow sessions: start/poll for device code, with optional
//! PKCE material.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {secrecy::Secret, tracing::{debug, info, warn}};

use crate::{
    Error, Result,
    pkce::PkcePair,
    providers::ProviderEndpoints,
    types::{DeviceCodeResponse, OAuthTokens, TokenPollResponse},
};

/// Everything a UI needs to drive the user through the ceremony.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedFlow {
    pub state: String,
    pub verification_url: String,
    pub user_code: String,
    pub interval_ms: u64,
    pub expires_at_ms: u64,
}

/// Result of one poll.
pub enum FlowOutcome {
    Pending,
    Success(OAuthTokens),
    Failed { error: String },
    InvalidState,
    Expired,
}

/// A PKCE flow waiting for its callback.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPkce {
    pub state: String,
    pub authorize_url: String,
    pub expires_at_ms: u64,
}

struct FlowSession {
    provider_id: String,
    base_url: String,
    client_id: String,
    token_path: String,
    /// Present for device flows; PKCE callback flows exchange a code instead.
    device_code: Option<String>,
    verifier: Option<String>,
    redirect_uri: Option<String>,
    expires_at_ms: u64,
}

/// In-memory registry of in-flight flows keyed by `state`.
pub struct FlowRegistry {
    http: reqwest::Client,
    sessions: Mutex<HashMap<String, FlowSession>>,
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowRegistry {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FlowSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Kick off a device-code flow. Returns the state token the client must
    /// present on every poll.
    pub async fn start_device(
        &self,
        provider: &ProviderEndpoints,
        base_override: Option<&str>,
    ) -> Result<StartedFlow> {
        let base = base_override.unwrap_or(provider.default_base).trim_end_matches('/');
        let url = format!("{base}{}", provider.device_auth_path);

        let pkce = provider.uses_pkce.then(PkcePair::generate);
        let mut form: Vec<(&str, String)> = vec![("client_id", provider.client_id.to_string())];
        if let Some(pair) = &pkce {
            form.push(("code_challenge", pair.challenge.clone()));
            form.push(("code_challenge_method", "S256".to_string()));
        }

        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("device code request failed: {body}")));
        }
        let device: DeviceCodeResponse = resp.json().await?;

        let state = uuid::Uuid::new_v4().to_string();
        let now = clawgate_common::time::now_ms();
        let expires_at_ms = now + device.expires_in * 1_000;
        let started = StartedFlow {
            state: state.clone(),
            verification_url: device
                .verification_uri_complete
                .clone()
                .unwrap_or_else(|| device.verification_uri.clone()),
            user_code: device.user_code.clone(),
            interval_ms: device.interval * 1_000,
            expires_at_ms,
        };

        info!(provider = provider.id, "oauth device flow started");
        self.lock().insert(state, FlowSession {
            provider_id: provider.id.to_string(),
            base_url: base.to_string(),
            client_id: provider.client_id.to_string(),
            token_path: provider.token_path.to_string(),
            device_code: Some(device.device_code),
            verifier: pkce.map(|p| p.verifier),
            redirect_uri: None,
            expires_at_ms,
        });
        Ok(started)
    }

    /// Start a PKCE callback flow: build the authorize URL and hold the
    /// verifier until `complete` is called with the code.
    pub fn start_pkce(
        &self,
        provider: &ProviderEndpoints,
        base_override: Option<&str>,
        redirect_uri: &str,
    ) -> StartedPkce {
        let base = base_override.unwrap_or(provider.default_base).trim_end_matches('/');
        let pair = PkcePair::generate();
        let state = uuid::Uuid::new_v4().to_string();
        let expires_at_ms = clawgate_common::time::now_ms() + 900_000;

        let authorize_url = format!(
            "{base}{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            provider.device_auth_path, provider.client_id, redirect_uri, state, pair.challenge,
        );

        info!(provider = provider.id, "oauth pkce flow started");
        self.lock().insert(state.clone(), FlowSession {
            provider_id: provider.id.to_string(),
            base_url: base.to_string(),
            client_id: provider.client_id.to_string(),
            token_path: provider.token_path.to_string(),
            device_code: None,
            verifier: Some(pair.verifier),
            redirect_uri: Some(redirect_uri.to_string()),
            expires_at_ms,
        });
        StartedPkce {
            state,
            authorize_url,
            expires_at_ms,
        }
    }

    /// Exchange a PKCE callback code for tokens. Terminal in every case but
    /// transport failure.
    pub async fn complete(&self, state: &str, code: &str) -> FlowOutcome {
        let (url, form, provider_id) = {
            let mut sessions = self.lock();
            let Some(session) = sessions.get(state) else {
                return FlowOutcome::InvalidState;
            };
            if clawgate_common::time::now_ms() >= session.expires_at_ms {
                sessions.remove(state);
                return FlowOutcome::Expired;
            }
            let mut form: Vec<(&str, String)> = vec![
                ("client_id", session.client_id.clone()),
                ("code", code.to_string()),
                ("grant_type", "authorization_code".to_string()),
            ];
            if let Some(verifier) = &session.verifier {
                form.push(("code_verifier", verifier.clone()));
            }
            if let Some(redirect) = &session.redirect_uri {
                form.push(("redirect_uri", redirect.clone()));
            }
            (
                format!("{}{}", session.base_url, session.token_path),
                form,
                session.provider_id.clone(),
            )
        };

        let resp = match self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %provider_id, error = %e, "oauth complete transport error");
                return FlowOutcome::Failed {
                    error: e.to_string(),
                };
            },
        };

        let body: TokenPollResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                self.lock().remove(state);
                return FlowOutcome::Failed {
                    error: format!("malformed token response: {e}"),
                };
            },
        };

        if let Some(token) = body.access_token {
            self.lock().remove(state);
            let expires_at = body
                .expires_in
                .map(|secs| clawgate_common::time::now_ms() / 1_000 + secs);
            info!(provider = %provider_id, "oauth pkce flow completed");
            return FlowOutcome::Success(OAuthTokens {
                access_token: Secret::new(token),
                refresh_token: body.refresh_token.map(Secret::new),
                expires_at,
            });
        }

        self.lock().remove(state);
        FlowOutcome::Failed {
            error: body
                .error
                .unwrap_or_else(|| "unexpected response from token endpoint".to_string()),
        }
    }

    /// One poll of the token endpoint. Unknown states and expired sessions
    /// are terminal; transport failures keep the session alive for a retry.
    pub async fn poll(&self, state: &str) -> FlowOutcome {
        let (url, form, provider_id) = {
            let mut sessions = self.lock();
            let Some(session) = sessions.get(state) else {
                return FlowOutcome::InvalidState;
            };
            if clawgate_common::time::now_ms() >= session.expires_at_ms {
                sessions.remove(state);
                return FlowOutcome::Expired;
            }
            let Some(device_code) = session.device_code.clone() else {
                return FlowOutcome::Failed {
                    error: "not a device flow; use complete".to_string(),
                };
            };
            let mut form: Vec<(&str, String)> = vec![
                ("client_id", session.client_id.clone()),
                ("device_code", device_code),
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:device_code".to_string(),
                ),
            ];
            if let Some(verifier) = &session.verifier {
                form.push(("code_verifier", verifier.clone()));
            }
            (
                format!("{}{}", session.base_url, session.token_path),
                form,
                session.provider_id.clone(),
            )
        };

        let resp = match self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %provider_id, error = %e, "oauth poll transport error");
                return FlowOutcome::Failed {
                    error: e.to_string(),
                };
            },
        };

        let body: TokenPollResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                return FlowOutcome::Failed {
                    error: format!("malformed token response: {e}"),
                };
            },
        };

        if let Some(token) = body.access_token {
            self.lock().remove(state);
            let expires_at = body.expires_in.map(|secs| {
                clawgate_common::time::now_ms() / 1_000 + secs
            });
            info!(provider = %provider_id, "oauth device flow completed");
            return FlowOutcome::Success(OAuthTokens {
                access_token: Secret::new(token),
                refresh_token: body.refresh_token.map(Secret::new),
                expires_at,
            });
        }

        match body.error.as_deref() {
            Some("authorization_pending") | Some("slow_down") => {
                debug!(provider = %provider_id, "oauth poll pending");
                FlowOutcome::Pending
            },
            Some(err) => {
                self.lock().remove(state);
                FlowOutcome::Failed {
                    error: err.to_string(),
                }
            },
            None => FlowOutcome::Failed {
                error: "unexpected response from token endpoint".to_string(),
            },
        }
    }

    /// Provider id owning a state, for event payloads.
    pub fn provider_of(&self, state: &str) -> Option<String> {
        self.lock().get(state).map(|s| s.provider_id.clone())
    }

    /// Drop a session (completed flows erase their state).
    pub fn remove(&self, state: &str) {
        self.lock().remove(state);
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        axum::{Router, routing::post},
        secrecy::ExposeSecret,
    };

    use {super::*, crate::providers::QWEN_PORTAL};

    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn device_app(token_responses: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/api/v1/oauth2/device/code",
                post(|body: String| async move {
                    // PKCE challenge must be on the request.
                    assert!(body.contains("code_challenge="));
                    axum::Json(serde_json::json!({
                        "device_code": "dc_1",
                        "user_code": "WXYZ-0042",
                        "verification_uri": "https://chat.qwen.ai/device",
                        "interval": 1,
                        "expires_in": 600
                    }))
                }),
            )
            .route(
                "/api/v1/oauth2/token",
                post(move |body: String| {
                    let count = Arc::clone(&token_responses);
                    async move {
                        assert!(body.contains("code_verifier="));
                        let n = count.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            axum::Json(serde_json::json!({"error": "authorization_pending"}))
                        } else {
                            axum::Json(serde_json::json!({
                                "access_token": "at_1",
                                "refresh_token": "rt_1",
                                "expires_in": 3600
                            }))
                        }
                    }
                }),
            )
    }

    #[tokio::test]
    async fn start_returns_state_and_urls() {
        let base = start_mock(device_app(Arc::new(AtomicUsize::new(0)))).await;
        let reg = FlowRegistry::new();
        let started = reg.start_device(&QWEN_PORTAL, Some(&base)).await.unwrap();
        assert!(!started.state.is_empty());
        assert_eq!(started.user_code, "WXYZ-0042");
        assert_eq!(started.interval_ms, 1_000);
        assert!(started.expires_at_ms > clawgate_common::time::now_ms());
        assert_eq!(reg.session_count(), 1);
    }

    #[tokio::test]
    async fn poll_pending_then_success_erases_session() {
        let base = start_mock(device_app(Arc::new(AtomicUsize::new(0)))).await;
        let reg = FlowRegistry::new();
        let started = reg.start_device(&QWEN_PORTAL, Some(&base)).await.unwrap();

        assert!(matches!(reg.poll(&started.state).await, FlowOutcome::Pending));
        match reg.poll(&started.state).await {
            FlowOutcome::Success(tokens) => {
                assert_eq!(tokens.access_token.expose_secret(), "at_1");
                assert!(tokens.expires_at.is_some());
            },
            _ => panic!("expected success"),
        }
        assert_eq!(reg.session_count(), 0);
    }

    #[tokio::test]
    async fn unknown_state_is_invalid() {
        let reg = FlowRegistry::new();
        assert!(matches!(reg.poll("nope").await, FlowOutcome::InvalidState));
    }

    #[tokio::test]
    async fn denied_flow_fails_and_erases() {
        let app = Router::new()
            .route(
                "/api/v1/oauth2/device/code",
                post(|| async {
                    axum::Json(serde_json::json!({
                        "device_code": "dc", "user_code": "C",
                        "verification_uri": "https://x", "interval": 1
                    }))
                }),
            )
            .route(
                "/api/v1/oauth2/token",
                post(|| async { axum::Json(serde_json::json!({"error": "access_denied"})) }),
            );
        let base = start_mock(app).await;
        let reg = FlowRegistry::new();
        let started = reg.start_device(&QWEN_PORTAL, Some(&base)).await.unwrap();
        match reg.poll(&started.state).await {
            FlowOutcome::Failed { error } => assert_eq!(error, "access_denied"),
            _ => panic!("expected failure"),
        }
        assert_eq!(reg.session_count(), 0);
    }

    #[tokio::test]
    async fn pkce_start_and_complete() {
        let app = Router::new().route(
            "/api/v1/oauth2/token",
            post(|body: String| async move {
                assert!(body.contains("grant_type=authorization_code"));
                assert!(body.contains("code_verifier="));
                assert!(body.contains("code=cb_code"));
                axum::Json(serde_json::json!({"access_token": "at_pkce"}))
            }),
        );
        let base = start_mock(app).await;
        let reg = FlowRegistry::new();
        let started = reg.start_pkce(&QWEN_PORTAL, Some(&base), "http://127.0.0.1:0/cb");
        assert!(started.authorize_url.contains("code_challenge="));
        assert!(started.authorize_url.contains(&started.state));

        match reg.complete(&started.state, "cb_code").await {
            FlowOutcome::Success(tokens) => {
                assert_eq!(tokens.access_token.expose_secret(), "at_pkce");
            },
            _ => panic!("expected success"),
        }
        assert_eq!(reg.session_count(), 0);
    }

    #[tokio::test]
    async fn poll_rejects_pkce_sessions() {
        let reg = FlowRegistry::new();
        let started = reg.start_pkce(&QWEN_PORTAL, Some("http://127.0.0.1:1"), "http://cb");
        assert!(matches!(
            reg.poll(&started.state).await,
            FlowOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn upstream_start_error_propagates() {
        let app = Router::new().route(
            "/api/v1/oauth2/device/code",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = start_mock(app).await;
        let reg = FlowRegistry::new();
        let err = reg.start_device(&QWEN_PORTAL, Some(&base)).await.unwrap_err();
        assert!(err.to_string().contains("device code request failed"));
    }
}

use crate::infrastructure::backend_transport::{ApiRequest, BackendTransport, HttpMethod};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

const ACCESS_TOKEN_KEY: &str = "session.access_token";
const REFRESH_TOKEN_KEY: &str = "session.refresh_token";
const REFRESH_PATH: &str = "/api/auth/refresh";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    last_refresh_failure_at: Option<DateTime<Utc>>,
    // Shared handle for the one refresh attempt that may be in flight.
    refresh_in_flight: Option<watch::Receiver<Option<bool>>>,
    // Advanced by every fresh sign-in; invalidates a still-running restore.
    epoch: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponsePayload {
    access_token: String,
    refresh_token: Option<String>,
}

/// Owns the session token state. All reads and writes go through the
/// internal async mutex, which is the single serialized owner required for
/// the token invariants; credential-store writes are sequenced through the
/// same guard.
pub struct SessionManager<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    credential_store: Arc<S>,
    transport: Arc<T>,
    refresh_cooldown: Duration,
    state: Mutex<SessionState>,
    now_provider: NowProvider,
}

impl<S, T> SessionManager<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    pub fn new(credential_store: Arc<S>, transport: Arc<T>, refresh_cooldown: Duration) -> Self {
        Self {
            credential_store,
            transport,
            refresh_cooldown,
            state: Mutex::new(SessionState::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn has_access_token(&self) -> bool {
        self.state.lock().await.access_token.is_some()
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.state.lock().await.refresh_token.is_some()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.lock().await.access_token.clone()
    }

    /// One-time hydration from the credential store at process start.
    ///
    /// The store read happens outside the state lock so an interactive
    /// sign-in is never blocked behind it. The restore only installs what
    /// it read if it is still the active epoch and no token appeared while
    /// it was reading; a sign-in that raced it wins unconditionally.
    pub async fn load_from_store(&self) -> Result<(), EngineError> {
        let epoch_at_start = self.state.lock().await.epoch;

        let access_token = self.credential_store.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.credential_store.get(REFRESH_TOKEN_KEY)?;

        let mut state = self.state.lock().await;
        if state.epoch != epoch_at_start
            || state.access_token.is_some()
            || state.refresh_token.is_some()
        {
            tracing::debug!("launch restore superseded by a concurrent sign-in");
            return Ok(());
        }
        state.access_token = access_token;
        state.refresh_token = refresh_token;
        Ok(())
    }

    /// Installs a fresh interactive session and persists both secrets.
    pub async fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        self.credential_store.set(ACCESS_TOKEN_KEY, access_token)?;
        self.credential_store.set(REFRESH_TOKEN_KEY, refresh_token)?;
        state.access_token = Some(access_token.to_string());
        state.refresh_token = Some(refresh_token.to_string());
        state.last_refresh_failure_at = None;
        state.epoch = state.epoch.wrapping_add(1);
        Ok(())
    }

    /// Sign-out: clears in-memory state and deletes both secrets.
    pub async fn clear_tokens(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        self.credential_store.remove(ACCESS_TOKEN_KEY)?;
        self.credential_store.remove(REFRESH_TOKEN_KEY)?;
        state.access_token = None;
        state.refresh_token = None;
        state.last_refresh_failure_at = None;
        state.epoch = state.epoch.wrapping_add(1);
        Ok(())
    }

    pub async fn ensure_authenticated(&self) -> Result<(), EngineError> {
        if self.has_access_token().await {
            return Ok(());
        }
        if self.refresh_if_possible().await {
            Ok(())
        } else {
            Err(EngineError::NotAuthenticated)
        }
    }

    /// Attempts a token refresh, coalescing concurrent callers onto one
    /// network call. Returns whether a usable access token resulted.
    ///
    /// Within the cooldown window after a failed refresh this returns
    /// `false` without touching the network. A failed refresh never clears
    /// the stored tokens.
    pub async fn refresh_if_possible(&self) -> bool {
        let (result_tx, refresh_token) = {
            let mut state = self.state.lock().await;

            if let Some(failed_at) = state.last_refresh_failure_at {
                if (self.now_provider)() - failed_at < self.refresh_cooldown {
                    tracing::debug!("refresh suppressed by cooldown");
                    return false;
                }
            }
            let Some(refresh_token) = state.refresh_token.clone() else {
                return false;
            };
            if let Some(receiver) = state.refresh_in_flight.clone() {
                drop(state);
                return Self::await_in_flight(receiver).await;
            }

            let (result_tx, result_rx) = watch::channel(None);
            state.refresh_in_flight = Some(result_rx);
            (result_tx, refresh_token)
        };

        let outcome = self.perform_refresh(&refresh_token).await;

        {
            let mut state = self.state.lock().await;
            state.refresh_in_flight = None;
            match &outcome {
                Ok(payload) => {
                    if let Err(error) = self
                        .credential_store
                        .set(ACCESS_TOKEN_KEY, &payload.access_token)
                    {
                        tracing::warn!(%error, "failed to persist refreshed access token");
                    }
                    if let Some(refresh_token) = payload.refresh_token.as_deref() {
                        if let Err(error) =
                            self.credential_store.set(REFRESH_TOKEN_KEY, refresh_token)
                        {
                            tracing::warn!(%error, "failed to persist rotated refresh token");
                        }
                        state.refresh_token = Some(refresh_token.to_string());
                    }
                    state.access_token = Some(payload.access_token.clone());
                    state.last_refresh_failure_at = None;
                }
                Err(error) => {
                    tracing::debug!(%error, "token refresh failed; entering cooldown");
                    state.last_refresh_failure_at = Some((self.now_provider)());
                }
            }
        }

        let succeeded = outcome.is_ok();
        let _ = result_tx.send(Some(succeeded));
        succeeded
    }

    async fn await_in_flight(mut receiver: watch::Receiver<Option<bool>>) -> bool {
        loop {
            if let Some(result) = *receiver.borrow() {
                return result;
            }
            if receiver.changed().await.is_err() {
                return false;
            }
        }
    }

    async fn perform_refresh(&self, refresh_token: &str) -> Result<RefreshResponsePayload, EngineError> {
        let mut request = ApiRequest::new(HttpMethod::Post, REFRESH_PATH);
        request.body = Some(json!({ "refreshToken": refresh_token }));

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(EngineError::Http {
                status: response.status,
                body: response.body,
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }
}

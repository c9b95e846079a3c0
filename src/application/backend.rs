use crate::application::session::SessionManager;
use crate::infrastructure::backend_transport::{
    ApiRequest, ApiResponse, BackendTransport, HttpMethod,
};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::EngineError;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Issues authenticated backend calls: refreshes lazily when only a refresh
/// token is held, and transparently retries exactly once after an HTTP 401
/// that a refresh could cure.
pub struct BackendClient<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    transport: Arc<T>,
    session: Arc<SessionManager<S, T>>,
}

impl<S, T> BackendClient<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    pub fn new(transport: Arc<T>, session: Arc<SessionManager<S, T>>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionManager<S, T>> {
        &self.session
    }

    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, EngineError> {
        // Lazy refresh: a missing access token with a refresh token on hand
        // is cured before the first send, not after a guaranteed 401.
        if self.session.access_token().await.is_none() && self.session.has_refresh_token().await {
            let _ = self.session.refresh_if_possible().await;
        }
        let Some(token) = self.session.access_token().await else {
            return Err(EngineError::NotAuthenticated);
        };

        let mut request = ApiRequest::new(method, path);
        request.query = query
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        request.body = body;
        request.bearer_token = Some(token);

        let response = self.transport.execute(request.clone()).await?;
        if response.status == 401 {
            if self.session.refresh_if_possible().await {
                let Some(token) = self.session.access_token().await else {
                    return Err(EngineError::NotAuthenticated);
                };
                request.bearer_token = Some(token);
                let retried = self.transport.execute(request).await?;
                return check_status(retried);
            }
            return Err(EngineError::Http {
                status: response.status,
                body: response.body,
            });
        }
        check_status(response)
    }

    pub async fn request_json<R: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<R, EngineError> {
        let response = self.request(method, path, query, body).await?;
        decode_tolerant(&response.body)
    }
}

fn check_status(response: ApiResponse) -> Result<ApiResponse, EngineError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(EngineError::Http {
            status: response.status,
            body: response.body,
        })
    }
}

/// Tolerant decode of a backend body. The fallback order is a contract:
/// direct decode, then a `result` envelope, then every `steps.*.output`
/// candidate.
pub fn decode_tolerant<R: DeserializeOwned>(body: &str) -> Result<R, EngineError> {
    if let Ok(decoded) = serde_json::from_str::<R>(body) {
        return Ok(decoded);
    }

    let unexpected = || EngineError::UnexpectedShape {
        body: body.to_string(),
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        tracing::warn!(body, "backend body is not valid JSON");
        return Err(unexpected());
    };

    if let Some(result) = value.get("result") {
        if let Ok(decoded) = serde_json::from_value::<R>(result.clone()) {
            return Ok(decoded);
        }
    }

    if let Some(steps) = value.get("steps") {
        let candidates: Vec<&serde_json::Value> = match steps {
            serde_json::Value::Object(map) => map.values().collect(),
            serde_json::Value::Array(items) => items.iter().collect(),
            _ => Vec::new(),
        };
        for step in candidates {
            let Some(output) = step.get("output") else {
                continue;
            };
            if let Ok(decoded) = serde_json::from_value::<R>(output.clone()) {
                return Ok(decoded);
            }
        }
    }

    tracing::warn!(body, "backend body matched no known response shape");
    Err(unexpected())
}

use crate::application::session::SessionManager;
use crate::domain::models::{Plan, PlanRequest, StreamEvent};
use crate::infrastructure::backend_transport::{ApiRequest, BackendTransport, HttpMethod};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::sse::SseFrameDecoder;
use futures::StreamExt;
use std::sync::Arc;

const PLAN_PATH: &str = "/api/plan";

/// Drives `POST /api/plan?stream=1` and folds the server-sent event stream
/// into one terminal outcome, reporting progress along the way.
pub struct PlanStreamService<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    transport: Arc<T>,
    session: Arc<SessionManager<S, T>>,
}

impl<S, T> PlanStreamService<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    pub fn new(transport: Arc<T>, session: Arc<SessionManager<S, T>>) -> Self {
        Self { transport, session }
    }

    /// Streams one plan generation to completion. Returns the plan from the
    /// terminal `result` frame, or the carried failure. Reading stops and
    /// the connection is released as soon as a terminal frame is seen.
    pub async fn generate<F>(
        &self,
        request: &PlanRequest,
        mut on_progress: F,
    ) -> Result<Plan, EngineError>
    where
        F: FnMut(f64, Option<String>) + Send,
    {
        self.session.ensure_authenticated().await?;
        let Some(token) = self.session.access_token().await else {
            return Err(EngineError::NotAuthenticated);
        };

        let mut api_request = ApiRequest::new(HttpMethod::Post, PLAN_PATH);
        api_request.query = vec![("stream".to_string(), "1".to_string())];
        api_request.body = Some(serde_json::to_value(request)?);
        api_request.bearer_token = Some(token);

        let mut response = self.transport.execute_stream(api_request.clone()).await?;
        if response.status == 401 {
            drop(response);
            if !self.session.refresh_if_possible().await {
                return Err(EngineError::NotAuthenticated);
            }
            let Some(token) = self.session.access_token().await else {
                return Err(EngineError::NotAuthenticated);
            };
            api_request.bearer_token = Some(token);
            response = self.transport.execute_stream(api_request).await?;
            // A second 401 is a terminal auth failure.
            if response.status == 401 {
                return Err(EngineError::NotAuthenticated);
            }
        }
        if !(200..300).contains(&response.status) {
            let status = response.status;
            let body = response.collect_body().await;
            return Err(EngineError::Http { status, body });
        }

        let mut decoder = SseFrameDecoder::default();
        let mut chunks = response.chunks;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for payload in decoder.push(&chunk) {
                if let Some(plan) = Self::dispatch(&payload, &mut on_progress)? {
                    return Ok(plan);
                }
            }
        }
        if let Some(payload) = decoder.finish() {
            if let Some(plan) = Self::dispatch(&payload, &mut on_progress)? {
                return Ok(plan);
            }
        }
        Err(EngineError::StreamEndedPrematurely)
    }

    fn dispatch<F>(payload: &str, on_progress: &mut F) -> Result<Option<Plan>, EngineError>
    where
        F: FnMut(f64, Option<String>),
    {
        let event = match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, payload, "skipping unparseable stream frame");
                return Ok(None);
            }
        };

        match event {
            StreamEvent::Progress { pct, note } => {
                on_progress(pct.clamp(0.0, 100.0), note);
                Ok(None)
            }
            StreamEvent::Result { plan: Some(plan) } => Ok(Some(plan)),
            StreamEvent::Result { plan: None } => Err(EngineError::MissingResult),
            StreamEvent::Error { code, message } => {
                let message = message.unwrap_or_else(|| "stream ended".to_string());
                Err(EngineError::Stream(match code {
                    Some(code) => format!("{code}: {message}"),
                    None => message,
                }))
            }
            StreamEvent::Unknown => Ok(None),
        }
    }
}

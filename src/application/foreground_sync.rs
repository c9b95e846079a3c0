use crate::application::backend::BackendClient;
use crate::application::resilience::{CoalesceGate, GateDecision};
use crate::application::session::NowProvider;
use crate::application::signals::SignalBus;
use crate::domain::models::SyncDelta;
use crate::domain::stable_key::parse_milestone_tag;
use crate::infrastructure::backend_transport::{BackendTransport, HttpMethod};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::local_provider::LocalDataProvider;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

const MILESTONES_SYNC_PATH: &str = "/api/milestones/sync";

/// Reconciles local completion state with the backend when the app returns
/// to the foreground. Triggers are throttled to one accepted run per
/// window and coalesced onto an in-flight run; the run itself soft-fails
/// and always ends by broadcasting "milestones synced".
pub struct ForegroundSyncCoalescer<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    backend: Arc<BackendClient<S, T>>,
    provider: Arc<dyn LocalDataProvider>,
    signals: Arc<SignalBus>,
    gate: Arc<CoalesceGate>,
    now_provider: NowProvider,
}

impl<S, T> ForegroundSyncCoalescer<S, T>
where
    S: CredentialStore + 'static,
    T: BackendTransport + 'static,
{
    pub fn new(
        backend: Arc<BackendClient<S, T>>,
        provider: Arc<dyn LocalDataProvider>,
        signals: Arc<SignalBus>,
        throttle_window: Duration,
    ) -> Self {
        Self {
            backend,
            provider,
            signals,
            gate: Arc::new(CoalesceGate::new(throttle_window)),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Single entry point for foreground triggers. Never blocks: an
    /// accepted trigger starts the run on a background task, a throttled
    /// or coalesced one returns immediately.
    pub fn trigger(&self) -> GateDecision {
        let decision = self.gate.try_enter((self.now_provider)());
        match decision {
            GateDecision::Start => {
                let backend = Arc::clone(&self.backend);
                let provider = Arc::clone(&self.provider);
                let signals = Arc::clone(&self.signals);
                let gate = Arc::clone(&self.gate);
                tokio::spawn(async move {
                    if let Err(error) = run_pass(backend.as_ref(), provider.as_ref()).await {
                        // Soft-fail: a background trigger must never surface
                        // an error dialog. Listeners re-query state off the
                        // signal instead.
                        tracing::warn!(%error, "foreground sync pass failed");
                    }
                    signals.publish_milestones_synced();
                    gate.finish();
                });
            }
            GateDecision::Throttled => {
                tracing::debug!("foreground sync trigger throttled");
            }
            GateDecision::AlreadyRunning => {
                tracing::debug!("foreground sync trigger joined the in-flight run");
            }
        }
        decision
    }
}

async fn run_pass<S, T>(
    backend: &BackendClient<S, T>,
    provider: &dyn LocalDataProvider,
) -> Result<(), EngineError>
where
    S: CredentialStore,
    T: BackendTransport,
{
    let tasks = provider.tasks().await?;
    let deltas: Vec<SyncDelta> = tasks
        .iter()
        .filter_map(|task| {
            let key = task.external_url.as_deref().and_then(parse_milestone_tag)?;
            Some(SyncDelta {
                stable_key: key.to_string(),
                is_completed: task.completed,
                completed_at: task.completed_at,
                provider_identifier: Some(task.list_identifier.clone()),
                provider_external_identifier: Some(task.task_identifier.clone()),
            })
        })
        .collect();

    if deltas.is_empty() {
        tracing::debug!("no tracked completion deltas to push");
        return Ok(());
    }

    backend
        .request(
            HttpMethod::Post,
            MILESTONES_SYNC_PATH,
            &[],
            Some(json!({ "milestones": deltas })),
        )
        .await?;
    Ok(())
}

use crate::application::backend::BackendClient;
use crate::application::foreground_sync::ForegroundSyncCoalescer;
use crate::application::optimistic::apply_with_rollback;
use crate::application::plan_stream::PlanStreamService;
use crate::application::push_sync::{ProgressObserver, PushSynchronizer};
use crate::application::resilience::{GateDecision, RetryPolicy};
use crate::application::session::SessionManager;
use crate::application::signals::SignalBus;
use crate::domain::models::{Milestone, MilestonePatch, Plan, PlanRequest, ProgressSnapshot};
use crate::domain::patch::Patch;
use crate::domain::stable_key::{milestone_tag, stable_key};
use crate::infrastructure::backend_transport::{HttpMethod, ReqwestBackendTransport};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::credential_store::KeyringCredentialStore;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::local_provider::{LocalDataProvider, LocalTaskDraft};
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex as StdMutex};

type Store = KeyringCredentialStore;
type Transport = ReqwestBackendTransport;

/// The one engine instance a host process composes at startup. Wires the
/// session manager, resilient backend client, plan streaming, push
/// synchronizer and foreground coalescer over the real credential store
/// and HTTP transport; the platform calendar/task provider is injected.
pub struct SyncEngine {
    config: EngineConfig,
    session: Arc<SessionManager<Store, Transport>>,
    backend: Arc<BackendClient<Store, Transport>>,
    plan_stream: PlanStreamService<Store, Transport>,
    push: PushSynchronizer<Store, Transport>,
    coalescer: Arc<ForegroundSyncCoalescer<Store, Transport>>,
    signals: Arc<SignalBus>,
    provider: Arc<dyn LocalDataProvider>,
    milestones: StdMutex<Vec<Milestone>>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn LocalDataProvider>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let transport = Arc::new(ReqwestBackendTransport::new(&config.base_url)?);
        let store = Arc::new(KeyringCredentialStore::new(config.credential_service.clone()));
        let session = Arc::new(SessionManager::new(
            store,
            Arc::clone(&transport),
            Duration::seconds(config.refresh_cooldown_seconds),
        ));
        let backend = Arc::new(BackendClient::new(
            Arc::clone(&transport),
            Arc::clone(&session),
        ));
        let signals = Arc::new(SignalBus::new());
        let plan_stream = PlanStreamService::new(Arc::clone(&transport), Arc::clone(&session));
        let push = PushSynchronizer::new(Arc::clone(&backend), Arc::clone(&provider))
            .with_retry_policy(RetryPolicy {
                max_attempts: config.push_max_attempts,
                base_delay_ms: config.push_base_delay_ms,
                multiplier: 2,
            });
        let coalescer = Arc::new(ForegroundSyncCoalescer::new(
            Arc::clone(&backend),
            Arc::clone(&provider),
            Arc::clone(&signals),
            Duration::seconds(config.foreground_throttle_seconds),
        ));

        Ok(Self {
            config,
            session,
            backend,
            plan_stream,
            push,
            coalescer,
            signals,
            provider,
            milestones: StdMutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    /// Launch-time restore of the persisted session. Safe to race with an
    /// interactive sign-in; the sign-in wins.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.session.load_from_store().await
    }

    pub async fn is_signed_in(&self) -> bool {
        self.session.has_access_token().await || self.session.has_refresh_token().await
    }

    /// Hand-off from the interactive sign-in flow.
    pub async fn sign_in(&self, access_token: &str, refresh_token: &str) -> Result<(), EngineError> {
        self.session.set_tokens(access_token, refresh_token).await
    }

    pub async fn sign_out(&self) -> Result<(), EngineError> {
        self.session.clear_tokens().await
    }

    /// Streams one plan generation, caches the resulting milestones for
    /// the presentation layer and broadcasts "plan state changed".
    pub async fn generate_plan<F>(
        &self,
        request: &PlanRequest,
        on_progress: F,
    ) -> Result<Plan, EngineError>
    where
        F: FnMut(f64, Option<String>) + Send,
    {
        let plan = self.plan_stream.generate(request, on_progress).await?;
        {
            let mut milestones = self.milestones.lock().map_err(|error| {
                EngineError::Internal(format!("milestone cache lock poisoned: {error}"))
            })?;
            *milestones = plan.milestones.clone();
        }
        self.signals.publish_plan_state_changed();
        Ok(plan)
    }

    /// Writes the plan's milestones into the local task provider as
    /// reminder items, tagged so later passes can join them back to their
    /// server milestones. One batched commit.
    pub async fn materialize_plan_locally(&self, plan: &Plan) -> Result<(), EngineError> {
        let drafts: Vec<LocalTaskDraft> = plan
            .milestones
            .iter()
            .map(|milestone| {
                let key = stable_key("milestone", milestone.due_at, &milestone.id);
                LocalTaskDraft {
                    title: milestone.title.clone(),
                    notes: milestone.notes.clone(),
                    due_at: milestone.due_at,
                    external_url: milestone_tag(&key),
                }
            })
            .collect();
        if drafts.is_empty() {
            return Ok(());
        }
        self.provider.save_task_drafts(&drafts).await
    }

    pub async fn sync_incremental(
        &self,
        years_ahead: u32,
        on_progress: ProgressObserver,
    ) -> Result<ProgressSnapshot, EngineError> {
        self.push.sync_incremental(years_ahead, on_progress).await
    }

    pub fn trigger_foreground_sync(&self) -> GateDecision {
        self.coalescer.trigger()
    }

    /// Snapshot of the cached milestone collection for list rendering.
    pub fn milestones(&self) -> Vec<Milestone> {
        self.milestones
            .lock()
            .map(|milestones| milestones.clone())
            .unwrap_or_default()
    }

    /// User-initiated completion toggle: optimistic local apply, PATCH to
    /// the backend, rollback on rejection.
    pub async fn set_milestone_completed(
        &self,
        milestone_id: &str,
        completed: bool,
    ) -> Result<(), EngineError> {
        let updated = {
            let milestones = self.milestones.lock().map_err(|error| {
                EngineError::Internal(format!("milestone cache lock poisoned: {error}"))
            })?;
            let Some(current) = milestones.iter().find(|m| m.id == milestone_id) else {
                return Err(EngineError::Internal(format!(
                    "unknown milestone {milestone_id}"
                )));
            };
            let mut updated = current.clone();
            updated.completed = completed;
            updated.completed_at = completed.then(Utc::now);
            updated
        };

        let patch = MilestonePatch {
            completed: Patch::Set(completed),
            completed_at: match updated.completed_at {
                Some(at) => Patch::Set(at),
                None => Patch::SetNull,
            },
            notes: Patch::Unset,
        };
        let body = serde_json::to_value(&patch)?;
        let path = format!("/api/milestones/{milestone_id}");

        apply_with_rollback(&self.milestones, updated, |m| &m.id, || async move {
            self.backend
                .request(HttpMethod::Patch, &path, &[], Some(body))
                .await
                .map(|_| ())
        })
        .await
    }
}

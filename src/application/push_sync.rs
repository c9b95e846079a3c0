use crate::application::backend::BackendClient;
use crate::application::resilience::RetryPolicy;
use crate::application::session::NowProvider;
use crate::domain::models::{ProgressSnapshot, SyncItemKind, SyncableItem};
use crate::domain::stable_key::{parse_milestone_tag, stable_key};
use crate::infrastructure::backend_transport::{BackendTransport, HttpMethod};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::local_provider::{LocalDataProvider, LocalEvent, LocalTask};
use chrono::{Duration, Utc};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex as StdMutex};

const EVENT_PUSH_PATH: &str = "/api/sync/event";
const TASK_PUSH_PATH: &str = "/api/sync/reminder";
const DAYS_PER_YEAR: i64 = 365;

pub type ProgressObserver = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Pushes a snapshot of local events and tasks to the backend, one stream
/// per kind, both running concurrently. Items inside a stream go strictly
/// in snapshot order; each push gets a bounded exponential-backoff retry.
pub struct PushSynchronizer<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    backend: Arc<BackendClient<S, T>>,
    provider: Arc<dyn LocalDataProvider>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<S, T> PushSynchronizer<S, T>
where
    S: CredentialStore,
    T: BackendTransport,
{
    pub fn new(backend: Arc<BackendClient<S, T>>, provider: Arc<dyn LocalDataProvider>) -> Self {
        Self {
            backend,
            provider,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn sync_incremental(
        &self,
        years_ahead: u32,
        on_progress: ProgressObserver,
    ) -> Result<ProgressSnapshot, EngineError> {
        self.backend.session().ensure_authenticated().await?;

        let now = (self.now_provider)();
        let horizon = now + Duration::days(DAYS_PER_YEAR * i64::from(years_ahead));

        let mut events = self.provider.events_in_range(now, horizon).await?;
        events.sort_by(|a, b| {
            a.start_at
                .cmp(&b.start_at)
                .then_with(|| a.event_identifier.cmp(&b.event_identifier))
        });

        let mut tasks: Vec<LocalTask> = self
            .provider
            .tasks()
            .await?
            .into_iter()
            .filter(|task| !task.completed && task.due_at.is_none_or(|due| due >= now))
            .collect();
        tasks.sort_by(|a, b| match (a.due_at, b.due_at) {
            (Some(a_due), Some(b_due)) => a_due
                .cmp(&b_due)
                .then_with(|| a.task_identifier.cmp(&b.task_identifier)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.task_identifier.cmp(&b.task_identifier),
        });

        // Stable keys are fixed here, at snapshot time; retries resubmit the
        // same key and cannot create duplicate server records.
        let event_items: Vec<SyncableItem> = events.iter().map(snapshot_event).collect();
        let task_items: Vec<SyncableItem> = tasks.iter().map(snapshot_task).collect();

        let progress = StdMutex::new(ProgressSnapshot {
            done_events: 0,
            total_events: event_items.len(),
            done_tasks: 0,
            total_tasks: task_items.len(),
        });
        emit(&progress, &on_progress)?;

        // Both streams are polled to completion before either failure
        // propagates, so a failing stream never orphans the other's
        // in-flight item.
        let (events_result, tasks_result) = tokio::join!(
            self.push_stream(SyncItemKind::Event, &event_items, &progress, &on_progress),
            self.push_stream(SyncItemKind::Task, &task_items, &progress, &on_progress),
        );
        events_result?;
        tasks_result?;

        let snapshot = *progress
            .lock()
            .map_err(|error| EngineError::Internal(format!("progress lock poisoned: {error}")))?;
        Ok(snapshot)
    }

    async fn push_stream(
        &self,
        kind: SyncItemKind,
        items: &[SyncableItem],
        progress: &StdMutex<ProgressSnapshot>,
        on_progress: &ProgressObserver,
    ) -> Result<(), EngineError> {
        let path = match kind {
            SyncItemKind::Event => EVENT_PUSH_PATH,
            SyncItemKind::Task => TASK_PUSH_PATH,
        };

        for item in items {
            let body = serde_json::to_value(item)?;
            self.retry_policy
                .run(|| {
                    let body = body.clone();
                    async move {
                        self.backend
                            .request(HttpMethod::Post, path, &[], Some(body))
                            .await
                            .map(|_| ())
                    }
                })
                .await
                .map_err(|error| {
                    tracing::warn!(stable_key = %item.stable_key, %error, "abandoning item push");
                    EngineError::PushItemFailed {
                        stable_key: item.stable_key.clone(),
                        attempts: self.retry_policy.max_attempts.max(1),
                        source: Box::new(error),
                    }
                })?;

            let snapshot = {
                let mut progress = progress.lock().map_err(|error| {
                    EngineError::Internal(format!("progress lock poisoned: {error}"))
                })?;
                match kind {
                    SyncItemKind::Event => progress.done_events += 1,
                    SyncItemKind::Task => progress.done_tasks += 1,
                }
                *progress
            };
            on_progress(snapshot);
        }
        Ok(())
    }
}

fn emit(
    progress: &StdMutex<ProgressSnapshot>,
    on_progress: &ProgressObserver,
) -> Result<(), EngineError> {
    let snapshot = *progress
        .lock()
        .map_err(|error| EngineError::Internal(format!("progress lock poisoned: {error}")))?;
    on_progress(snapshot);
    Ok(())
}

fn snapshot_event(event: &LocalEvent) -> SyncableItem {
    SyncableItem {
        stable_key: stable_key(
            &event.calendar_identifier,
            Some(event.start_at),
            &event.event_identifier,
        ),
        kind: SyncItemKind::Event,
        provider_identifier: Some(event.event_identifier.clone()),
        title: event.title.clone(),
        notes: event.notes.clone(),
        scheduled_at: Some(event.start_at),
        all_day: event.all_day,
        completed: false,
    }
}

fn snapshot_task(task: &LocalTask) -> SyncableItem {
    // Items this engine materialized carry their key in the URL tag; only
    // untagged items fall back to the identity hash.
    let key = task
        .external_url
        .as_deref()
        .and_then(parse_milestone_tag)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            stable_key(&task.list_identifier, task.due_at, &task.task_identifier)
        });
    SyncableItem {
        stable_key: key,
        kind: SyncItemKind::Task,
        provider_identifier: Some(task.task_identifier.clone()),
        title: task.title.clone(),
        notes: task.notes.clone(),
        scheduled_at: task.due_at,
        all_day: false,
        completed: task.completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::SessionManager;
    use crate::infrastructure::backend_transport::{ApiRequest, ApiResponse, StreamingResponse};
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::infrastructure::local_provider::InMemoryLocalProvider;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn test_now() -> DateTime<Utc> {
        fixed_time("2026-08-06T12:00:00Z")
    }

    /// Records pushed bodies per path and fails a scripted number of times
    /// per stable key before succeeding.
    #[derive(Default)]
    struct FakePushTransport {
        pushes: StdMutex<Vec<(String, serde_json::Value)>>,
        failures_by_key: StdMutex<HashMap<String, u8>>,
    }

    impl FakePushTransport {
        fn fail_times(&self, stable_key: &str, failures: u8) {
            self.failures_by_key
                .lock()
                .expect("failures lock poisoned")
                .insert(stable_key.to_string(), failures);
        }

        fn pushed_keys(&self, path: &str) -> Vec<String> {
            self.pushes
                .lock()
                .expect("pushes lock poisoned")
                .iter()
                .filter(|(pushed_path, _)| pushed_path == path)
                .map(|(_, body)| body["stableKey"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl BackendTransport for FakePushTransport {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, EngineError> {
            let body = request.body.clone().unwrap_or_default();
            let stable_key = body["stableKey"].as_str().unwrap_or_default().to_string();

            {
                let mut failures = self.failures_by_key.lock().expect("failures lock poisoned");
                if let Some(remaining) = failures.get_mut(&stable_key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Ok(ApiResponse {
                            status: 503,
                            body: "temporarily unavailable".to_string(),
                        });
                    }
                }
            }

            self.pushes
                .lock()
                .expect("pushes lock poisoned")
                .push((request.path.clone(), body));
            Ok(ApiResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }

        async fn execute_stream(&self, _request: ApiRequest) -> Result<StreamingResponse, EngineError> {
            unimplemented!("streaming is not used by push tests")
        }
    }

    async fn synchronizer_with(
        transport: Arc<FakePushTransport>,
        provider: Arc<InMemoryLocalProvider>,
        signed_in: bool,
    ) -> PushSynchronizer<InMemoryCredentialStore, FakePushTransport> {
        let store = Arc::new(InMemoryCredentialStore::default());
        let session = Arc::new(SessionManager::new(
            store,
            Arc::clone(&transport),
            Duration::seconds(30),
        ));
        if signed_in {
            session
                .set_tokens("access", "refresh")
                .await
                .expect("set tokens");
        }
        let backend = Arc::new(BackendClient::new(transport, session));
        PushSynchronizer::new(backend, provider)
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 200,
                multiplier: 2,
            })
            .with_now_provider(Arc::new(test_now))
    }

    fn sample_event(id: &str, start: &str) -> LocalEvent {
        LocalEvent {
            calendar_identifier: "cal-1".to_string(),
            event_identifier: id.to_string(),
            title: format!("event {id}"),
            notes: None,
            start_at: fixed_time(start),
            all_day: false,
        }
    }

    fn sample_task(id: &str, due: Option<&str>) -> LocalTask {
        LocalTask {
            list_identifier: "list-1".to_string(),
            task_identifier: id.to_string(),
            title: format!("task {id}"),
            notes: None,
            due_at: due.map(fixed_time),
            completed: false,
            completed_at: None,
            external_url: None,
        }
    }

    fn recording_observer() -> (ProgressObserver, Arc<StdMutex<Vec<ProgressSnapshot>>>) {
        let snapshots = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&snapshots);
        let observer: ProgressObserver = Arc::new(move |snapshot| {
            sink.lock().expect("snapshots lock poisoned").push(snapshot);
        });
        (observer, snapshots)
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_pushed_in_snapshot_order_with_progress_after_each() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        provider.seed_events(vec![
            sample_event("later", "2026-09-01T09:00:00Z"),
            sample_event("sooner", "2026-08-10T09:00:00Z"),
        ]);
        provider.seed_tasks(vec![
            sample_task("undated", None),
            sample_task("dated", Some("2026-08-20T09:00:00Z")),
        ]);

        let transport = Arc::new(FakePushTransport::default());
        let synchronizer =
            synchronizer_with(Arc::clone(&transport), Arc::clone(&provider), true).await;
        let (observer, snapshots) = recording_observer();

        let outcome = synchronizer
            .sync_incremental(1, observer)
            .await
            .expect("sync");

        assert!(outcome.is_complete());
        assert_eq!(outcome.total_events, 2);
        assert_eq!(outcome.total_tasks, 2);

        let event_keys = transport.pushed_keys(EVENT_PUSH_PATH);
        assert_eq!(
            event_keys,
            vec![
                stable_key("cal-1", Some(fixed_time("2026-08-10T09:00:00Z")), "sooner"),
                stable_key("cal-1", Some(fixed_time("2026-09-01T09:00:00Z")), "later"),
            ]
        );
        let task_keys = transport.pushed_keys(TASK_PUSH_PATH);
        assert_eq!(
            task_keys,
            vec![
                stable_key("list-1", Some(fixed_time("2026-08-20T09:00:00Z")), "dated"),
                stable_key("list-1", None, "undated"),
            ]
        );

        let snapshots = snapshots.lock().expect("snapshots");
        // One emission before any push, then one per completed item.
        assert_eq!(snapshots.len(), 5);
        assert_eq!(snapshots[0].done_events + snapshots[0].done_tasks, 0);
        assert!(snapshots.last().expect("final snapshot").is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_excludes_past_due_completed_and_out_of_horizon_items() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        provider.seed_events(vec![
            sample_event("inside", "2026-08-10T09:00:00Z"),
            sample_event("beyond-horizon", "2027-09-10T09:00:00Z"),
        ]);
        let mut done = sample_task("done", None);
        done.completed = true;
        provider.seed_tasks(vec![
            sample_task("overdue", Some("2026-08-01T09:00:00Z")),
            done,
            sample_task("upcoming", Some("2026-08-20T09:00:00Z")),
        ]);

        let transport = Arc::new(FakePushTransport::default());
        let synchronizer =
            synchronizer_with(Arc::clone(&transport), Arc::clone(&provider), true).await;
        let (observer, _) = recording_observer();

        let outcome = synchronizer
            .sync_incremental(1, observer)
            .await
            .expect("sync");

        assert_eq!(outcome.total_events, 1);
        assert_eq!(outcome.total_tasks, 1);
        assert_eq!(
            transport.pushed_keys(TASK_PUSH_PATH),
            vec![stable_key(
                "list-1",
                Some(fixed_time("2026-08-20T09:00:00Z")),
                "upcoming"
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn an_item_recovering_on_the_third_attempt_is_counted_once_after_backoff() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        provider.seed_events(vec![sample_event("flaky", "2026-08-10T09:00:00Z")]);

        let transport = Arc::new(FakePushTransport::default());
        let key = stable_key("cal-1", Some(fixed_time("2026-08-10T09:00:00Z")), "flaky");
        transport.fail_times(&key, 2);

        let synchronizer =
            synchronizer_with(Arc::clone(&transport), Arc::clone(&provider), true).await;
        let (observer, snapshots) = recording_observer();

        let started = tokio::time::Instant::now();
        let outcome = synchronizer
            .sync_incremental(1, observer)
            .await
            .expect("sync");

        assert_eq!(outcome.done_events, 1);
        assert_eq!(transport.pushed_keys(EVENT_PUSH_PATH), vec![key]);
        // 200ms after the first failure, 400ms after the second.
        assert!(started.elapsed() >= tokio::time::Duration::from_millis(600));

        let snapshots = snapshots.lock().expect("snapshots");
        let completed_emissions = snapshots
            .iter()
            .filter(|snapshot| snapshot.done_events == 1)
            .count();
        assert_eq!(completed_emissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_the_pass_but_let_the_other_stream_finish() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        provider.seed_events(vec![sample_event("doomed", "2026-08-10T09:00:00Z")]);
        provider.seed_tasks(vec![sample_task("fine", Some("2026-08-20T09:00:00Z"))]);

        let transport = Arc::new(FakePushTransport::default());
        let key = stable_key("cal-1", Some(fixed_time("2026-08-10T09:00:00Z")), "doomed");
        transport.fail_times(&key, 3);

        let synchronizer =
            synchronizer_with(Arc::clone(&transport), Arc::clone(&provider), true).await;
        let (observer, _) = recording_observer();

        let result = synchronizer.sync_incremental(1, observer).await;
        match result {
            Err(EngineError::PushItemFailed {
                stable_key: failed_key,
                attempts,
                ..
            }) => {
                assert_eq!(failed_key, key);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected push-item failure, got {other:?}"),
        }
        // The task stream settled before the failure propagated.
        assert_eq!(transport.pushed_keys(TASK_PUSH_PATH).len(), 1);
    }

    #[tokio::test]
    async fn a_tagged_task_keeps_its_embedded_stable_key() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        let mut tagged = sample_task("tagged", Some("2026-08-20T09:00:00Z"));
        tagged.external_url = Some("goalsync://milestone/feedfacecafe".to_string());
        provider.seed_tasks(vec![tagged]);

        let transport = Arc::new(FakePushTransport::default());
        let synchronizer =
            synchronizer_with(Arc::clone(&transport), Arc::clone(&provider), true).await;
        let (observer, _) = recording_observer();

        synchronizer
            .sync_incremental(1, observer)
            .await
            .expect("sync");
        assert_eq!(
            transport.pushed_keys(TASK_PUSH_PATH),
            vec!["feedfacecafe".to_string()]
        );
    }

    #[tokio::test]
    async fn a_changed_title_does_not_change_the_stable_key() {
        let mut event = sample_event("evt-1", "2026-08-10T09:00:00Z");
        let before = snapshot_event(&event).stable_key;
        event.title = "renamed".to_string();
        let after = snapshot_event(&event).stable_key;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn sync_without_a_session_fails_with_not_authenticated() {
        let provider = Arc::new(InMemoryLocalProvider::default());
        let transport = Arc::new(FakePushTransport::default());
        let synchronizer = synchronizer_with(transport, provider, false).await;
        let (observer, snapshots) = recording_observer();

        let result = synchronizer.sync_incremental(1, observer).await;
        assert!(matches!(result, Err(EngineError::NotAuthenticated)));
        assert!(snapshots.lock().expect("snapshots").is_empty());
    }
}

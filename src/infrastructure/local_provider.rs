use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A calendar event as read from the platform provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEvent {
    pub calendar_identifier: String,
    pub event_identifier: String,
    pub title: String,
    pub notes: Option<String>,
    pub start_at: DateTime<Utc>,
    pub all_day: bool,
}

/// A reminder-like task item as read from the platform provider.
/// `external_url` carries the stable-key tag when this engine created or
/// adopted the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTask {
    pub list_identifier: String,
    pub task_identifier: String,
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub external_url: Option<String>,
}

/// Create-or-update payload for materializing milestones as local task
/// items. The `external_url` tag is the lookup key for later passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTaskDraft {
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub external_url: String,
}

/// Platform calendar/task access. Implementations are permission-gated and
/// surface refusal as `EngineError::AccessDenied`.
#[async_trait]
pub trait LocalDataProvider: Send + Sync {
    async fn events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocalEvent>, EngineError>;

    async fn tasks(&self) -> Result<Vec<LocalTask>, EngineError>;

    /// Creates or updates every draft (matched by `external_url`) in one
    /// batched commit.
    async fn save_task_drafts(&self, drafts: &[LocalTaskDraft]) -> Result<(), EngineError>;
}

/// Provider backed by plain vectors. Hosts without platform access (and the
/// test suite) use this implementation.
#[derive(Debug, Default)]
pub struct InMemoryLocalProvider {
    events: Mutex<Vec<LocalEvent>>,
    tasks: Mutex<Vec<LocalTask>>,
    access_denied: AtomicBool,
    save_commits: AtomicUsize,
}

impl InMemoryLocalProvider {
    pub fn seed_events(&self, events: Vec<LocalEvent>) {
        if let Ok(mut guard) = self.events.lock() {
            *guard = events;
        }
    }

    pub fn seed_tasks(&self, tasks: Vec<LocalTask>) {
        if let Ok(mut guard) = self.tasks.lock() {
            *guard = tasks;
        }
    }

    pub fn deny_access(&self, denied: bool) {
        self.access_denied.store(denied, Ordering::SeqCst);
    }

    /// Number of batched commits performed via `save_task_drafts`.
    pub fn save_commits(&self) -> usize {
        self.save_commits.load(Ordering::SeqCst)
    }

    pub fn snapshot_tasks(&self) -> Vec<LocalTask> {
        self.tasks
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn check_access(&self) -> Result<(), EngineError> {
        if self.access_denied.load(Ordering::SeqCst) {
            return Err(EngineError::AccessDenied);
        }
        Ok(())
    }
}

#[async_trait]
impl LocalDataProvider for InMemoryLocalProvider {
    async fn events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocalEvent>, EngineError> {
        self.check_access()?;
        let events = self
            .events
            .lock()
            .map_err(|error| EngineError::Provider(format!("events lock poisoned: {error}")))?;
        Ok(events
            .iter()
            .filter(|event| event.start_at >= from && event.start_at < to)
            .cloned()
            .collect())
    }

    async fn tasks(&self) -> Result<Vec<LocalTask>, EngineError> {
        self.check_access()?;
        let tasks = self
            .tasks
            .lock()
            .map_err(|error| EngineError::Provider(format!("tasks lock poisoned: {error}")))?;
        Ok(tasks.clone())
    }

    async fn save_task_drafts(&self, drafts: &[LocalTaskDraft]) -> Result<(), EngineError> {
        self.check_access()?;
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|error| EngineError::Provider(format!("tasks lock poisoned: {error}")))?;

        for draft in drafts {
            let existing = tasks
                .iter_mut()
                .find(|task| task.external_url.as_deref() == Some(draft.external_url.as_str()));
            match existing {
                Some(task) => {
                    task.title = draft.title.clone();
                    task.notes = draft.notes.clone();
                    task.due_at = draft.due_at;
                }
                None => {
                    let sequence = tasks.len() + 1;
                    tasks.push(LocalTask {
                        list_identifier: "goalsync".to_string(),
                        task_identifier: format!("local-{sequence}"),
                        title: draft.title.clone(),
                        notes: draft.notes.clone(),
                        due_at: draft.due_at,
                        completed: false,
                        completed_at: None,
                        external_url: Some(draft.external_url.clone()),
                    });
                }
            }
        }

        self.save_commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

use crate::domain::patch::Patch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncItemKind {
    Event,
    Task,
}

/// One local item as captured at snapshot time. `stable_key` is computed
/// once from provider-stable identity fields and never mutated afterward;
/// it is the idempotency key the backend merges on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncableItem {
    pub stable_key: String,
    pub kind: SyncItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_identifier: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub completed: bool,
}

/// Rebuilt per sync run; read by presentation for progress bars.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub done_events: usize,
    pub total_events: usize,
    pub done_tasks: usize,
    pub total_tasks: usize,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.done_events == self.total_events && self.done_tasks == self.total_tasks
    }
}

/// Completion-state delta exchanged with the backend during foreground
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta {
    pub stable_key: String,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_external_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

/// Body of `POST /api/plan?stream=1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub goal_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<DateTime<Utc>>,
}

/// Partial update for a milestone. Only `SetNull`/`Set` fields reach the
/// wire.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MilestonePatch {
    #[serde(skip_serializing_if = "Patch::is_unset")]
    pub completed: Patch<bool>,
    #[serde(skip_serializing_if = "Patch::is_unset")]
    pub completed_at: Patch<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Patch::is_unset")]
    pub notes: Patch<String>,
}

/// One parsed SSE frame from plan generation. Unrecognized `type` values
/// map to `Unknown` and are skipped by the consumer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress {
        #[serde(default)]
        pct: f64,
        #[serde(default)]
        note: Option<String>,
    },
    Result {
        #[serde(default)]
        plan: Option<Plan>,
    },
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn syncable_item_serializes_camel_case_without_absent_fields() {
        let item = SyncableItem {
            stable_key: "abc".to_string(),
            kind: SyncItemKind::Event,
            provider_identifier: Some("evt-1".to_string()),
            title: "Standup".to_string(),
            notes: None,
            scheduled_at: Some(fixed_time("2026-08-10T09:00:00Z")),
            all_day: false,
            completed: false,
        };
        let encoded = serde_json::to_value(&item).expect("serialize");
        assert_eq!(encoded["stableKey"], "abc");
        assert_eq!(encoded["providerIdentifier"], "evt-1");
        assert!(encoded.get("notes").is_none());
    }

    #[test]
    fn stream_event_parses_each_known_type() {
        let progress: StreamEvent =
            serde_json::from_str(r#"{"type":"progress","pct":42.5,"note":"drafting"}"#)
                .expect("progress");
        assert_eq!(
            progress,
            StreamEvent::Progress {
                pct: 42.5,
                note: Some("drafting".to_string())
            }
        );

        let result: StreamEvent =
            serde_json::from_str(r#"{"type":"result","plan":{"id":"p1","milestones":[]}}"#)
                .expect("result");
        match result {
            StreamEvent::Result { plan: Some(plan) } => assert_eq!(plan.id.as_deref(), Some("p1")),
            other => panic!("expected result with plan, got {other:?}"),
        }

        let error: StreamEvent =
            serde_json::from_str(r#"{"type":"error","code":"busy","message":"try later"}"#)
                .expect("error");
        assert_eq!(
            error,
            StreamEvent::Error {
                code: Some("busy".to_string()),
                message: Some("try later".to_string())
            }
        );
    }

    #[test]
    fn unrecognized_stream_event_types_map_to_unknown() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"heartbeat","at":"now"}"#).expect("unknown");
        assert_eq!(event, StreamEvent::Unknown);
    }

    #[test]
    fn milestone_tolerates_missing_optional_fields() {
        let milestone: Milestone =
            serde_json::from_str(r#"{"id":"m1","title":"Draft outline"}"#).expect("milestone");
        assert!(!milestone.completed);
        assert!(milestone.due_at.is_none());
    }

    #[test]
    fn progress_snapshot_completion() {
        let snapshot = ProgressSnapshot {
            done_events: 2,
            total_events: 2,
            done_tasks: 0,
            total_tasks: 0,
        };
        assert!(snapshot.is_complete());
        let partial = ProgressSnapshot {
            done_events: 1,
            ..snapshot
        };
        assert!(!partial.is_complete());
    }
}

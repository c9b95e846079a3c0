use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const MILESTONE_TAG_PREFIX: &str = "goalsync://milestone/";
const FIELD_SEPARATOR: u8 = 0x1f;

/// Deterministic identity hash for a local item.
///
/// Only provider-stable fields participate: the containing calendar/list
/// identifier, the temporal anchor (start for events, due date for tasks),
/// and the provider-native item identifier. Mutable fields such as the
/// title never change the key, so resubmitting an edited item maps to the
/// same server record.
pub fn stable_key(
    container_identifier: &str,
    temporal_anchor: Option<DateTime<Utc>>,
    provider_identifier: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(container_identifier.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    match temporal_anchor {
        Some(anchor) => hasher.update(anchor.timestamp().to_be_bytes()),
        None => hasher.update(b"undated"),
    }
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(provider_identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// URL-like tag embedded in a local task item so the item can be joined
/// back to its server milestone on later passes.
pub fn milestone_tag(stable_key: &str) -> String {
    format!("{MILESTONE_TAG_PREFIX}{stable_key}")
}

pub fn parse_milestone_tag(url: &str) -> Option<&str> {
    url.strip_prefix(MILESTONE_TAG_PREFIX)
        .filter(|key| !key.is_empty())
}

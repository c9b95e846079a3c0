use crate::infrastructure::error::EngineError;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.goalsync.app";
const DEFAULT_CREDENTIAL_SERVICE: &str = "goalsync.session";

/// Engine-wide settings. A host application deserializes this from its own
/// settings file; every field has a sensible default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub base_url: String,
    pub credential_service: String,
    pub refresh_cooldown_seconds: i64,
    pub foreground_throttle_seconds: i64,
    pub push_max_attempts: u8,
    pub push_base_delay_ms: u64,
    pub default_years_ahead: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credential_service: DEFAULT_CREDENTIAL_SERVICE.to_string(),
            refresh_cooldown_seconds: 30,
            foreground_throttle_seconds: 60,
            push_max_attempts: 3,
            push_base_delay_ms: 200,
            default_years_ahead: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let url = Url::parse(&self.base_url)
            .map_err(|error| EngineError::InvalidConfig(format!("invalid base url: {error}")))?;
        if url.cannot_be_a_base() {
            return Err(EngineError::InvalidConfig(
                "base url cannot be a base".to_string(),
            ));
        }
        if self.credential_service.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "credential_service must not be empty".to_string(),
            ));
        }
        if self.refresh_cooldown_seconds < 0 {
            return Err(EngineError::InvalidConfig(
                "refresh_cooldown_seconds must be >= 0".to_string(),
            ));
        }
        if self.foreground_throttle_seconds < 0 {
            return Err(EngineError::InvalidConfig(
                "foreground_throttle_seconds must be >= 0".to_string(),
            ));
        }
        if self.push_max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "push_max_attempts must be > 0".to_string(),
            ));
        }
        if self.default_years_ahead == 0 {
            return Err(EngineError::InvalidConfig(
                "default_years_ahead must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

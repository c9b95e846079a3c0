use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("backend returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response did not match any known shape; body={body}")]
    UnexpectedShape { body: String },
    #[error("plan stream failed: {0}")]
    Stream(String),
    #[error("plan stream ended before a terminal frame")]
    StreamEndedPrematurely,
    #[error("plan stream result frame carried no plan")]
    MissingResult,
    #[error("local data access denied")]
    AccessDenied,
    #[error("push failed for item {stable_key} after {attempts} attempts: {source}")]
    PushItemFailed {
        stable_key: String,
        attempts: u8,
        #[source]
        source: Box<EngineError>,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("credential store error: {0}")]
    Credential(String),
    #[error("local provider error: {0}")]
    Provider(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("internal state error: {0}")]
    Internal(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

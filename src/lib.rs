pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::engine::SyncEngine;
pub use infrastructure::config::EngineConfig;
pub use infrastructure::error::EngineError;

pub mod backend_transport;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod local_provider;
pub mod sse;

pub mod models;
pub mod patch;
pub mod stable_key;

pub mod config;
pub mod db;
pub mod dedup;
pub mod fingerprint;
pub mod hash;
pub mod ingest;
pub mod notes;
pub mod search;
pub mod segment;
pub mod similarity;

/// Note-stream document extensions we support
pub const SUPPORTED_EXTENSIONS: &[&str] = &["json"];

/// Application name for XDG paths
pub const APP_NAME: &str = "riffbank";

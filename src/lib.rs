pub mod config;
pub mod db;
pub mod extract;
pub mod pipeline;
pub mod scanner;

/// Extension of catalog and log files.
pub const DATA_EXTENSION: &str = "json";

/// Application name for XDG paths
pub const APP_NAME: &str = "songplay-etl";

//! Configuration loading for the drivelink client.
//!
//! Settings come from a TOML file and are then overridden by environment
//! variables (`DRIVELINK_CLIENT_ID`, `DRIVELINK_CLIENT_SECRET`,
//! `DRIVELINK_API_BASE_URL`).

pub mod loader;
pub mod schema;

pub use {
    loader::{ConfigError, default_config_path, load_config, parse_config},
    schema::{ApiSection, DrivelinkConfig, OAuthSection},
};

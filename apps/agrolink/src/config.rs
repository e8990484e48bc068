//! # Server Configuration
//!
//! Settings read from the environment when the HTTP server starts.
//!
//! - `AGROLINK_UPLOAD_DIR`: root of the per-client document folders
//!   (default: `uploads`)
//! - `AGROLINK_PROPOSAL_ALERT_DAYS`: days a proposal may stay open before
//!   it is reported as stale (default: 7)
//!
//! Authentication, rate limiting and CORS are read by the `api` module.

use agrolink_core::primitives::DEFAULT_PROPOSAL_ALERT_DAYS;
use std::path::PathBuf;

/// Default document root, relative to the working directory.
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub upload_dir: PathBuf,
    pub proposal_alert_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            proposal_alert_days: DEFAULT_PROPOSAL_ALERT_DAYS,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// Empty or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let upload_dir = lookup("AGROLINK_UPLOAD_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);

        let proposal_alert_days = match lookup("AGROLINK_PROPOSAL_ALERT_DAYS") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    value = %raw,
                    "Invalid AGROLINK_PROPOSAL_ALERT_DAYS, using {}",
                    DEFAULT_PROPOSAL_ALERT_DAYS
                );
                defaults.proposal_alert_days
            }),
            None => defaults.proposal_alert_days,
        };

        Self {
            upload_dir,
            proposal_alert_days,
        }
    }
}

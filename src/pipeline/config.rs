//! Pipeline configuration from environment variables
//!
//! Covers the store, the bot account and the scheduled social / rollup jobs.
//! Stream settings live in `streamer_core::config::RuntimeConfig`.

use super::reposter::RepostPolicy;
use crate::streamer_core::config::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the scheduled jobs
///
/// Loaded from environment variables with sensible defaults. The account
/// identifier and password have no default.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// PDS base url for XRPC calls
    pub pds_url: String,

    /// Bot account id (`did:...`)
    pub identifier: String,

    /// App password of the bot account
    pub password: String,

    /// Suffix tried when a profile is looked up by a bare handle
    pub handle_domain: String,

    /// Language a post must be dominant in to be reposted
    pub target_language: String,

    pub repost_min_age_minutes: i64,
    pub repost_max_age_minutes: i64,

    /// Inclusive `2 * reposts + likes` band
    pub score_min: i64,
    pub score_max: i64,

    /// Reconcile → engagement refresh → repost cycle
    pub social_interval_ms: u64,

    /// top_blocks / top_follows / top_posters
    pub rollup_interval_ms: u64,

    pub histogram_interval_ms: u64,

    /// Hours recomputed on each histogram run
    pub histogram_recompute_hours: u32,

    /// 0 disables the follower sync job
    pub follower_sync_interval_ms: u64,

    /// Max never-refreshed follower profiles fetched per social cycle
    pub profile_refresh_batch: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SKYFLOW_DB_PATH` (default: /var/lib/skyflow/skyflow.db)
    /// - `SKYFLOW_PDS_URL` (default: https://bsky.social)
    /// - `SKYFLOW_IDENTIFIER` (required)
    /// - `SKYFLOW_PASSWORD` (required)
    /// - `SKYFLOW_HANDLE_DOMAIN` (default: bsky.social)
    /// - `SKYFLOW_TARGET_LANGUAGE` (default: pt)
    /// - `SKYFLOW_REPOST_MIN_AGE_MINUTES` / `SKYFLOW_REPOST_MAX_AGE_MINUTES` (default: 30 / 120)
    /// - `SKYFLOW_SCORE_MIN` / `SKYFLOW_SCORE_MAX` (default: 12 / 20)
    /// - `SKYFLOW_SOCIAL_INTERVAL_MS` (default: 10000)
    /// - `SKYFLOW_ROLLUP_INTERVAL_MS` (default: 3600000)
    /// - `SKYFLOW_HISTOGRAM_INTERVAL_MS` (default: 3600000)
    /// - `SKYFLOW_HISTOGRAM_RECOMPUTE_HOURS` (default: 2)
    /// - `SKYFLOW_FOLLOWER_SYNC_INTERVAL_MS` (default: 86400000)
    /// - `SKYFLOW_PROFILE_REFRESH_BATCH` (default: 25)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
        };

        let config = Self {
            db_path: lookup("SKYFLOW_DB_PATH")
                .unwrap_or_else(|| "/var/lib/skyflow/skyflow.db".to_string()),

            pds_url: lookup("SKYFLOW_PDS_URL")
                .unwrap_or_else(|| "https://bsky.social".to_string()),

            identifier: required("SKYFLOW_IDENTIFIER")?,

            password: required("SKYFLOW_PASSWORD")?,

            handle_domain: lookup("SKYFLOW_HANDLE_DOMAIN")
                .unwrap_or_else(|| "bsky.social".to_string()),

            target_language: lookup("SKYFLOW_TARGET_LANGUAGE")
                .unwrap_or_else(|| "pt".to_string()),

            repost_min_age_minutes: parsed(&lookup, "SKYFLOW_REPOST_MIN_AGE_MINUTES", 30),
            repost_max_age_minutes: parsed(&lookup, "SKYFLOW_REPOST_MAX_AGE_MINUTES", 120),
            score_min: parsed(&lookup, "SKYFLOW_SCORE_MIN", 12),
            score_max: parsed(&lookup, "SKYFLOW_SCORE_MAX", 20),
            social_interval_ms: parsed(&lookup, "SKYFLOW_SOCIAL_INTERVAL_MS", 10_000),
            rollup_interval_ms: parsed(&lookup, "SKYFLOW_ROLLUP_INTERVAL_MS", 3_600_000),
            histogram_interval_ms: parsed(&lookup, "SKYFLOW_HISTOGRAM_INTERVAL_MS", 3_600_000),
            histogram_recompute_hours: parsed(&lookup, "SKYFLOW_HISTOGRAM_RECOMPUTE_HOURS", 2),
            follower_sync_interval_ms: parsed(&lookup, "SKYFLOW_FOLLOWER_SYNC_INTERVAL_MS", 86_400_000),
            profile_refresh_batch: parsed(&lookup, "SKYFLOW_PROFILE_REFRESH_BATCH", 25),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.identifier.starts_with("did:") {
            return Err(ConfigError::InvalidValue(format!(
                "SKYFLOW_IDENTIFIER must be an account did, got {}",
                self.identifier
            )));
        }

        if !self.pds_url.starts_with("http://") && !self.pds_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SKYFLOW_PDS_URL must start with http:// or https://".to_string(),
            ));
        }

        if self.target_language.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "SKYFLOW_TARGET_LANGUAGE cannot be empty".to_string(),
            ));
        }

        if self.repost_min_age_minutes < 0 || self.repost_min_age_minutes >= self.repost_max_age_minutes {
            return Err(ConfigError::InvalidValue(format!(
                "repost window must satisfy 0 <= min < max, got {}..{} minutes",
                self.repost_min_age_minutes, self.repost_max_age_minutes
            )));
        }

        if self.score_min > self.score_max {
            return Err(ConfigError::InvalidValue(format!(
                "score band is inverted: {} > {}",
                self.score_min, self.score_max
            )));
        }

        for (name, value) in [
            ("SKYFLOW_SOCIAL_INTERVAL_MS", self.social_interval_ms),
            ("SKYFLOW_ROLLUP_INTERVAL_MS", self.rollup_interval_ms),
            ("SKYFLOW_HISTOGRAM_INTERVAL_MS", self.histogram_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be positive", name)));
            }
        }

        Ok(())
    }

    pub fn repost_policy(&self) -> RepostPolicy {
        RepostPolicy {
            target_language: self.target_language.clone(),
            min_age_secs: self.repost_min_age_minutes * 60,
            max_age_secs: self.repost_max_age_minutes * 60,
            score_min: self.score_min,
            score_max: self.score_max,
        }
    }

    pub fn follower_sync_interval(&self) -> Option<Duration> {
        match self.follower_sync_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

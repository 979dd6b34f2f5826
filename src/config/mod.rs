//! Application configuration, read from the environment and an optional
//! `reelpick.toml`.

use crate::provider::Backend;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE: &str = "reelpick.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Level for this crate's targets; other crates stay at `warn`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Snapshot Store root.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backend: Backend,
    pub media_url: String,
    pub media_token: String,
    /// Owner user id; required by Jellyfin and Emby, unused by Plex.
    #[serde(default)]
    pub media_user_id: Option<String>,
    #[serde(default = "default_plex_tv_url")]
    pub plex_tv_url: String,

    #[serde(
        default = "default_refresh_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_interval: Duration,
    #[serde(
        default = "default_refresh_jitter",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_jitter: Duration,
    #[serde(
        default = "default_catalog_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub catalog_interval: Duration,
    /// Upper bound for graceful shutdown of all services.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Requests per second across all upstream calls.
    #[serde(default = "default_upstream_rate_limit")]
    pub upstream_rate_limit: u32,
    #[serde(
        default = "default_upstream_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub upstream_timeout: Duration,
    /// Item-detail fetches in flight during one reconciliation.
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
}

impl Config {
    /// Merge the config file (if present) under the process environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::raw()),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        figment.extract()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_plex_tv_url() -> String {
    "https://plex.tv".to_string()
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_refresh_jitter() -> Duration {
    Duration::from_secs(30)
}

fn default_catalog_interval() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_upstream_rate_limit() -> u32 {
    8
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_detail_concurrency() -> usize {
    4
}

/// Bare numbers are seconds; strings go through `fundu` (`90s`, `5m`, `6h`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ]);
    let parsed = parser
        .parse(text.trim())
        .map_err(|e| format!("invalid duration '{text}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{text}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config, figment::Error> {
        Config::from_figment(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let config = from_toml(
            r#"
            media_url = "http://plex.local:32400"
            media_token = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Plex);
        assert_eq!(config.port, 8080);
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.catalog_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.data_dir, PathBuf::from("./data/cache"));
        assert!(config.media_user_id.is_none());
    }

    #[test]
    fn durations_accept_units_and_bare_seconds() {
        let config = from_toml(
            r#"
            backend = "jellyfin"
            media_url = "http://jf.local:8096"
            media_token = "k"
            media_user_id = "u1"
            refresh_interval = "90s"
            refresh_jitter = 5
            catalog_interval = "12h"
            upstream_timeout = "1500ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Jellyfin);
        assert_eq!(config.refresh_interval, Duration::from_secs(90));
        assert_eq!(config.refresh_jitter, Duration::from_secs(5));
        assert_eq!(config.catalog_interval, Duration::from_secs(12 * 3600));
        assert_eq!(config.upstream_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage_duration() {
        assert!(parse_duration("soon").is_err());
        assert!(
            from_toml(
                r#"
                media_url = "http://x"
                media_token = "k"
                refresh_interval = "five minutes"
                "#
            )
            .is_err()
        );
    }

    #[test]
    fn missing_media_url_is_an_error() {
        assert!(from_toml(r#"media_token = "k""#).is_err());
    }
}

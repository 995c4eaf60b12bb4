use std::collections::HashSet;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    application::services::backoff::RetryPolicy,
    domain::{
        errors::DomainError,
        models::{ColumnMap, CompletionKind, IdType, SourceDescriptor, TopicRule},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} env param is required")]
    Missing(&'static str),
    #[error("{name} env param is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read sources file {path}: {reason}")]
    SourcesFile { path: String, reason: String },
    #[error("source list is not valid JSON: {0}")]
    SourcesFormat(#[from] serde_json::Error),
    #[error("no outbox sources configured")]
    NoSources,
    #[error("source {0} is configured more than once")]
    DuplicateSource(String),
    #[error(transparent)]
    Source(#[from] DomainError),
}

/// One entry of `OUTBOX_SOURCES`. Omitted fields fall back to the defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSettings {
    namespace: String,
    table: String,
    completion_column: String,
    #[serde(default)]
    completion_kind: CompletionKind,
    #[serde(default)]
    id_type: IdType,
    #[serde(default)]
    columns: ColumnMap,
    #[serde(default)]
    topic: TopicRule,
    batch_size: Option<u32>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub sources: Vec<SourceDescriptor>,
    pub readiness_window: Duration,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
    pub persist_heartbeats: bool,
}

impl Config {
    pub fn try_parse() -> Result<Config, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|name| var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let poll_interval = Duration::from_millis(parse_or(&lookup, "POLL_INTERVAL_MS", 1000)?);
        let batch_size = parse_or(&lookup, "BATCH_SIZE", 100)?;

        let raw_sources = match (lookup("OUTBOX_SOURCES"), lookup("OUTBOX_SOURCES_FILE")) {
            (Some(inline), _) => inline,
            (None, Some(path)) => {
                std::fs::read_to_string(&path).map_err(|err| ConfigError::SourcesFile {
                    path,
                    reason: err.to_string(),
                })?
            }
            (None, None) => return Err(ConfigError::Missing("OUTBOX_SOURCES")),
        };
        let sources = parse_sources(&raw_sources, batch_size, poll_interval)?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "PUBLISH_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(parse_or(&lookup, "PUBLISH_RETRY_BASE_MS", 200)?),
            max_delay: Duration::from_millis(parse_or(&lookup, "PUBLISH_RETRY_MAX_MS", 5000)?),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "PUBLISH_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: required("NATS_URL")?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            sources,
            readiness_window: Duration::from_secs(parse_or(&lookup, "READINESS_WINDOW_SECS", 30)?),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 10)?),
            retry,
            persist_heartbeats: parse_or(&lookup, "PERSIST_HEARTBEATS", false)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_sources(
    raw: &str,
    default_batch_size: u32,
    default_poll_interval: Duration,
) -> Result<Vec<SourceDescriptor>, ConfigError> {
    let settings: Vec<SourceSettings> = serde_json::from_str(raw)?;
    if settings.is_empty() {
        return Err(ConfigError::NoSources);
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(settings.len());
    for settings in settings {
        let source = SourceDescriptor {
            namespace: settings.namespace,
            table: settings.table,
            completion_column: settings.completion_column,
            completion_kind: settings.completion_kind,
            id_type: settings.id_type,
            columns: settings.columns,
            topic: settings.topic,
            batch_size: settings.batch_size.unwrap_or(default_batch_size),
            poll_interval: settings
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default_poll_interval),
        };
        source.validate()?;
        if !seen.insert(source.key()) {
            return Err(ConfigError::DuplicateSource(source.key().to_string()));
        }
        sources.push(source);
    }
    Ok(sources)
}

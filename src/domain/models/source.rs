use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{errors::DomainError, models::OutboxRow};

/// How a source records that a row has been published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Nullable timestamp, set to `NOW()` on completion.
    #[default]
    Timestamp,
    /// Boolean, set to `TRUE` on completion. `NULL` counts as unpublished.
    Flag,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    #[default]
    Uuid,
    Bigint,
    Text,
}

impl IdType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            IdType::Uuid => "uuid",
            IdType::Bigint => "bigint",
            IdType::Text => "text",
        }
    }
}

/// Column names of an outbox table, for services that deviate from the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub id: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: String,
    pub correlation_id: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            aggregate_id: "aggregate_id".to_string(),
            aggregate_type: "aggregate_type".to_string(),
            event_type: "event_type".to_string(),
            payload: "payload".to_string(),
            created_at: "created_at".to_string(),
            correlation_id: None,
        }
    }
}

impl ColumnMap {
    fn named(&self) -> Vec<(&'static str, &str)> {
        let mut columns = vec![
            ("id", self.id.as_str()),
            ("aggregate_id", self.aggregate_id.as_str()),
            ("aggregate_type", self.aggregate_type.as_str()),
            ("event_type", self.event_type.as_str()),
            ("payload", self.payload.as_str()),
            ("created_at", self.created_at.as_str()),
        ];
        if let Some(correlation_id) = &self.correlation_id {
            columns.push(("correlation_id", correlation_id.as_str()));
        }
        columns
    }
}

/// Rule deriving the destination topic of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TopicRule {
    EventType {
        #[serde(default)]
        prefix: Option<String>,
    },
    AggregateType {
        #[serde(default)]
        prefix: Option<String>,
    },
    Fixed {
        subject: String,
    },
}

impl Default for TopicRule {
    fn default() -> Self {
        TopicRule::EventType { prefix: None }
    }
}

impl TopicRule {
    pub fn topic_for(&self, row: &OutboxRow) -> String {
        match self {
            TopicRule::EventType { prefix } => with_prefix(prefix.as_deref(), &row.event_type),
            TopicRule::AggregateType { prefix } => {
                with_prefix(prefix.as_deref(), &row.aggregate_type)
            }
            TopicRule::Fixed { subject } => subject.clone(),
        }
    }
}

fn with_prefix(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{name}"),
        None => name.to_string(),
    }
}

/// `namespace.table`, the identity of a source in logs, metrics and health output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(namespace: &str, table: &str) -> Self {
        Self(format!("{namespace}.{table}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of one outbox source. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub namespace: String,
    pub table: String,
    pub completion_column: String,
    pub completion_kind: CompletionKind,
    pub id_type: IdType,
    pub columns: ColumnMap,
    pub topic: TopicRule,
    pub batch_size: u32,
    pub poll_interval: Duration,
}

impl SourceDescriptor {
    /// Descriptor with default column names, timestamp completion and
    /// event-type topics.
    pub fn new(namespace: &str, table: &str, completion_column: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            table: table.to_string(),
            completion_column: completion_column.to_string(),
            completion_kind: CompletionKind::default(),
            id_type: IdType::default(),
            columns: ColumnMap::default(),
            topic: TopicRule::default(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::new(&self.namespace, &self.table)
    }

    /// Every column the relay reads or writes, paired with its role.
    pub fn referenced_columns(&self) -> Vec<(&'static str, &str)> {
        let mut columns = self.columns.named();
        columns.push(("completion", self.completion_column.as_str()));
        columns
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let key = self.key();
        for (role, name) in [("namespace", &self.namespace), ("table", &self.table)] {
            if !is_valid_identifier(name) {
                return Err(DomainError::invalid_source(
                    key.as_str(),
                    format!("{role} '{name}' is not a valid identifier"),
                ));
            }
        }
        for (role, name) in self.referenced_columns() {
            if !is_valid_identifier(name) {
                return Err(DomainError::invalid_source(
                    key.as_str(),
                    format!("{role} column '{name}' is not a valid identifier"),
                ));
            }
        }
        if self.batch_size == 0 {
            return Err(DomainError::invalid_source(
                key.as_str(),
                "batch_size must be greater than zero",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(DomainError::invalid_source(
                key.as_str(),
                "poll_interval_ms must be greater than zero",
            ));
        }
        if let TopicRule::Fixed { subject } = &self.topic {
            if subject.trim().is_empty() {
                return Err(DomainError::invalid_source(
                    key.as_str(),
                    "fixed topic subject cannot be empty",
                ));
            }
        }
        Ok(())
    }
}

/// Plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

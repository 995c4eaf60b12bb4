use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, Pool, Postgres, types::Json};

use crate::domain::{
    errors::DomainError,
    models::{CompletionKind, IdType, OutboxRow, RowId, SourceDescriptor, SourceKey},
    repositories::{CompletionWriter, DatabaseProbe, HeartbeatStore, OutboxReader},
};

pub type PgPool = Pool<Postgres>;

/// Reader and writer for every configured outbox table. The SQL for a source
/// is derived from its descriptor; no per-schema code paths exist.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// Checks the live schema for the table and every column `source` refers
    /// to. A mismatch is a configuration error and must stop startup.
    pub async fn verify_source(&self, source: &SourceDescriptor) -> Result<(), DomainError> {
        let key = source.key();
        let columns: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            "#,
        )
        .bind(&source.namespace)
        .bind(&source.table)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| DomainError::Other(err.into()))?
        .into_iter()
        .collect();

        check_schema(source, &columns).map_err(|reason| DomainError::invalid_source(key.as_str(), reason))
    }
}

fn check_schema(source: &SourceDescriptor, columns: &HashMap<String, String>) -> Result<(), String> {
    if columns.is_empty() {
        return Err(format!(
            "table {}.{} does not exist or is not visible",
            source.namespace, source.table
        ));
    }

    let missing: Vec<&str> = source
        .referenced_columns()
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| !columns.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing columns: {}", missing.join(", ")));
    }

    let completion_type = columns[&source.completion_column].as_str();
    let compatible = match source.completion_kind {
        CompletionKind::Timestamp => is_timestamp(completion_type),
        CompletionKind::Flag => completion_type == "boolean",
    };
    if !compatible {
        return Err(format!(
            "completion column {} has type {completion_type}, which does not match completion_kind {:?}",
            source.completion_column, source.completion_kind
        ));
    }

    let id_type = columns[&source.columns.id].as_str();
    let id_compatible = match source.id_type {
        IdType::Uuid => id_type == "uuid",
        IdType::Bigint => matches!(id_type, "bigint" | "integer" | "smallint"),
        IdType::Text => is_text(id_type),
    };
    if !id_compatible {
        return Err(format!(
            "id column {} has type {id_type}, which does not match id_type {}",
            source.columns.id,
            source.id_type.sql_type()
        ));
    }

    let created_type = columns[&source.columns.created_at].as_str();
    if !is_timestamp(created_type) {
        return Err(format!(
            "created_at column {} has type {created_type}, expected a timestamp",
            source.columns.created_at
        ));
    }

    let payload_type = columns[&source.columns.payload].as_str();
    if !matches!(payload_type, "json" | "jsonb") && !is_text(payload_type) {
        return Err(format!(
            "payload column {} has type {payload_type}, expected json, jsonb or text",
            source.columns.payload
        ));
    }
    Ok(())
}

fn is_timestamp(data_type: &str) -> bool {
    data_type.starts_with("timestamp")
}

fn is_text(data_type: &str) -> bool {
    matches!(data_type, "text" | "character varying" | "character")
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn table_ref(source: &SourceDescriptor) -> String {
    format!("{}.{}", quote(&source.namespace), quote(&source.table))
}

fn unpublished_predicate(source: &SourceDescriptor) -> String {
    let column = quote(&source.completion_column);
    match source.completion_kind {
        CompletionKind::Timestamp => format!("{column} IS NULL"),
        CompletionKind::Flag => format!("{column} IS NOT TRUE"),
    }
}

pub(crate) fn select_candidates_sql(source: &SourceDescriptor) -> String {
    let columns = &source.columns;
    let completed_at = match source.completion_kind {
        CompletionKind::Timestamp => format!("{}::timestamptz", quote(&source.completion_column)),
        CompletionKind::Flag => "NULL::timestamptz".to_string(),
    };
    let correlation_id = columns
        .correlation_id
        .as_deref()
        .map_or_else(|| "NULL::text".to_string(), |c| format!("{}::text", quote(c)));

    format!(
        "SELECT {id}::text AS id, \
         {aggregate_id}::text AS aggregate_id, \
         {aggregate_type}::text AS aggregate_type, \
         {event_type}::text AS event_type, \
         {payload}::jsonb AS payload, \
         {created_at}::timestamptz AS created_at, \
         {completed_at} AS completed_at, \
         {correlation_id} AS correlation_id \
         FROM {table} \
         WHERE {predicate} \
         ORDER BY {created_at} ASC, {id} ASC \
         LIMIT $1",
        id = quote(&columns.id),
        aggregate_id = quote(&columns.aggregate_id),
        aggregate_type = quote(&columns.aggregate_type),
        event_type = quote(&columns.event_type),
        payload = quote(&columns.payload),
        created_at = quote(&columns.created_at),
        table = table_ref(source),
        predicate = unpublished_predicate(source),
    )
}

pub(crate) fn mark_completed_sql(source: &SourceDescriptor) -> String {
    let value = match source.completion_kind {
        CompletionKind::Timestamp => "NOW()",
        CompletionKind::Flag => "TRUE",
    };
    format!(
        "UPDATE {table} SET {column} = {value} \
         WHERE {id} = ANY($1::{id_type}[]) AND {predicate}",
        table = table_ref(source),
        column = quote(&source.completion_column),
        id = quote(&source.columns.id),
        id_type = source.id_type.sql_type(),
        predicate = unpublished_predicate(source),
    )
}

#[async_trait]
impl OutboxReader for PostgresOutboxRepository {
    async fn fetch_batch(&self, source: &SourceDescriptor) -> anyhow::Result<Vec<OutboxRow>> {
        let records = sqlx::query_as::<_, OutboxRecord>(&select_candidates_sql(source))
            .bind(i64::from(source.batch_size))
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(OutboxRow::from).collect())
    }
}

#[async_trait]
impl CompletionWriter for PostgresOutboxRepository {
    async fn mark_completed(
        &self,
        source: &SourceDescriptor,
        ids: &[RowId],
    ) -> anyhow::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let result = sqlx::query(&mark_completed_sql(source))
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DatabaseProbe for PostgresOutboxRepository {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct OutboxRecord {
    id: String,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    payload: Json<Value>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    correlation_id: Option<String>,
}

impl From<OutboxRecord> for OutboxRow {
    fn from(value: OutboxRecord) -> Self {
        Self {
            id: RowId::from(value.id),
            aggregate_id: value.aggregate_id,
            aggregate_type: value.aggregate_type,
            event_type: value.event_type,
            payload: value.payload.0,
            created_at: value.created_at,
            completed_at: value.completed_at,
            correlation_id: value.correlation_id,
        }
    }
}

/// Heartbeats in the relay's own `outbox_relay_heartbeats` table.
#[derive(Clone)]
pub struct PostgresHeartbeatStore {
    pool: PgPool,
}

impl PostgresHeartbeatStore {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for PostgresHeartbeatStore {
    async fn load(&self) -> anyhow::Result<HashMap<SourceKey, DateTime<Utc>>> {
        let rows = sqlx::query_as::<_, HeartbeatRecord>(
            r#"SELECT source, last_success_at FROM outbox_relay_heartbeats"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (namespace, table) = row.source.split_once('.')?;
                Some((SourceKey::new(namespace, table), row.last_success_at))
            })
            .collect())
    }

    async fn record(&self, source: &SourceKey, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_relay_heartbeats (source, last_success_at)
            VALUES ($1, $2)
            ON CONFLICT (source) DO UPDATE
            SET last_success_at = GREATEST(outbox_relay_heartbeats.last_success_at, EXCLUDED.last_success_at)
            "#,
        )
        .bind(source.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct HeartbeatRecord {
    source: String,
    last_success_at: DateTime<Utc>,
}

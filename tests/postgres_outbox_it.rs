//! Needs a disposable PostgreSQL database:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::collections::HashMap;

use chrono::Utc;
use outbox_relay::{
    domain::{
        models::{CompletionKind, IdType, RowId, SourceDescriptor, SourceKey},
        repositories::{CompletionWriter, HeartbeatStore, OutboxReader},
    },
    infrastructure::repositories::postgres::{PostgresHeartbeatStore, PostgresOutboxRepository},
};
use sqlx::postgres::PgPoolOptions;

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to PostgreSQL")
}

#[tokio::test]
#[ignore]
async fn reads_in_order_and_completes_idempotently() {
    let pool = pool().await;
    sqlx::query("CREATE SCHEMA IF NOT EXISTS relay_it").execute(&pool).await.unwrap();
    sqlx::query("DROP TABLE IF EXISTS relay_it.outbox").execute(&pool).await.unwrap();
    sqlx::query(
        r#"
        CREATE TABLE relay_it.outbox (
            id BIGINT PRIMARY KEY,
            aggregate_id TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            published BOOLEAN
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO relay_it.outbox VALUES
            (3, 'a', 'Order', 'OrderShipped', '{"n": 3}', NOW(), NULL),
            (1, 'a', 'Order', 'OrderPlaced', '{"n": 1}', NOW() - INTERVAL '2 minutes', FALSE),
            (2, 'a', 'Order', 'OrderPaid', '{"n": 2}', NOW() - INTERVAL '1 minute', NULL),
            (4, 'b', 'Order', 'OrderPlaced', '{"n": 4}', NOW(), TRUE)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let mut source = SourceDescriptor::new("relay_it", "outbox", "published");
    source.completion_kind = CompletionKind::Flag;
    source.id_type = IdType::Bigint;
    let repository = PostgresOutboxRepository::new(pool.clone());
    repository.verify_source(&source).await.unwrap();

    let batch = repository.fetch_batch(&source).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(batch[0].payload["n"], 1);

    let done = vec![RowId::from(1), RowId::from(3)];
    assert_eq!(repository.mark_completed(&source, &done).await.unwrap(), 2);
    assert_eq!(repository.mark_completed(&source, &done).await.unwrap(), 0);

    let remaining = repository.fetch_batch(&source).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, RowId::from(2));
}

#[tokio::test]
#[ignore]
async fn rejects_a_source_whose_columns_do_not_exist() {
    let pool = pool().await;
    sqlx::query("CREATE SCHEMA IF NOT EXISTS relay_it").execute(&pool).await.unwrap();
    sqlx::query("DROP TABLE IF EXISTS relay_it.narrow").execute(&pool).await.unwrap();
    sqlx::query("CREATE TABLE relay_it.narrow (id UUID PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();

    let source = SourceDescriptor::new("relay_it", "narrow", "published_at");
    let repository = PostgresOutboxRepository::new(pool);
    let err = repository.verify_source(&source).await.unwrap_err();
    assert!(err.to_string().contains("relay_it.narrow"));
}

#[tokio::test]
#[ignore]
async fn heartbeats_never_move_backwards() {
    let pool = pool().await;
    let store = PostgresHeartbeatStore::new(pool);
    store.migrate().await.unwrap();

    let key = SourceKey::new("relay_it", "heartbeat");
    let newer = Utc::now();
    let older = newer - chrono::Duration::minutes(5);
    store.record(&key, newer).await.unwrap();
    store.record(&key, older).await.unwrap();

    let loaded: HashMap<SourceKey, _> = store.load().await.unwrap();
    let stored = loaded[&key];
    assert!((stored - newer).num_milliseconds().abs() < 1);
}

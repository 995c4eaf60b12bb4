use std::sync::Arc;

use outbox_relay::{
    application::{
        handlers::{scheduler::RelayScheduler, source_poller::SourcePoller},
        services::{
            metrics::MetricsSink, publisher::EventPublisher, staleness::StalenessTracker,
        },
        usecases::check_readiness::CheckReadinessUseCase,
    },
    config::Config,
    infrastructure::{
        messaging::jetstream::{JetstreamBus, JetstreamConfig},
        metrics::prometheus::PrometheusMetrics,
        repositories::postgres::{PostgresHeartbeatStore, PostgresOutboxRepository},
    },
    presentation::http::{endpoints::root::ApiState, routes},
    shutdown::wait_for_signal,
};
use poem::{Server, listener::TcpListener};
use sqlx::postgres::PgPoolOptions;
use tokio::main;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::try_parse()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let repository = PostgresOutboxRepository::new(pool.clone());
    for source in &config.sources {
        if let Err(err) = repository.verify_source(source).await {
            error!(source = %source.key(), error = %err, "outbox source failed schema verification");
            return Err(err.into());
        }
    }
    info!(sources = config.sources.len(), "outbox sources verified");

    let bus = JetstreamBus::connect(&JetstreamConfig {
        url: config.nats_url.clone(),
        connection_name: "outbox-relay".to_string(),
    })
    .await?;
    let metrics = Arc::new(PrometheusMetrics::new()?);

    let mut tracker = StalenessTracker::new(config.sources.iter().map(|source| source.key()));
    if config.persist_heartbeats {
        let store = PostgresHeartbeatStore::new(pool.clone());
        store.migrate().await?;
        tracker = tracker.with_store(store);
        if let Err(err) = tracker.seed_from_store().await {
            warn!(error = %err, "could not seed heartbeats, sources start as stale");
        }
    }
    let tracker = Arc::new(tracker);

    let publisher = Arc::new(EventPublisher::new(bus, config.retry));
    let pollers = config
        .sources
        .iter()
        .cloned()
        .map(|source| {
            SourcePoller::new(
                source,
                repository.clone(),
                repository.clone(),
                publisher.clone(),
                tracker.clone(),
                metrics.clone(),
            )
        })
        .collect();
    let scheduler = Arc::new(RelayScheduler::new(
        pollers,
        metrics.clone() as Arc<dyn MetricsSink>,
        config.shutdown_grace,
    ));

    let shutdown = CancellationToken::new();
    let relay = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let state = ApiState {
        readiness_usecase: Arc::new(CheckReadinessUseCase::new(
            repository.clone(),
            tracker.clone(),
            config.readiness_window,
        )),
        metrics,
    };
    let server_url = format!("http://{}:{}", config.host, config.port);
    info!("Starting server at {}", server_url);

    let app = routes(state, &server_url);
    Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run_with_graceful_shutdown(app, shutdown.clone().cancelled_owned(), Some(config.shutdown_grace))
        .await?;

    // The server also stops on its own errors; make sure the relay follows.
    shutdown.cancel();
    relay.await?;
    info!("outbox relay stopped");
    Ok(())
}

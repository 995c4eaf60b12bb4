pub mod backoff;
pub mod event_bus;
pub mod metrics;
pub mod publisher;
pub mod staleness;

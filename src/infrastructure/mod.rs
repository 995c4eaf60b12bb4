pub mod messaging;
pub mod metrics;
pub mod repositories;

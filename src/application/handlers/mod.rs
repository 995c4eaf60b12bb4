pub mod scheduler;
pub mod source_poller;

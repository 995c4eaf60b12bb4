use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// One message handed to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    /// Messages sharing a partition key keep their relative order at the broker.
    pub partition_key: String,
    /// Stable per row, so the broker can drop re-deliveries inside its
    /// duplicate window.
    pub message_id: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection loss, timeout, leader election or back-pressure. Worth retrying.
    #[error("transient broker error: {0}")]
    Transient(String),
    /// The broker refused this message; retrying now will not help.
    #[error("broker rejected message: {0}")]
    Rejected(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Resolves once the broker has accepted the message under its own
    /// durability contract.
    async fn publish(&self, message: BrokerMessage) -> Result<(), BrokerError>;
}

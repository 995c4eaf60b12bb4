use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::services::event_bus::{BrokerError, BrokerMessage, MessageBus};

#[derive(Default)]
struct BusState {
    published: Vec<BrokerMessage>,
    attempts: usize,
    rejected_ids: HashSet<String>,
    transient_failures: u32,
}

/// Broker double that records accepted messages and can be told to reject
/// specific message ids or fail transiently.
#[derive(Default, Clone)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject(&self, message_id: impl Into<String>) {
        self.state.write().await.rejected_ids.insert(message_id.into());
    }

    pub async fn accept(&self, message_id: &str) {
        self.state.write().await.rejected_ids.remove(message_id);
    }

    /// The next `times` publish calls fail with a transient error.
    pub async fn fail_transiently(&self, times: u32) {
        self.state.write().await.transient_failures = times;
    }

    pub async fn published(&self) -> Vec<BrokerMessage> {
        self.state.read().await.published.clone()
    }

    pub async fn attempts(&self) -> usize {
        self.state.read().await.attempts
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        state.attempts += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(BrokerError::Transient("simulated connection loss".to_string()));
        }
        if state.rejected_ids.contains(&message.message_id) {
            return Err(BrokerError::Rejected(format!(
                "message {} refused",
                message.message_id
            )));
        }
        state.published.push(message);
        Ok(())
    }
}

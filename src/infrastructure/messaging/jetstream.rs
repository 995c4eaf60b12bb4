use std::sync::Arc;

use async_nats::{
    HeaderMap,
    jetstream::{
        self,
        context::{PublishError, PublishErrorKind},
    },
};
use tracing::info;

use crate::application::services::event_bus::{BrokerError, BrokerMessage, MessageBus};

pub const HEADER_MESSAGE_ID: &str = "Nats-Msg-Id";
pub const HEADER_PARTITION_KEY: &str = "partition-key";

#[derive(Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub connection_name: String,
}

/// Publishes to JetStream and waits for the stream's ack. Streams are
/// provisioned outside the relay.
pub struct JetstreamBus {
    context: jetstream::Context,
}

impl JetstreamBus {
    pub async fn connect(config: &JetstreamConfig) -> anyhow::Result<Arc<Self>> {
        let client = async_nats::ConnectOptions::new()
            .name(&config.connection_name)
            .connect(&config.url)
            .await?;
        info!(url = %config.url, "connected to NATS");
        Ok(Arc::new(Self {
            context: jetstream::new(client),
        }))
    }
}

#[async_trait::async_trait]
impl MessageBus for JetstreamBus {
    async fn publish(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), value.as_str());
        }
        headers.insert(HEADER_MESSAGE_ID, message.message_id.as_str());
        headers.insert(HEADER_PARTITION_KEY, message.partition_key.as_str());

        let ack = self
            .context
            .publish_with_headers(message.topic, headers, message.body.into())
            .await
            .map_err(classify)?;
        ack.await.map_err(classify)?;
        Ok(())
    }
}

/// No stream listening on the subject, or a failed expectation, will not fix
/// itself within a cycle. Everything else is treated as transient.
fn classify(err: PublishError) -> BrokerError {
    match err.kind() {
        PublishErrorKind::StreamNotFound
        | PublishErrorKind::WrongLastMessageId
        | PublishErrorKind::WrongLastSequence => BrokerError::Rejected(err.to_string()),
        _ => BrokerError::Transient(err.to_string()),
    }
}

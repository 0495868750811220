#[cfg(feature = "kafka")]
pub mod kafka;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use visible_light_common::command::BusMessage;

use crate::pending::PendingCommands;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBus;

/// Messages a slow subscriber may fall behind by before it starts losing them.
const SUBSCRIBER_CAPACITY: usize = 64;

/// Publish/subscribe transport for capture commands and upload notices.
pub trait CommandBus: Send + Sync {
    /// Enqueue `message` for delivery. Never blocks on subscribers.
    fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    /// Receive every message published on the bus from now on, including this
    /// process's own publications.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no subscriber for topic {0}")]
    NoSubscribers(&'static str),
    #[error("failed to create Kafka client: {0}")]
    KafkaCreate(String),
    #[error("failed to publish to topic {topic}: {reason}")]
    Publish { topic: &'static str, reason: String },
}

/// In-process bus backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus for LocalBus {
    fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let topic = message.topic();
        debug!(topic, "publishing on local bus");
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers(topic))
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

/// Feed capture commands from a bus subscription into the pending slots
/// until the bus closes.
pub async fn run_subscription(
    mut messages: broadcast::Receiver<BusMessage>,
    pending: Arc<PendingCommands>,
) {
    info!("command subscription started");
    loop {
        match messages.recv().await {
            Ok(message) => {
                if pending.accept(&message) {
                    debug!(topic = message.topic(), "capture command received");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "command subscription lagged, messages lost");
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("command bus closed, subscription ending");
                return;
            }
        }
    }
}

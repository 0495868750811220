use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use visible_light_common::command::{BusMessage, ALL_TOPICS};

use super::{BusError, CommandBus, SUBSCRIBER_CAPACITY};

/// Command bus over Kafka, one topic per message kind.
///
/// Messages consumed from the brokers, this process's own publications
/// included, are re-broadcast to local subscribers.
pub struct KafkaBus {
    producer: FutureProducer,
    local: broadcast::Sender<BusMessage>,
}

impl KafkaBus {
    /// Must be called from within a tokio runtime.
    pub fn connect(brokers: &str, group_id: &str) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("linger.ms", "0")
            .set("request.timeout.ms", "5000")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BusError::KafkaCreate(e.to_string()))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .create()
            .map_err(|e| BusError::KafkaCreate(e.to_string()))?;

        consumer
            .subscribe(&ALL_TOPICS)
            .map_err(|e| BusError::KafkaCreate(e.to_string()))?;

        info!(brokers, group_id, topics = ?ALL_TOPICS, "subscribed to Kafka command topics");

        let (local, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        tokio::spawn(run_consumer(consumer, local.clone()));

        Ok(Self { producer, local })
    }
}

impl CommandBus for KafkaBus {
    fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let topic = message.topic();
        let payload = message.payload();
        let record = FutureRecord::to(topic).key(topic).payload(payload.as_slice());

        // Enqueue only; delivery is confirmed asynchronously by librdkafka.
        match self.producer.send_result(record) {
            Ok(_delivery) => {
                debug!(topic, bytes = payload.len(), "published to Kafka");
                Ok(())
            }
            Err((e, _)) => Err(BusError::Publish {
                topic,
                reason: e.to_string(),
            }),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.local.subscribe()
    }
}

async fn run_consumer(consumer: StreamConsumer, local: broadcast::Sender<BusMessage>) {
    loop {
        match consumer.recv().await {
            Ok(msg) => {
                let payload = msg.payload().unwrap_or(&[]);
                match BusMessage::decode(msg.topic(), payload) {
                    Ok(message) => {
                        if local.send(message).is_err() {
                            debug!(topic = msg.topic(), "no local subscriber for Kafka message");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, topic = msg.topic(), "undecodable bus message, skipping");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Kafka consume error");
            }
        }
    }
}

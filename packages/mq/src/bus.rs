use async_trait::async_trait;
use broccoli_queue::brokers::broker::BrokerMessage;
use common::{JobMessage, JobTopic};

use crate::error::MqError;

/// A message handed to a consumer, to be acknowledged once processed.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: JobMessage,
    pub(crate) receipt: Receipt,
}

#[derive(Debug, Clone)]
pub(crate) enum Receipt {
    InProcess,
    Broker(Box<BrokerMessage<JobMessage>>),
}

impl Delivery {
    pub fn topic(&self) -> JobTopic {
        self.message.topic
    }
}

/// Topic-partitioned transport for job messages.
///
/// Delivery within a topic is roughly FIFO. Nothing is promised across
/// topics or after a redelivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Send a message to the queue of its topic.
    async fn publish(&self, message: &JobMessage) -> Result<(), MqError>;

    /// Wait for the next message of `topic`.
    async fn receive(&self, topic: JobTopic) -> Result<Delivery, MqError>;

    /// Confirm that a delivery has been handled and must not be redelivered.
    async fn ack(&self, delivery: Delivery) -> Result<(), MqError>;
}

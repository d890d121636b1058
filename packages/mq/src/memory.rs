use std::collections::HashMap;

use async_trait::async_trait;
use common::{JobMessage, JobTopic};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::bus::{Delivery, MessageBus, Receipt};
use crate::error::MqError;

struct TopicChannel {
    tx: mpsc::UnboundedSender<JobMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<JobMessage>>,
}

/// In-process bus: one unbounded FIFO channel per topic.
///
/// Messages live only as long as the process; the job rows in the database
/// remain the durable record.
pub struct MemoryBus {
    topics: HashMap<JobTopic, TopicChannel>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let topics = JobTopic::ALL
            .iter()
            .map(|topic| {
                let (tx, rx) = mpsc::unbounded_channel();
                (
                    *topic,
                    TopicChannel {
                        tx,
                        rx: Mutex::new(rx),
                    },
                )
            })
            .collect();
        Self { topics }
    }

    fn channel(&self, topic: JobTopic) -> Result<&TopicChannel, MqError> {
        self.topics
            .get(&topic)
            .ok_or_else(|| MqError::Closed(topic.to_string()))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, message: &JobMessage) -> Result<(), MqError> {
        self.channel(message.topic)?
            .tx
            .send(message.clone())
            .map_err(|_| MqError::Closed(message.topic.to_string()))?;
        debug!(job_uid = %message.job_uid, topic = %message.topic, "Published in-process");
        Ok(())
    }

    async fn receive(&self, topic: JobTopic) -> Result<Delivery, MqError> {
        let mut rx = self.channel(topic)?.rx.lock().await;
        let message = rx
            .recv()
            .await
            .ok_or_else(|| MqError::Closed(topic.to_string()))?;
        Ok(Delivery {
            message,
            receipt: Receipt::InProcess,
        })
    }

    async fn ack(&self, _delivery: Delivery) -> Result<(), MqError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(uid: &str, topic: JobTopic) -> JobMessage {
        JobMessage {
            job_uid: uid.into(),
            topic,
            command: None,
            image_uid: None,
            payload: "{}".into(),
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let bus = MemoryBus::new();
        for i in 0..5 {
            bus.publish(&message(&format!("j{i}"), JobTopic::ImageProcess))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let d = bus.receive(JobTopic::ImageProcess).await.unwrap();
            assert_eq!(d.message.job_uid, format!("j{i}"));
            bus.ack(d).await.unwrap();
        }
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = MemoryBus::new();
        bus.publish(&message("x", JobTopic::XmpGeneration))
            .await
            .unwrap();
        bus.publish(&message("e", JobTopic::ExifProcess))
            .await
            .unwrap();

        let d = bus.receive(JobTopic::ExifProcess).await.unwrap();
        assert_eq!(d.message.job_uid, "e");
        assert_eq!(d.topic(), JobTopic::ExifProcess);

        let d = bus.receive(JobTopic::XmpGeneration).await.unwrap();
        assert_eq!(d.message.job_uid, "x");
    }
}

use async_trait::async_trait;
use broccoli_queue::queue::BroccoliQueue;
use common::config::MqAppConfig;
use common::{JobMessage, JobTopic};
use tracing::{debug, info};

use crate::bus::{Delivery, MessageBus, Receipt};
use crate::error::MqError;

/// Durable bus on Redis through `broccoli_queue`, one queue per topic.
pub struct RedisBus {
    queue: BroccoliQueue,
    config: MqAppConfig,
}

impl RedisBus {
    pub async fn connect(config: &MqAppConfig) -> Result<Self, MqError> {
        let queue = BroccoliQueue::builder(&config.url)
            .pool_connections(config.pool_size)
            .build()
            .await?;
        info!(url = %config.url, pool_size = config.pool_size, "Connected to message broker");
        Ok(Self {
            queue,
            config: config.clone(),
        })
    }

    fn queue_name(&self, topic: JobTopic) -> String {
        self.config.queue_name(topic)
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, message: &JobMessage) -> Result<(), MqError> {
        let name = self.queue_name(message.topic);
        self.queue.publish(&name, None, message, None).await?;
        debug!(job_uid = %message.job_uid, queue = %name, "Published to broker");
        Ok(())
    }

    async fn receive(&self, topic: JobTopic) -> Result<Delivery, MqError> {
        let name = self.queue_name(topic);
        let broker_message = self.queue.consume::<JobMessage>(&name, None).await?;
        Ok(Delivery {
            message: broker_message.payload.clone(),
            receipt: Receipt::Broker(Box::new(broker_message)),
        })
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), MqError> {
        match delivery.receipt {
            Receipt::Broker(broker_message) => {
                let name = self.queue_name(delivery.message.topic);
                self.queue.acknowledge(&name, *broker_message).await?;
                Ok(())
            }
            Receipt::InProcess => Ok(()),
        }
    }
}

use serde::Deserialize;

use crate::job::JobTopic;
use crate::retry::RetryPolicy;

/// Smallest and largest concurrency a topic may be set to.
pub const MIN_TOPIC_CONCURRENCY: usize = 1;
pub const MAX_TOPIC_CONCURRENCY: usize = 100;

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Use the Redis broker. When false, an in-process bus is used. Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Prefix for per-topic queue names. Default: "lumen".
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_queue_prefix() -> String {
    "lumen".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_prefix: default_queue_prefix(),
        }
    }
}

impl MqAppConfig {
    /// Queue name used on the broker for a topic.
    pub fn queue_name(&self, topic: JobTopic) -> String {
        format!("{}.{}", self.queue_prefix, topic.as_str())
    }
}

/// Initial concurrency per topic.
#[derive(Debug, Deserialize, Clone)]
pub struct TopicConcurrency {
    #[serde(default = "default_image_process")]
    pub image_process: usize,
    #[serde(default = "default_light_topic")]
    pub exif_process: usize,
    #[serde(default = "default_light_topic")]
    pub xmp_generation: usize,
}

fn default_image_process() -> usize {
    2
}
fn default_light_topic() -> usize {
    4
}

impl Default for TopicConcurrency {
    fn default() -> Self {
        Self {
            image_process: default_image_process(),
            exif_process: default_light_topic(),
            xmp_generation: default_light_topic(),
        }
    }
}

impl TopicConcurrency {
    pub fn for_topic(&self, topic: JobTopic) -> usize {
        let n = match topic {
            JobTopic::ImageProcess => self.image_process,
            JobTopic::ExifProcess => self.exif_process,
            JobTopic::XmpGeneration => self.xmp_generation,
        };
        n.clamp(MIN_TOPIC_CONCURRENCY, MAX_TOPIC_CONCURRENCY)
    }
}

/// Worker pool configuration shared by the server and the pool.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct JobsConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub concurrency: TopicConcurrency,
}

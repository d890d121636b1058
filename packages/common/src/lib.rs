pub mod asset;
pub mod config;
pub mod event;
pub mod job;
pub mod retry;
pub mod storage;
pub mod uid;

pub use asset::{CaptureTimes, ColorLabel, EmbeddedTags, ExifData, ImageMetadata};
pub use job::{JobCommand, JobMessage, JobStatus, JobTopic};

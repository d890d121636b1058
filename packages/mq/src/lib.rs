//! Message bus seam of the job system.
//!
//! The server talks to [`MessageBus`] only. [`RedisBus`] is the durable
//! broker used in deployments; [`MemoryBus`] keeps everything in-process for
//! single-node setups and tests.

pub mod bus;
pub mod error;
pub mod memory;
pub mod redis;

pub use bus::{Delivery, MessageBus};
pub use error::MqError;
pub use memory::MemoryBus;
pub use redis::RedisBus;

//! Worker pool for the job bus.
//!
//! | Piece | Role |
//! |---|---|
//! | [`Governors`] | one resizable semaphore per topic plus a running count |
//! | [`WorkerPool`] | dispatch loop per topic, panic recovery, retries |
//! | [`JobHandler`] | the work for one topic |
//! | [`JobLifecycle`] | where started/progress/completed/failed are reported |

pub mod error;
pub mod governor;
pub mod handler;
pub mod pool;

pub use error::{JobError, Result, WorkerError};
pub use governor::{Governor, Governors};
pub use handler::{JobContext, JobFailure, JobHandler, JobLifecycle};
pub use pool::WorkerPool;

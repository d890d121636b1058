use thiserror::Error;

/// How a handler run ended when it did not succeed.
#[derive(Debug, Error)]
pub enum JobError {
    /// Worth another attempt under the retry policy.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help (undecodable file, missing row, ...).
    #[error("{0}")]
    Fatal(String),

    /// The job was cancelled while the handler was running.
    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn fatal(err: impl std::fmt::Display) -> Self {
        Self::Fatal(err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("Worker pool is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WorkerError>;

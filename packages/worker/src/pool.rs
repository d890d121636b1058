use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::job::JobErrorCode;
use common::retry::{RetryDecision, RetryHistory, RetryPolicy};
use common::{JobMessage, JobTopic, job::bound_error_msg};
use futures::FutureExt;
use mq::{Delivery, MessageBus};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::governor::{Governor, Governors, Permit};
use crate::handler::{JobContext, JobFailure, JobHandler, JobLifecycle};

/// Pause after a failed receive before asking the bus again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Dispatches bus messages to handlers, one loop per topic.
///
/// A loop takes a slot from its topic's governor before it asks the bus for
/// a message, so a busy topic never holds messages it cannot run and never
/// blocks other topics.
pub struct WorkerPool {
    bus: Arc<dyn MessageBus>,
    lifecycle: Arc<dyn JobLifecycle>,
    governors: Arc<Governors>,
    retry: RetryPolicy,
    handlers: HashMap<JobTopic, Arc<dyn JobHandler>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        lifecycle: Arc<dyn JobLifecycle>,
        governors: Arc<Governors>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            bus,
            lifecycle,
            governors,
            retry,
            handlers: HashMap::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn register(&mut self, topic: JobTopic, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(topic, handler);
        self
    }

    pub fn governors(&self) -> &Arc<Governors> {
        &self.governors
    }

    /// Spawn the dispatch loops. Topics without a handler are not consumed.
    pub fn start(&self) {
        for (topic, handler) in &self.handlers {
            let Some(governor) = self.governors.get(*topic).cloned() else {
                warn!(topic = %topic, "No governor for topic, not dispatching");
                continue;
            };
            let dispatcher = Dispatcher {
                topic: *topic,
                bus: Arc::clone(&self.bus),
                lifecycle: Arc::clone(&self.lifecycle),
                handler: Arc::clone(handler),
                governor,
                retry: self.retry.clone(),
                cancel: self.cancel.clone(),
                tracker: self.tracker.clone(),
            };
            self.tracker.spawn(dispatcher.run());
            info!(topic = %topic, "Dispatcher started");
        }
    }

    /// Stop taking messages and wait up to `grace` for running jobs.
    ///
    /// Jobs still running after the grace period are left unacknowledged;
    /// a durable bus redelivers them.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.governors.close();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Jobs still running after shutdown grace period"
            );
        } else {
            info!("Worker pool stopped");
        }
    }
}

struct Dispatcher {
    topic: JobTopic,
    bus: Arc<dyn MessageBus>,
    lifecycle: Arc<dyn JobLifecycle>,
    handler: Arc<dyn JobHandler>,
    governor: Arc<Governor>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    async fn run(self) {
        let this = Arc::new(self);
        loop {
            let permit = tokio::select! {
                _ = this.cancel.cancelled() => break,
                permit = this.governor.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = this.cancel.cancelled() => break,
                delivery = this.bus.receive(this.topic) => delivery,
            };

            match delivery {
                Ok(delivery) => {
                    let job = Arc::clone(&this);
                    this.tracker.spawn(async move { job.process(delivery, permit).await });
                }
                Err(e) => {
                    drop(permit);
                    error!(topic = %this.topic, error = %e, "Failed to receive from bus");
                    tokio::select! {
                        _ = this.cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }
        debug!(topic = %this.topic, "Dispatcher stopped");
    }

    async fn process(&self, delivery: Delivery, permit: Permit) {
        let message = delivery.message.clone();

        if !self.lifecycle.on_started(&message).await {
            debug!(job_uid = %message.job_uid, "Job skipped at start");
            self.ack(delivery).await;
            return;
        }

        let mut history = RetryHistory::default();
        let mut attempt = 1;
        let mut slot = Some(permit);

        loop {
            let permit = match slot.take() {
                Some(permit) => permit,
                None => match self.governor.acquire().await {
                    Ok(permit) => permit,
                    // Shutting down between attempts: leave the delivery unacked.
                    Err(_) => return,
                },
            };

            let outcome = {
                let _running = self.governor.enter();
                let ctx = JobContext::new(message.clone(), attempt, Arc::clone(&self.lifecycle));
                AssertUnwindSafe(self.handler.handle(&ctx))
                    .catch_unwind()
                    .await
            };
            drop(permit);

            let error = match outcome {
                Ok(Ok(())) => {
                    self.lifecycle.on_completed(&message).await;
                    break;
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!(job_uid = %message.job_uid, "Job observed cancellation");
                    self.lifecycle.on_cancelled(&message).await;
                    break;
                }
                Ok(Err(JobError::Fatal(msg))) => {
                    history.record(attempt, msg.clone());
                    self.fail(&message, JobErrorCode::HANDLER_FAILED, msg, history, false)
                        .await;
                    break;
                }
                Ok(Err(JobError::Transient(msg))) => msg,
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    error!(job_uid = %message.job_uid, topic = %self.topic, panic = %msg, "Handler panicked");
                    format!("handler panicked: {msg}")
                }
            };

            history.record(attempt, error.clone());
            match self.retry.decide(attempt) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    warn!(
                        job_uid = %message.job_uid,
                        topic = %self.topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying job"
                    );
                    self.lifecycle.on_retry(&message, attempt, &error).await;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if self.lifecycle.is_cancelled(&message.job_uid) {
                        self.lifecycle.on_cancelled(&message).await;
                        break;
                    }
                    attempt = next_attempt;
                }
                RetryDecision::Exhausted => {
                    error!(
                        job_uid = %message.job_uid,
                        topic = %self.topic,
                        attempts = history.len(),
                        error = %error,
                        "Max retries exhausted"
                    );
                    self.fail(
                        &message,
                        JobErrorCode::MAX_RETRIES_EXCEEDED,
                        error,
                        history,
                        true,
                    )
                    .await;
                    break;
                }
            }
        }

        self.ack(delivery).await;
    }

    async fn fail(
        &self,
        message: &JobMessage,
        code: &'static str,
        error: String,
        history: RetryHistory,
        retries_exhausted: bool,
    ) {
        self.lifecycle
            .on_failed(
                message,
                JobFailure {
                    error_code: code,
                    error_msg: bound_error_msg(&error),
                    history,
                    retries_exhausted,
                },
            )
            .await;
    }

    async fn ack(&self, delivery: Delivery) {
        let job_uid = delivery.message.job_uid.clone();
        if let Err(e) = self.bus.ack(delivery).await {
            error!(job_uid = %job_uid, error = %e, "Failed to acknowledge delivery");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

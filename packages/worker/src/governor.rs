//! Per-topic concurrency governors whose size can change at runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::JobTopic;
use common::config::{MAX_TOPIC_CONCURRENCY, MIN_TOPIC_CONCURRENCY, TopicConcurrency};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::error::WorkerError;

#[derive(Debug)]
struct Sizing {
    limit: usize,
    /// Permits that must be retired as they are returned, owed after a
    /// shrink that found fewer idle permits than it needed.
    debt: usize,
}

/// A semaphore that can grow and shrink.
///
/// Growing adds permits immediately. Shrinking retires idle permits at once
/// and the rest as running holders release them, so running work is never
/// interrupted.
#[derive(Debug)]
pub struct Governor {
    topic: JobTopic,
    semaphore: Arc<Semaphore>,
    sizing: Mutex<Sizing>,
    running: AtomicUsize,
}

impl Governor {
    pub fn new(topic: JobTopic, limit: usize) -> Arc<Self> {
        let limit = clamp(limit);
        Arc::new(Self {
            topic,
            semaphore: Arc::new(Semaphore::new(limit)),
            sizing: Mutex::new(Sizing { limit, debt: 0 }),
            running: AtomicUsize::new(0),
        })
    }

    pub fn topic(&self) -> JobTopic {
        self.topic
    }

    pub fn limit(&self) -> usize {
        self.sizing.lock().map(|s| s.limit).unwrap_or(MIN_TOPIC_CONCURRENCY)
    }

    /// Handlers of this topic executing right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> Result<Permit, WorkerError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Closed)?;
        Ok(Permit {
            permit: Some(permit),
            governor: Arc::clone(self),
        })
    }

    /// Change the limit, clamped to the allowed range. Returns the new limit.
    pub fn resize(&self, limit: usize) -> usize {
        let limit = clamp(limit);
        let Ok(mut sizing) = self.sizing.lock() else {
            return limit;
        };

        if limit > sizing.limit {
            let grow = limit - sizing.limit;
            let repaid = grow.min(sizing.debt);
            sizing.debt -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else if limit < sizing.limit {
            let shrink = sizing.limit - limit;
            let retired = self.semaphore.forget_permits(shrink);
            sizing.debt += shrink - retired;
        }

        info!(
            topic = %self.topic,
            from = sizing.limit,
            to = limit,
            pending_retirements = sizing.debt,
            "Topic concurrency changed"
        );
        sizing.limit = limit;
        limit
    }

    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Mark a handler as executing until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> RunningGuard {
        self.running.fetch_add(1, Ordering::SeqCst);
        RunningGuard {
            governor: Arc::clone(self),
        }
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        if let Ok(mut sizing) = self.sizing.lock()
            && sizing.debt > 0
        {
            sizing.debt -= 1;
            permit.forget();
        }
    }
}

fn clamp(limit: usize) -> usize {
    limit.clamp(MIN_TOPIC_CONCURRENCY, MAX_TOPIC_CONCURRENCY)
}

/// A held slot. Returned to the governor (or retired) on drop.
#[derive(Debug)]
pub struct Permit {
    permit: Option<OwnedSemaphorePermit>,
    governor: Arc<Governor>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.governor.release(permit);
        }
    }
}

#[derive(Debug)]
pub struct RunningGuard {
    governor: Arc<Governor>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.governor.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One governor per topic, shared by the dispatcher and the admin surface.
#[derive(Debug)]
pub struct Governors {
    topics: HashMap<JobTopic, Arc<Governor>>,
}

impl Governors {
    pub fn new(initial: &TopicConcurrency) -> Self {
        let topics = JobTopic::ALL
            .iter()
            .map(|topic| (*topic, Governor::new(*topic, initial.for_topic(*topic))))
            .collect();
        Self { topics }
    }

    pub fn get(&self, topic: JobTopic) -> Option<&Arc<Governor>> {
        self.topics.get(&topic)
    }

    pub fn set_concurrency(&self, topic: JobTopic, limit: usize) -> Option<usize> {
        self.get(topic).map(|g| g.resize(limit))
    }

    pub fn running(&self, topic: JobTopic) -> usize {
        self.get(topic).map(|g| g.running()).unwrap_or(0)
    }

    pub fn running_by_topic(&self) -> HashMap<JobTopic, usize> {
        self.topics.iter().map(|(t, g)| (*t, g.running())).collect()
    }

    pub fn limits(&self) -> HashMap<JobTopic, usize> {
        self.topics.iter().map(|(t, g)| (*t, g.limit())).collect()
    }

    pub fn close(&self) {
        for governor in self.topics.values() {
            governor.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn available(g: &Governor) -> usize {
        g.semaphore.available_permits()
    }

    #[tokio::test]
    async fn grow_adds_permits() {
        let g = Governor::new(JobTopic::ImageProcess, 2);
        assert_eq!(g.resize(5), 5);
        assert_eq!(available(&g), 5);
    }

    #[tokio::test]
    async fn shrink_waits_for_holders() {
        let g = Governor::new(JobTopic::ImageProcess, 3);
        let a = g.acquire().await.unwrap();
        let b = g.acquire().await.unwrap();

        // One idle permit can go now; one more is owed by the holders.
        g.resize(1);
        assert_eq!(available(&g), 0);

        drop(a);
        assert_eq!(available(&g), 0, "first release pays the debt");
        drop(b);
        assert_eq!(available(&g), 1);
    }

    #[tokio::test]
    async fn grow_after_shrink_cancels_debt() {
        let g = Governor::new(JobTopic::ExifProcess, 2);
        let a = g.acquire().await.unwrap();
        let b = g.acquire().await.unwrap();
        g.resize(1);
        g.resize(2);
        drop(a);
        drop(b);
        assert_eq!(available(&g), 2);
    }

    #[tokio::test]
    async fn limits_are_clamped() {
        let g = Governor::new(JobTopic::XmpGeneration, 0);
        assert_eq!(g.limit(), 1);
        assert_eq!(g.resize(1_000), 100);
    }

    #[tokio::test]
    async fn closed_governor_rejects_waiters() {
        let g = Governor::new(JobTopic::ImageProcess, 1);
        let _held = g.acquire().await.unwrap();
        let waiter = {
            let g = g.clone();
            tokio::spawn(async move { g.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        g.close();
        assert!(matches!(waiter.await.unwrap(), Err(WorkerError::Closed)));
    }

    #[test]
    fn running_guard_counts() {
        let g = Governor::new(JobTopic::ImageProcess, 1);
        let guard = g.enter();
        assert_eq!(g.running(), 1);
        drop(guard);
        assert_eq!(g.running(), 0);
    }
}

//! Per-category reconnect scheduling.

use async_trait::async_trait;
use enforcer_xds_protocol::ResourceCategory;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;

/// Something the scheduler can drive back to a working stream.
#[async_trait]
pub trait Reconnect: Send + Sync + 'static {
    /// Make one reconnect attempt. Failures are handled by the implementor.
    async fn reconnect(&self);
}

struct RetryTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RetryTask {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

#[derive(Default)]
struct Inner {
    policy: RetryPolicy,
    targets: Mutex<HashMap<ResourceCategory, Weak<dyn Reconnect>>>,
    tasks: Mutex<HashMap<ResourceCategory, RetryTask>>,
}

/// Runs at most one reconnect loop per category.
///
/// Cloning yields another handle on the same scheduler.
#[derive(Clone, Default)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

impl RetryScheduler {
    /// Create a scheduler with `policy` timing.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                ..Inner::default()
            }),
        }
    }

    /// Timing used by new retry loops.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Make `target` the reconnect target of `category`.
    ///
    /// The scheduler holds a weak reference; a loop whose target is gone
    /// ends on its next attempt.
    pub fn register(&self, category: ResourceCategory, target: Weak<dyn Reconnect>) {
        self.inner.targets.lock().insert(category, target);
    }

    /// Start the retry loop for `category` unless one is already active.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_retry(&self, category: ResourceCategory) {
        let Some(target) = self.inner.targets.lock().get(&category).cloned() else {
            warn!("No reconnect target registered for {}", category);
            return;
        };

        let mut tasks = self.inner.tasks.lock();
        if tasks.get(&category).is_some_and(RetryTask::is_active) {
            debug!("Retry for {} already scheduled", category);
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(retry_loop(
            category,
            target,
            self.inner.policy,
            token.clone(),
        ));

        info!("Scheduled reconnect attempts for {}", category);
        tasks.insert(category, RetryTask { token, handle });
    }

    /// Stop the retry loop for `category`, if any.
    ///
    /// An attempt already running is allowed to finish.
    pub fn stop_retry(&self, category: ResourceCategory) {
        if let Some(task) = self.inner.tasks.lock().remove(&category) {
            if task.is_active() {
                debug!("Stopping reconnect attempts for {}", category);
            }
            task.token.cancel();
        }
    }

    /// Whether a retry loop for `category` is running.
    #[must_use]
    pub fn is_active(&self, category: ResourceCategory) -> bool {
        self.inner
            .tasks
            .lock()
            .get(&category)
            .is_some_and(RetryTask::is_active)
    }

    /// Number of running retry loops.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .values()
            .filter(|task| task.is_active())
            .count()
    }

    /// Stop every retry loop.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.inner.tasks.lock().drain().collect();
        for (category, task) in tasks {
            debug!("Cancelling reconnect attempts for {}", category);
            task.token.cancel();
        }
    }
}

async fn retry_loop(
    category: ResourceCategory,
    target: Weak<dyn Reconnect>,
    policy: RetryPolicy,
    token: CancellationToken,
) {
    let mut completed = 0u32;

    loop {
        let delay = policy.delay_after(completed);
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        let Some(target) = target.upgrade() else {
            debug!("Reconnect target for {} dropped", category);
            break;
        };

        completed = completed.saturating_add(1);
        debug!("Reconnect attempt {} for {}", completed, category);
        target.reconnect().await;

        if token.is_cancelled() {
            break;
        }
    }

    debug!("Reconnect loop for {} finished", category);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        attempts: AtomicUsize,
        stop_after: Option<(usize, RetryScheduler)>,
    }

    #[async_trait]
    impl Reconnect for Counter {
        async fn reconnect(&self) {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, scheduler)) = &self.stop_after {
                if n >= *limit {
                    scheduler.stop_retry(ResourceCategory::Apis);
                }
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(1),
            retry_period: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    fn register(scheduler: &RetryScheduler, counter: &Arc<Counter>) {
        let target: Arc<dyn Reconnect> = counter.clone();
        scheduler.register(ResourceCategory::Apis, Arc::downgrade(&target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let scheduler = RetryScheduler::new(policy());
        let counter = Arc::new(Counter::default());
        register(&scheduler, &counter);

        scheduler.start_retry(ResourceCategory::Apis);
        scheduler.start_retry(ResourceCategory::Apis);
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.attempts.load(Ordering::SeqCst), 1);

        scheduler.stop_retry(ResourceCategory::Apis);
        scheduler.stop_retry(ResourceCategory::Apis);
        assert!(!scheduler.is_active(ResourceCategory::Apis));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_follow_backoff() {
        let scheduler = RetryScheduler::new(policy());
        let counter = Arc::new(Counter::default());
        register(&scheduler, &counter);

        let start = tokio::time::Instant::now();
        scheduler.start_retry(ResourceCategory::Apis);

        // Attempts land at 1s, 6s, 16s, 36s, 76s, 116s.
        for (at_millis, expected) in [
            (900, 0),
            (1_100, 1),
            (5_900, 1),
            (6_100, 2),
            (16_100, 3),
            (36_100, 4),
            (76_100, 5),
            (115_900, 5),
            (116_100, 6),
        ] {
            tokio::time::sleep_until(start + Duration::from_millis(at_millis)).await;
            assert_eq!(
                counter.attempts.load(Ordering::SeqCst),
                expected,
                "attempts at {at_millis}ms"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_inside_attempt() {
        let scheduler = RetryScheduler::new(policy());
        let counter = Arc::new(Counter {
            attempts: AtomicUsize::new(0),
            stop_after: Some((2, scheduler.clone())),
        });
        register(&scheduler, &counter);

        scheduler.start_retry(ResourceCategory::Apis);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(counter.attempts.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_active(ResourceCategory::Apis));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_target_ends_loop() {
        let scheduler = RetryScheduler::new(policy());
        let counter = Arc::new(Counter::default());
        register(&scheduler, &counter);

        scheduler.start_retry(ResourceCategory::Apis);
        drop(counter);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_category_is_ignored() {
        let scheduler = RetryScheduler::new(policy());
        scheduler.start_retry(ResourceCategory::Config);
        assert_eq!(scheduler.active_count(), 0);
    }
}

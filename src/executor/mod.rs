//! Parallel Executor (§4.6): a priority-queued task runner with bounded
//! concurrency, per-task rate limiting, timeout, retry with exponential
//! backoff, and pause/resume/cancel.

mod progress;
mod task;

pub use progress::ExecutorProgress;
pub use task::{Priority, Task, TaskFactory, TaskFuture, TaskOutcome};

use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{watch, Notify};
use tracing::instrument;

use crate::config::ExecutorConfig;
use crate::ratelimit::RateLimiter;

use progress::DurationWindow;
use task::QueuedItem;

const IDLE_POLL: Duration = Duration::from_millis(5);
const PAUSE_POLL: Duration = Duration::from_millis(10);

enum RunOutcome<T> {
    Success(T),
    Failure(String),
    Timeout,
    Cancelled,
}

struct Shared<T> {
    config: ExecutorConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    heap: Mutex<BinaryHeap<QueuedItem<T>>>,
    seq: std::sync::atomic::AtomicU64,
    outstanding: AtomicI64,
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    running: AtomicUsize,
    current_ids: Mutex<FxHashSet<String>>,
    durations: Mutex<DurationWindow>,
    outcomes: Mutex<Vec<TaskOutcome<T>>>,
    paused: AtomicBool,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    progress_tx: watch::Sender<ExecutorProgress>,
}

impl<T> Shared<T> {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn emit_progress(&self) {
        let pending = self.heap.lock().len();
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let running = self.running.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let done = completed + failed;
        let percentage = if total == 0 { 100.0 } else { (done as f64 / total as f64) * 100.0 };
        let remaining = pending + running;
        let eta = self.durations.lock().eta(remaining, running.max(1));
        let current_ids = self.current_ids.lock().iter().cloned().collect();
        let snapshot = ExecutorProgress {
            total,
            completed,
            failed,
            running,
            pending,
            percentage,
            current_ids,
            eta,
        };
        let _ = self.progress_tx.send(snapshot);
    }

    fn retry_delay(&self, retries: u32) -> Duration {
        let base = self.config.retry_delay_ms as f64;
        let factor = self.config.backoff.powi(retries as i32);
        Duration::from_millis((base * factor).round().max(0.0) as u64)
    }
}

/// Runs a set of `id -> async fn -> Result<T>` tasks under bounded
/// concurrency, priority ordering, rate limiting, timeout, and retry (§4.6).
pub struct ParallelExecutor<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ParallelExecutor<T> {
    pub fn new(config: ExecutorConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        let (progress_tx, _rx) = watch::channel(ExecutorProgress::default());
        Self {
            shared: Arc::new(Shared {
                config,
                rate_limiter,
                heap: Mutex::new(BinaryHeap::new()),
                seq: std::sync::atomic::AtomicU64::new(0),
                outstanding: AtomicI64::new(0),
                total: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                current_ids: Mutex::new(FxHashSet::default()),
                durations: Mutex::new(DurationWindow::new(64)),
                outcomes: Mutex::new(Vec::new()),
                paused: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                progress_tx,
            }),
        }
    }

    /// Subscribe to `ExecutorProgress` snapshots, emitted after every state
    /// change.
    pub fn subscribe(&self) -> watch::Receiver<ExecutorProgress> {
        self.shared.progress_tx.subscribe()
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Idempotent.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Aborts via the cooperative signal, clears the pending queue (each
    /// cleared task is finalized as cancelled), and lets running tasks
    /// observe the signal at their own suspension points.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.cancel_notify.notify_waiters();
        let drained: Vec<QueuedItem<T>> = {
            let mut heap = self.shared.heap.lock();
            std::iter::from_fn(|| heap.pop()).collect()
        };
        for item in drained {
            self.finalize(item.task.id, item.retries, false, None, Some("cancelled".to_string()), Duration::ZERO);
        }
        self.shared.emit_progress();
    }

    fn finalize(
        &self,
        id: String,
        retries: u32,
        success: bool,
        value: Option<T>,
        error: Option<String>,
        duration: Duration,
    ) {
        if success {
            self.shared.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.durations.lock().record(duration);
        self.shared.outcomes.lock().push(TaskOutcome {
            id,
            success,
            value,
            error,
            retries,
            duration,
        });
        self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Submit `tasks` and run them to completion (including retries),
    /// returning one `TaskOutcome` per original task id.
    #[instrument(skip(self, tasks))]
    pub async fn run(&self, tasks: Vec<Task<T>>) -> Vec<TaskOutcome<T>> {
        let total = tasks.len();
        self.shared.total.store(total, Ordering::SeqCst);
        self.shared.outstanding.store(total as i64, Ordering::SeqCst);
        self.shared.outcomes.lock().clear();
        {
            let mut heap = self.shared.heap.lock();
            for task in tasks {
                let seq = self.shared.next_seq();
                heap.push(QueuedItem {
                    priority: task.priority,
                    seq,
                    task,
                    retries: 0,
                });
            }
        }
        self.shared.emit_progress();

        let concurrency = self.shared.config.concurrency.max(1);
        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..concurrency {
            let shared = Arc::clone(&self.shared);
            workers.spawn(Self::worker_loop(shared));
        }
        while workers.join_next().await.is_some() {}

        self.shared.outcomes.lock().clone()
    }

    async fn worker_loop(shared: Arc<Shared<T>>) {
        loop {
            if shared.outstanding.load(Ordering::SeqCst) <= 0 {
                return;
            }
            if shared.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(PAUSE_POLL).await;
                continue;
            }
            let item = { shared.heap.lock().pop() };
            let item = match item {
                Some(item) => item,
                None => {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            };

            if shared.cancelled.load(Ordering::SeqCst) {
                Self::finalize_static(&shared, item.task.id, item.retries, false, None, Some("cancelled".into()), Duration::ZERO);
                continue;
            }

            shared.running.fetch_add(1, Ordering::SeqCst);
            shared.current_ids.lock().insert(item.task.id.clone());
            shared.emit_progress();

            let started = Instant::now();
            let acquired = tokio::select! {
                _ = shared.rate_limiter.acquire() => true,
                _ = shared.cancel_notify.notified() => false,
            };

            let outcome = if !acquired {
                RunOutcome::Cancelled
            } else {
                let timeout_ms = shared.config.task_timeout_ms;
                let fut = (item.task.factory)();
                if timeout_ms == 0 {
                    tokio::select! {
                        res = fut => match res {
                            Ok(v) => RunOutcome::Success(v),
                            Err(e) => RunOutcome::Failure(e),
                        },
                        _ = shared.cancel_notify.notified() => RunOutcome::Cancelled,
                    }
                } else {
                    tokio::select! {
                        res = fut => match res {
                            Ok(v) => RunOutcome::Success(v),
                            Err(e) => RunOutcome::Failure(e),
                        },
                        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => RunOutcome::Timeout,
                        _ = shared.cancel_notify.notified() => RunOutcome::Cancelled,
                    }
                }
            };
            shared.rate_limiter.release().await;

            shared.running.fetch_sub(1, Ordering::SeqCst);
            shared.current_ids.lock().remove(&item.task.id);
            let elapsed = started.elapsed();

            match outcome {
                RunOutcome::Success(value) => {
                    shared.rate_limiter.report_success();
                    Self::finalize_static(&shared, item.task.id, item.retries, true, Some(value), None, elapsed);
                }
                RunOutcome::Cancelled => {
                    Self::finalize_static(&shared, item.task.id, item.retries, false, None, Some("cancelled".into()), elapsed);
                }
                RunOutcome::Failure(msg) => {
                    shared.rate_limiter.report_failure();
                    Self::retry_or_fail(&shared, item, msg, elapsed);
                }
                RunOutcome::Timeout => {
                    shared.rate_limiter.report_failure();
                    Self::retry_or_fail(&shared, item, "task timed out".to_string(), elapsed);
                }
            }
            shared.emit_progress();
        }
    }

    fn retry_or_fail(shared: &Arc<Shared<T>>, item: QueuedItem<T>, message: String, duration: Duration) {
        if item.retries < shared.config.max_retries {
            let delay = shared.retry_delay(item.retries);
            let shared = Arc::clone(shared);
            let retries = item.retries + 1;
            let task = item.task;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if shared.cancelled.load(Ordering::SeqCst) {
                    Self::finalize_static(&shared, task.id, retries, false, None, Some("cancelled".into()), Duration::ZERO);
                    return;
                }
                let seq = shared.next_seq();
                shared.heap.lock().push(QueuedItem {
                    priority: Priority::High,
                    seq,
                    task,
                    retries,
                });
                shared.emit_progress();
            });
        } else {
            Self::finalize_static(shared, item.task.id, item.retries, false, None, Some(message), duration);
        }
    }

    fn finalize_static(
        shared: &Arc<Shared<T>>,
        id: String,
        retries: u32,
        success: bool,
        value: Option<T>,
        error: Option<String>,
        duration: Duration,
    ) {
        if success {
            shared.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            shared.failed.fetch_add(1, Ordering::Relaxed);
        }
        shared.durations.lock().record(duration);
        shared.outcomes.lock().push(TaskOutcome {
            id,
            success,
            value,
            error,
            retries,
            duration,
        });
        shared.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Fan out `f` over `items`, one task per item, at `Normal` priority.
    pub async fn map<I, F, Fut>(&self, items: Vec<I>, f: F) -> Vec<TaskOutcome<T>>
    where
        I: Clone + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let tasks = items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let f = f.clone();
                Task::new(format!("map-{idx}"), Priority::Normal, move || f(item.clone()))
            })
            .collect();
        self.run(tasks).await
    }

    /// Run a fixed set of task factories to completion.
    pub async fn all<F, Fut>(&self, fns: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let tasks = fns
            .into_iter()
            .enumerate()
            .map(|(idx, f)| Task::new(format!("all-{idx}"), Priority::Normal, f))
            .collect();
        self.run(tasks).await
    }
}

impl<T: Send + 'static> ParallelExecutor<T> {
    /// Returns the first successful result among `fns`, racing them
    /// concurrently outside the priority queue (no retry/backoff — first
    /// result wins, success or not).
    pub async fn race<F, Fut>(&self, fns: Vec<F>) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        use futures_util::stream::{FuturesUnordered, StreamExt};
        let mut futures: FuturesUnordered<_> = fns.into_iter().map(|f| tokio::spawn(f())).collect();
        while let Some(joined) = futures.next().await {
            if let Ok(Ok(value)) = joined {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::TokenBucketLimiter;
    use std::sync::atomic::AtomicU32;

    fn config(concurrency: usize) -> ExecutorConfig {
        ExecutorConfig {
            concurrency,
            task_timeout_ms: 200,
            max_retries: 3,
            retry_delay_ms: 5,
            backoff: 2.0,
            queue_high_water: 1000,
            queue_low_water: 100,
        }
    }

    fn unlimited_rate_limiter() -> Arc<dyn RateLimiter> {
        Arc::new(TokenBucketLimiter::new(1000, Duration::from_millis(10), 1000))
    }

    #[tokio::test]
    async fn runs_all_tasks_to_success() {
        let executor: ParallelExecutor<u32> = ParallelExecutor::new(config(4), unlimited_rate_limiter());
        let tasks = (0..5)
            .map(|i| Task::new(format!("t{i}"), Priority::Normal, move || async move { Ok(i) }))
            .collect();
        let outcomes = executor.run(tasks).await;
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let executor: ParallelExecutor<u32> = ParallelExecutor::new(config(2), unlimited_rate_limiter());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let task = Task::new("flaky", Priority::Normal, move || {
            let attempts = Arc::clone(&attempts2);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        });
        let outcomes = executor.run(vec![task]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].retries, 2);
    }

    #[tokio::test]
    async fn permanent_failure_recorded_after_retry_budget_exhausted() {
        let mut cfg = config(1);
        cfg.max_retries = 1;
        let executor: ParallelExecutor<u32> = ParallelExecutor::new(cfg, unlimited_rate_limiter());
        let task = Task::new("always-fails", Priority::Normal, || async { Err("nope".to_string()) });
        let outcomes = executor.run(vec![task]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].retries, 1);
    }

    #[tokio::test]
    async fn never_exceeds_configured_concurrency() {
        let executor: ParallelExecutor<u32> = ParallelExecutor::new(config(2), unlimited_rate_limiter());
        let peak = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));
        let tasks = (0..8)
            .map(|i| {
                let peak = Arc::clone(&peak);
                let current = Arc::clone(&current);
                Task::new(format!("c{i}"), Priority::Normal, move || {
                    let peak = Arc::clone(&peak);
                    let current = Arc::clone(&current);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(0)
                    }
                })
            })
            .collect();
        executor.run(tasks).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_retryable_failure() {
        let mut cfg = config(1);
        cfg.task_timeout_ms = 10;
        cfg.max_retries = 0;
        let executor: ParallelExecutor<u32> = ParallelExecutor::new(cfg, unlimited_rate_limiter());
        let task = Task::new("slow", Priority::Normal, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(1)
        });
        let outcomes = executor.run(vec![task]).await;
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].error.as_deref(), Some("task timed out"));
    }

    #[tokio::test]
    async fn high_priority_tasks_run_before_low() {
        let executor: ParallelExecutor<&'static str> = ParallelExecutor::new(config(1), unlimited_rate_limiter());
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let low = Task::new("low", Priority::Low, move || {
            let order = Arc::clone(&o1);
            async move {
                order.lock().push("low");
                Ok("low")
            }
        });
        let high = Task::new("high", Priority::High, move || {
            let order = Arc::clone(&o2);
            async move {
                order.lock().push("high");
                Ok("high")
            }
        });
        executor.run(vec![low, high]).await;
        assert_eq!(*order.lock(), vec!["high", "low"]);
    }
}

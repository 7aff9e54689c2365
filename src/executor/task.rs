use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Priority tier for a queued task (§4.6). Declared low-to-high so the
/// derived `Ord` ranks `High` greatest — the scheduler's `BinaryHeap` pops
/// the greatest element first, i.e. `High` before `Normal` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Boxed future a task factory produces. Factories (not bare futures) are
/// required because a retried task must be able to run again from scratch.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;
pub type TaskFactory<T> = Arc<dyn Fn() -> TaskFuture<T> + Send + Sync>;

/// One unit of work submitted to the executor: `id -> async fn -> Result<T>`.
pub struct Task<T> {
    pub id: String,
    pub priority: Priority,
    pub factory: TaskFactory<T>,
}

impl<T> Task<T> {
    pub fn new<F, Fut>(id: impl Into<String>, priority: Priority, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        Self {
            id: id.into(),
            priority,
            factory: Arc::new(move || Box::pin(f())),
        }
    }
}

/// A queued (or re-queued, for retries) task awaiting a worker slot.
pub(super) struct QueuedItem<T> {
    pub priority: Priority,
    pub seq: u64,
    pub task: Task<T>,
    pub retries: u32,
}

impl<T> PartialEq for QueuedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for QueuedItem<T> {}

impl<T> PartialOrd for QueuedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedItem<T> {
    /// Higher priority sorts greater (popped first); within a tier, the
    /// smaller sequence number (queued earlier) sorts greater — FIFO within
    /// a priority tier on a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Final outcome of one task id, after any retries.
#[derive(Debug, Clone)]
pub struct TaskOutcome<T> {
    pub id: String,
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    pub retries: u32,
    pub duration: Duration,
}

use std::collections::VecDeque;
use std::time::Duration;

/// Emitted after every state change (§4.6): a point-in-time snapshot of the
/// executor's run, including an ETA derived from the trailing average task
/// duration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub percentage: f64,
    pub current_ids: Vec<String>,
    pub eta: Option<Duration>,
}

/// Trailing window of task durations used to estimate ETA.
pub(super) struct DurationWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl DurationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, d: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(d);
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn eta(&self, remaining: usize, in_flight_divisor: usize) -> Option<Duration> {
        let avg = self.average()?;
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let divisor = in_flight_divisor.max(1) as u32;
        Some((avg * remaining as u32) / divisor)
    }
}

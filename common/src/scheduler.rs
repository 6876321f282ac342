/// Interval bookkeeping for one cooperative task.
///
/// A task that has never run is due immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTask {
    interval_ms: u64,
    last_run_ms: Option<u64>,
}

impl PeriodicTask {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_run_ms: None,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_run_ms
            .map(|last| now_ms.saturating_sub(last) >= self.interval_ms)
            .unwrap_or(true)
    }

    /// Marks the task as started at `now_ms` if it is due.
    pub fn start_if_due(&mut self, now_ms: u64) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.last_run_ms = Some(now_ms);
        true
    }

    pub fn last_run_ms(&self) -> Option<u64> {
        self.last_run_ms
    }
}

use core::time::Duration;

/// Default capacity of each hand-off queue and of the pending lists.
pub const DEFAULT_CAPACITY: usize = 64;

/// Default capacity of the send-failure report queue.
pub const DEFAULT_FAILURE_CAPACITY: usize = 256;

/// Runtime configuration for a [`crate::Coordinator`].
///
/// `capacity` bounds both input queues, so producers only wait when that many
/// submissions are already buffered on a stream. Size it to the number of
/// requests that can be in flight at once (typically the worker pool size);
/// under normal load the bound should never be hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Bound of the token queue and of the payload queue. Values below 1 are
    /// treated as 1.
    pub capacity: usize,

    /// Bound of the queue returned by [`crate::Coordinator::take_failures`].
    /// Failures that do not fit are logged and counted, then dropped.
    pub failure_capacity: usize,

    /// When set, the coordinator warns if entries are pending but nothing has
    /// been released for this long. Reporting only; nothing is dropped.
    pub stall_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorConfig {
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
            stall_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_failure_capacity(mut self, failure_capacity: usize) -> Self {
        self.failure_capacity = failure_capacity;
        self
    }

    #[must_use]
    pub const fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = Some(stall_timeout);
        self
    }

    pub(crate) const fn queue_capacity(&self) -> usize {
        if self.capacity == 0 { 1 } else { self.capacity }
    }

    pub(crate) const fn failure_queue_capacity(&self) -> usize {
        if self.failure_capacity == 0 {
            1
        } else {
            self.failure_capacity
        }
    }

    /// How often the loop checks for a stall: a quarter of the timeout, at
    /// least every millisecond.
    pub(crate) fn stall_check_period(&self) -> Option<Duration> {
        self.stall_timeout
            .map(|timeout| (timeout / 4).max(Duration::from_millis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.failure_capacity, DEFAULT_FAILURE_CAPACITY);
        assert_eq!(config.stall_timeout, None);
        assert_eq!(config.stall_check_period(), None);
    }

    #[test]
    fn zero_capacities_are_clamped() {
        let config = CoordinatorConfig::new()
            .with_capacity(0)
            .with_failure_capacity(0);
        assert_eq!(config.queue_capacity(), 1);
        assert_eq!(config.failure_queue_capacity(), 1);
    }

    #[test]
    fn stall_check_runs_four_times_per_timeout() {
        let config = CoordinatorConfig::new().with_stall_timeout(Duration::from_secs(2));
        assert_eq!(config.stall_check_period(), Some(Duration::from_millis(500)));

        let tiny = CoordinatorConfig::new().with_stall_timeout(Duration::from_micros(10));
        assert_eq!(tiny.stall_check_period(), Some(Duration::from_millis(1)));
    }
}

use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Lifecycle of a coordinator. The only transition is `Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Running,
    Stopped,
}

/// Point-in-time view of a coordinator's counters.
///
/// Pending lengths that keep growing mean the lowest outstanding token or
/// payload never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorMetrics {
    pub pending_tokens: usize,
    pub pending_payloads: usize,
    /// Pairs handed to the sender, successful or not.
    pub released: u64,
    pub send_failures: u64,
    /// Stall episodes detected (see `CoordinatorConfig::stall_timeout`).
    pub stalls: u64,
}

/// Counters written by the loop task and read by any handle.
#[derive(Debug, Default)]
pub(crate) struct SharedMetrics {
    pending_tokens: AtomicUsize,
    pending_payloads: AtomicUsize,
    released: AtomicU64,
    send_failures: AtomicU64,
    stalls: AtomicU64,
    stopped: AtomicBool,
}

impl SharedMetrics {
    pub(crate) fn set_pending(&self, tokens: usize, payloads: usize) {
        self.pending_tokens.store(tokens, Ordering::Relaxed);
        self.pending_payloads.store(payloads, Ordering::Relaxed);
    }

    pub(crate) fn add_released(&self, n: usize) {
        self.released.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_send_failures(&self, n: usize) {
        self.send_failures.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn state(&self) -> CoordinatorState {
        if self.stopped.load(Ordering::Acquire) {
            CoordinatorState::Stopped
        } else {
            CoordinatorState::Running
        }
    }

    pub(crate) fn snapshot(&self) -> CoordinatorMetrics {
        CoordinatorMetrics {
            pending_tokens: self.pending_tokens.load(Ordering::Relaxed),
            pending_payloads: self.pending_payloads.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }
}

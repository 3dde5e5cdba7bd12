//! Cold start detection.
//!
//! A [`ColdStartDetector`] lives exactly as long as the process does: it is created during
//! function init and owned by the [`crate::Collector`]. The first [`ColdStartDetector::detect`]
//! call reports a cold start; every later call reports warm. The flip is a single
//! compare-exchange so that two invocations racing in one process cannot both be classified cold.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ColdStartDetector {
    has_served_first_invocation: AtomicBool,
    created_at: Instant,
    init_end: OnceLock<Instant>,
}

impl Default for ColdStartDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ColdStartDetector {
    pub fn new() -> Self {
        Self {
            has_served_first_invocation: AtomicBool::new(false),
            created_at: Instant::now(),
            init_end: OnceLock::new(),
        }
    }

    /// True exactly once: on the first call in this detector's lifetime.
    pub fn detect(&self) -> bool {
        self.has_served_first_invocation
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_served_first_invocation(&self) -> bool {
        self.has_served_first_invocation.load(Ordering::Acquire)
    }

    /// Record the end of the init phase. Only the first call has any effect.
    pub fn mark_init_complete(&self) {
        self.mark_init_complete_at(Instant::now());
    }

    pub(crate) fn mark_init_complete_at(&self, at: Instant) {
        let _ = self.init_end.set(at);
    }

    /// Time from detector construction to the end of init.
    ///
    /// When init completion was never marked explicitly, `first_invocation_start` stands in for
    /// it (and is remembered). Returns `None` only if neither is known.
    pub fn init_duration(&self, first_invocation_start: Option<Instant>) -> Option<Duration> {
        if let Some(start) = first_invocation_start {
            self.mark_init_complete_at(start);
        }
        self.init_end.get().map(|end| end.saturating_duration_since(self.created_at))
    }
}

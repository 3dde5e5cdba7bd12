//! Dependency resolution timing.
//!
//! Rust has no global module loader to patch, so the interception point is a capability the host
//! exposes: whatever code initializes a dependency (an SDK client, a connection pool, a parsed
//! config blob) routes that initialization through a [`ResolutionInterceptor`]. The contract is
//! fixed regardless of how the host wires it in:
//!
//! - the wrapper is transparent: the resolution's value or error comes back untouched
//! - only wall-clock time is measured; nothing else about the call changes
//! - a failure inside the measurement path never prevents the resolution from running, and never
//!   replaces its result
//!
//! [`ModuleTimings`] is the accumulator used by the collector. Samples at or below
//! [`NOISE_THRESHOLD`] are dropped, and repeated resolutions of the same key are summed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

/// Resolutions at or below this duration are treated as cache hits / noise and discarded.
pub const NOISE_THRESHOLD: Duration = Duration::from_millis(1);

/// A hook a dependency loader calls around each resolution.
pub trait ResolutionInterceptor {
    /// Run `resolve`, measuring it under `key`. Must return exactly what `resolve` returned.
    fn resolve<T, E>(&self, key: &str, resolve: impl FnOnce() -> Result<T, E>) -> Result<T, E>;

    /// Async counterpart of [`ResolutionInterceptor::resolve`].
    fn resolve_async<T, E, F>(&self, key: &str, resolve: F) -> impl Future<Output = Result<T, E>>
    where
        F: Future<Output = Result<T, E>>;
}

/// Per-dependency accumulated load time, shared across the whole process.
#[derive(Debug, Default)]
pub struct ModuleTimings {
    totals: Mutex<HashMap<String, Duration>>,
}

impl ModuleTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one measured sample for `key`. Samples at or below the noise threshold are dropped.
    pub fn record(&self, key: &str, elapsed: Duration) {
        if elapsed <= NOISE_THRESHOLD {
            trace!(key, elapsed_us = elapsed.as_micros() as u64, "Discarding sub-threshold resolution");
            return;
        }
        let mut totals = self.lock();
        *totals.entry(key.to_string()).or_default() += elapsed;
    }

    /// Copy of the current totals.
    pub fn snapshot(&self) -> HashMap<String, Duration> {
        self.lock().clone()
    }

    /// Snapshot and clear in one step.
    pub fn take(&self) -> HashMap<String, Duration> {
        std::mem::take(&mut *self.lock())
    }

    pub fn total(&self, key: &str) -> Option<Duration> {
        self.lock().get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock leaves the map itself intact, so a poisoned lock is recovered
    // rather than propagated into the caller's resolution.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Duration>> {
        match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ResolutionInterceptor for ModuleTimings {
    fn resolve<T, E>(&self, key: &str, resolve: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = Instant::now();
        let result = resolve();
        self.record(key, start.elapsed());
        result
    }

    async fn resolve_async<T, E, F>(&self, key: &str, resolve: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = resolve.await;
        self.record(key, start.elapsed());
        result
    }
}

/// Convert a duration to fractional milliseconds, the unit used on the wire.
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

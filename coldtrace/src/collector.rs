use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tracing::debug;

use crate::cold_start::ColdStartDetector;
use crate::config::CollectorConfig;
use crate::delivery::{Delivery, DeliveryHandle, DeliveryOutcome};
use crate::envelope::{EnvelopeBuilder, InvocationContext, peak_memory_mb};
use crate::recorder::{ModuleTimings, ResolutionInterceptor};
use crate::sampler::should_instrument;

/// Process-wide instrumentation facade.
///
/// Create one during function init and keep it for the life of the process (a `static` via
/// `OnceLock`, or state captured by the handler closure). Everything it does on the invocation
/// path is infallible from the handler's point of view.
#[derive(Debug)]
pub struct Collector {
    config: CollectorConfig,
    detector: ColdStartDetector,
    timings: ModuleTimings,
    delivery: Delivery,
    pending: Mutex<Vec<DeliveryHandle>>,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Self {
        let delivery = Delivery::new(&config);
        Self {
            config,
            detector: ColdStartDetector::new(),
            timings: ModuleTimings::new(),
            delivery,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn detector(&self) -> &ColdStartDetector {
        &self.detector
    }

    pub fn timings(&self) -> &ModuleTimings {
        &self.timings
    }

    pub fn mark_init_complete(&self) {
        self.detector.mark_init_complete();
    }

    /// Run one invocation of the handler, returning its output untouched.
    pub async fn instrument<F, T>(&self, ctx: InvocationContext, handler: F) -> T
    where
        F: Future<Output = T>,
    {
        let sampled = should_instrument(&self.config);
        let cold = self.detector.detect();

        if !sampled {
            if cold {
                // Nobody will ever report these.
                self.timings.take();
            }
            return handler.await;
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let init_duration = if cold { self.detector.init_duration(Some(start)) } else { None };

        // A panicking handler is still measured and reported before the panic resumes.
        let output = AssertUnwindSafe(handler).catch_unwind().await;
        let execution = start.elapsed();

        let envelope = EnvelopeBuilder::new(ctx, cold, started_at, execution)
            .init_duration(init_duration)
            .module_timings(&self.timings)
            .memory_used_mb(peak_memory_mb())
            .build();
        debug!(
            invocation_id = %envelope.invocation_id,
            cold_start = envelope.cold_start,
            execution_ms = envelope.execution_duration_ms,
            modules = envelope.module_timings.len(),
            "Invocation measured"
        );

        let handle = self.delivery.dispatch(envelope);
        self.track(handle);
        match output {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Wait for every outstanding delivery. Each is already bounded by the delivery deadline, so
    /// this returns within roughly one deadline.
    pub async fn flush(&self) -> Vec<DeliveryOutcome> {
        let handles = std::mem::take(&mut *self.pending());
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.wait().await);
        }
        outcomes
    }

    fn track(&self, handle: DeliveryHandle) {
        if handle.is_finished() && !self.delivery.is_configured() {
            return;
        }
        let mut pending = self.pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn pending(&self) -> MutexGuard<'_, Vec<DeliveryHandle>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ResolutionInterceptor for Collector {
    fn resolve<T, E>(&self, key: &str, resolve: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        self.timings.resolve(key, resolve)
    }

    async fn resolve_async<T, E, F>(&self, key: &str, resolve: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.timings.resolve_async(key, resolve).await
    }
}

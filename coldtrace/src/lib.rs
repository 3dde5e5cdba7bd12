//! # coldtrace: cold start instrumentation for short-lived functions
//!
//! `coldtrace` is embedded in a compute function (for example an AWS Lambda handler written with
//! `lambda_runtime`) and measures what the function's cold start actually costs: how long each
//! dependency took to initialize, whether a given invocation was cold or warm, and how long the
//! handler ran. One envelope per sampled invocation is posted to the `csactl` ingest service.
//!
//! The collector is built around one rule: observability must have zero blast radius on the
//! instrumented workload. Nothing in this crate can change a handler's result, surface an error
//! to the handler's caller, or delay the caller by more than the configured delivery deadline.
//!
//! ## Components
//!
//! - [`sampler`]: per-invocation sampling decision (enabled flag × sample rate)
//! - [`recorder`]: transparent timing wrapper around dependency resolution, accumulating
//!   per-dependency totals
//! - [`cold_start`]: once-per-process cold start detection
//! - [`envelope`]: immutable per-invocation record
//! - [`delivery`]: deadline-bounded, fire-and-forget transmission
//! - [`collector`]: the [`Collector`] facade tying it all together
//!
//! ## Usage
//!
//! ```no_run
//! use coldtrace::{Collector, CollectorConfig, InvocationContext, ResolutionInterceptor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Created once during init, lives for the whole process.
//! let collector = Collector::new(CollectorConfig::from_env()?);
//!
//! // Dependency initialization goes through the recorder.
//! let client = collector.resolve("aws-sdk-dynamodb", || Ok::<_, std::io::Error>("client"))?;
//! collector.mark_init_complete();
//!
//! // Each invocation is wrapped. The handler's output is returned untouched.
//! let ctx = InvocationContext::from_env("request-id-123");
//! let output: Result<&str, String> = collector.instrument(ctx, async { Ok(client) }).await;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub mod cold_start;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod recorder;
pub mod sampler;

pub use cold_start::ColdStartDetector;
pub use collector::Collector;
pub use config::CollectorConfig;
pub use delivery::{Delivery, DeliveryHandle, DeliveryOutcome};
pub use envelope::{Envelope, EnvelopeBuilder, InvocationContext};
pub use error::DeliveryError;
pub use recorder::{ModuleTimings, ResolutionInterceptor};
pub use sampler::should_instrument;

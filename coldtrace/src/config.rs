//! Collector configuration.
//!
//! Values are layered with figment: built-in defaults first, then `COLDTRACE_`-prefixed
//! environment variables. A function only needs to set the endpoint and API key:
//!
//! ```bash
//! COLDTRACE_ENDPOINT=https://ingest.example.com
//! COLDTRACE_API_KEY=csa_...
//! COLDTRACE_SAMPLE_RATE=0.25   # optional, defaults to 1.0
//! COLDTRACE_TIMEOUT=500ms      # optional, defaults to 1s
//! COLDTRACE_ENABLED=false      # optional kill switch
//! ```
//!
//! A missing endpoint or key is not an error: the collector still runs but delivery is skipped.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

/// Default hard deadline for a single delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, bon::Builder)]
#[serde(default)]
pub struct CollectorConfig {
    /// Master switch. When false nothing is sampled, measured or sent.
    #[builder(default = true)]
    pub enabled: bool,
    /// Fraction of invocations to instrument, clamped to [0, 1] at use.
    #[builder(default = 1.0)]
    pub sample_rate: f64,
    /// Base URL of the ingest service, e.g. `https://ingest.example.com`.
    pub endpoint: Option<String>,
    /// Project API key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Hard deadline for one delivery attempt.
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            endpoint: None,
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CollectorConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(CollectorConfig::default())).merge(Env::prefixed("COLDTRACE_"))
    }

    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Full ingest URL, if an endpoint is configured.
    pub fn ingest_url(&self) -> Option<String> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| format!("{}/api/v1/ingest", e.trim_end_matches('/')))
    }

    /// The API key, unless missing or blank.
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Whether there is enough configuration to attempt a delivery at all.
    pub fn can_deliver(&self) -> bool {
        self.ingest_url().is_some() && self.usable_api_key().is_some()
    }
}

use std::time::Duration;

use thiserror::Error;

/// Why a delivery attempt did not land. These never reach the instrumented handler; they are
/// folded into a [`crate::DeliveryOutcome`] and logged.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery is not configured: {0}")]
    NotConfigured(&'static str),

    #[error("no tokio runtime available to run the delivery")]
    NoRuntime,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ingest service responded with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("delivery exceeded deadline of {0:?}")]
    TimedOut(Duration),
}

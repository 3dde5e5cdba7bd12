//! Deadline-bounded, fire-and-forget envelope delivery.
//!
//! ```text
//! Delivery::dispatch(envelope)
//!   ├─ not configured / no runtime ──► DeliveryHandle(Skipped)
//!   └─ tokio::spawn ──► timeout(deadline, POST <endpoint>/api/v1/ingest)
//!                          └─ outcome logged, returned through the handle
//! ```
//!
//! One attempt per envelope. Nothing here returns an error to the caller: every failure becomes a
//! [`DeliveryOutcome`] and a log line.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::envelope::Envelope;
use crate::error::DeliveryError;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The service answered with a non-success status.
    Rejected(u16),
    /// Transport failure before any response arrived.
    Failed,
    TimedOut,
    /// Nothing was sent: delivery is unconfigured or there was no runtime to send on.
    Skipped,
}

impl From<&DeliveryError> for DeliveryOutcome {
    fn from(err: &DeliveryError) -> Self {
        match err {
            DeliveryError::NotConfigured(_) | DeliveryError::NoRuntime => DeliveryOutcome::Skipped,
            DeliveryError::Rejected(status) => DeliveryOutcome::Rejected(status.as_u16()),
            DeliveryError::TimedOut(_) => DeliveryOutcome::TimedOut,
            DeliveryError::Request(e) if e.is_timeout() => DeliveryOutcome::TimedOut,
            DeliveryError::Request(_) => DeliveryOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl Target {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(status))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    target: Option<Target>,
    deadline: Duration,
}

impl Delivery {
    pub fn new(config: &CollectorConfig) -> Self {
        let target = match Self::build_target(config) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!(error = %e, "Envelope delivery disabled");
                None
            }
        };
        Self {
            target,
            deadline: config.timeout,
        }
    }

    fn build_target(config: &CollectorConfig) -> Result<Target, DeliveryError> {
        let url = config.ingest_url().ok_or(DeliveryError::NotConfigured("endpoint"))?;
        let api_key = config
            .usable_api_key()
            .ok_or(DeliveryError::NotConfigured("api key"))?
            .to_string();
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Target { client, url, api_key })
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    /// Send `envelope` on a detached task. Returns immediately.
    pub fn dispatch(&self, envelope: Envelope) -> DeliveryHandle {
        let Some(target) = self.target.clone() else {
            return DeliveryHandle::ready(DeliveryOutcome::Skipped);
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => return DeliveryHandle::ready(report(&envelope.invocation_id, Err(DeliveryError::NoRuntime))),
        };

        let deadline = self.deadline;
        let task = runtime.spawn(async move {
            let result = match tokio::time::timeout(deadline, target.send(&envelope)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::TimedOut(deadline)),
            };
            report(&envelope.invocation_id, result)
        });
        DeliveryHandle::pending(task)
    }
}

fn report(invocation_id: &str, result: Result<(), DeliveryError>) -> DeliveryOutcome {
    match result {
        Ok(()) => {
            debug!(invocation_id, "Envelope delivered");
            DeliveryOutcome::Delivered
        }
        Err(e) => {
            let outcome = DeliveryOutcome::from(&e);
            warn!(invocation_id, error = %e, ?outcome, "Envelope delivery failed");
            outcome
        }
    }
}

/// Handle to one in-flight delivery. Dropping it detaches the delivery; awaiting it never fails.
#[derive(Debug)]
pub struct DeliveryHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(DeliveryOutcome),
    Pending(JoinHandle<DeliveryOutcome>),
}

impl DeliveryHandle {
    fn ready(outcome: DeliveryOutcome) -> Self {
        Self {
            state: HandleState::Ready(outcome),
        }
    }

    fn pending(task: JoinHandle<DeliveryOutcome>) -> Self {
        Self {
            state: HandleState::Pending(task),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Pending(task) => task.is_finished(),
        }
    }

    pub async fn wait(self) -> DeliveryOutcome {
        match self.state {
            HandleState::Ready(outcome) => outcome,
            HandleState::Pending(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Delivery task ended abnormally");
                DeliveryOutcome::Failed
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeBuilder, InvocationContext};
    use chrono::Utc;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "csa_abcdefghijklmnopqrstuvwxyz012345";

    fn envelope() -> Envelope {
        let ctx = InvocationContext::builder()
            .function_name("orders-api")
            .invocation_id("inv-42")
            .build();
        EnvelopeBuilder::new(ctx, true, Utc::now(), Duration::from_millis(12)).build()
    }

    fn config(endpoint: &str, timeout: Duration) -> CollectorConfig {
        CollectorConfig::builder()
            .endpoint(endpoint.to_string())
            .api_key(KEY.to_string())
            .timeout(timeout)
            .build()
    }

    #[test]
    fn test_configured_exactly_when_config_can_deliver() {
        let full = config("http://127.0.0.1:9", Duration::from_millis(100));
        let blank_key = CollectorConfig {
            api_key: Some("  ".to_string()),
            ..full.clone()
        };
        let no_endpoint = CollectorConfig {
            endpoint: None,
            ..full.clone()
        };

        for config in [full, blank_key, no_endpoint] {
            assert_eq!(Delivery::new(&config).is_configured(), config.can_deliver());
        }
        assert!(Delivery::new(&config("http://127.0.0.1:9", Duration::from_millis(100))).is_configured());
    }

    #[test_log::test(tokio::test)]
    async fn test_delivers_envelope_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .and(header(API_KEY_HEADER, KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "invocation_id": "inv-42"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let delivery = Delivery::new(&config(&server.uri(), Duration::from_secs(1)));
        let outcome = delivery.dispatch(envelope()).wait().await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["function_name"], "orders-api");
        assert_eq!(body["invocation_id"], "inv-42");
        assert_eq!(body["cold_start"], true);
    }

    #[tokio::test]
    async fn test_rejection_is_reported_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let delivery = Delivery::new(&config(&server.uri(), Duration::from_secs(1)));
        let outcome = delivery.dispatch(envelope()).wait().await;
        assert_eq!(outcome, DeliveryOutcome::Rejected(500));
    }

    #[tokio::test]
    async fn test_slow_service_hits_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let delivery = Delivery::new(&config(&server.uri(), Duration::from_millis(100)));
        let start = Instant::now();
        let outcome = delivery.dispatch(envelope()).wait().await;

        assert_eq!(outcome, DeliveryOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2), "deadline not enforced: {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_dispatch_returns_before_delivery_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let delivery = Delivery::new(&config(&server.uri(), Duration::from_secs(2)));
        let start = Instant::now();
        let handle = delivery.dispatch(envelope());
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!handle.is_finished());
        assert_eq!(handle.wait().await, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_silently() {
        let delivery = Delivery::new(&config("http://127.0.0.1:1", Duration::from_millis(500)));
        let outcome = delivery.dispatch(envelope()).wait().await;
        assert!(matches!(outcome, DeliveryOutcome::Failed | DeliveryOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_missing_config_skips() {
        let delivery = Delivery::new(&CollectorConfig::default());
        assert!(!delivery.is_configured());
        assert_eq!(delivery.dispatch(envelope()).wait().await, DeliveryOutcome::Skipped);
    }

    #[test]
    fn test_no_runtime_skips() {
        let delivery = Delivery::new(&config("http://127.0.0.1:1", Duration::from_millis(100)));
        let handle = delivery.dispatch(envelope());
        assert!(handle.is_finished());
        let outcome = block_on(handle.wait());
        assert_eq!(outcome, DeliveryOutcome::Skipped);
    }

    // Ready handles never suspend, so a bare current-thread runtime is enough.
    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}

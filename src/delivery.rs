use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ConfigError, DeliveryOutcome, FailureReason, TransportError};
use crate::metric_inc;

/// Status and body of one webhook response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,

    /// Raw `Retry-After` header, if the endpoint sent one.
    pub retry_after: Option<String>,

    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound request primitive.
///
/// Implementations must be safe to share between concurrent deliveries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &Url, body: &Value) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &Url, body: &Value) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url.as_str())
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Retry budget and timing for one event's delivery loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryPolicy {
    /// Attempts per event, including the first.
    pub max_attempts: u32,

    /// Give up once the next wait would pass this much time since the first attempt.
    pub max_elapsed_ms: Option<u64>,

    /// Wait used when the endpoint gives no usable hint.
    pub default_retry_after_ms: u64,

    /// Upper bound applied to server hints.
    pub max_retry_after_ms: u64,

    /// Random extra delay added to each wait.
    pub retry_jitter_ms: u64,

    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_elapsed_ms: Some(300_000),
            default_retry_after_ms: 1_000,
            max_retry_after_ms: 60_000,
            retry_jitter_ms: 0,
            request_timeout_ms: 10_000,
        }
    }
}

impl DeliveryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed_ms = max_elapsed.map(millis);
        self
    }

    pub fn with_default_retry_after(mut self, wait: Duration) -> Self {
        self.default_retry_after_ms = millis(wait);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.retry_jitter_ms = millis(jitter);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::BadDeliveryPolicy("max_attempts must be at least 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::BadDeliveryPolicy("request_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Wait before the next attempt after `response`.
    ///
    /// Body `retry_after` wins over the header; anything unparsable falls
    /// back to the default.
    pub fn retry_wait(&self, response: Option<&TransportResponse>) -> Duration {
        let hint = response.and_then(|r| {
            body_retry_after(&r.body).or_else(|| r.retry_after.as_deref().and_then(parse_seconds))
        });
        let wait = hint
            .unwrap_or_else(|| Duration::from_millis(self.default_retry_after_ms))
            .min(Duration::from_millis(self.max_retry_after_ms));
        wait.saturating_add(jitter_delay(self.retry_jitter_ms))
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn body_retry_after(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("retry_after")? {
        Value::Number(n) => n.as_f64().and_then(seconds),
        Value::String(s) => parse_seconds(s),
        _ => None,
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.trim().parse::<f64>().ok().and_then(seconds)
}

fn seconds(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn jitter_delay(jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::from_millis(0);
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}

/// State of one event's delivery loop.
#[derive(Debug)]
struct DeliveryAttempt<'a> {
    url: &'a Url,
    body: &'a Value,
    attempts: u32,
    last_wait: Option<Duration>,
}

/// Drives the POST / evaluate / back off loop for one message.
#[derive(Clone)]
pub struct Deliverer {
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
}

impl Deliverer {
    pub fn new(transport: Arc<dyn Transport>, policy: DeliveryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver `body` to `url` until success, budget exhaustion or cancellation.
    ///
    /// Attempts are strictly sequential. Cancellation is observed before each
    /// attempt, during the request and during the backoff sleep.
    pub async fn deliver(
        &self,
        url: &Url,
        body: &Value,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let started = Instant::now();
        let mut attempt = DeliveryAttempt {
            url,
            body,
            attempts: 0,
            last_wait: None,
        };
        let host = url.host_str().unwrap_or_default();

        loop {
            if cancel.is_cancelled() {
                return DeliveryOutcome::Cancelled { attempts: attempt.attempts };
            }
            attempt.attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return DeliveryOutcome::Cancelled { attempts: attempt.attempts };
                }
                result = self.transport.post(attempt.url, attempt.body) => result,
            };

            let (reason, wait) = match result {
                Ok(response) if response.is_success() => {
                    metric_inc("notifier.delivery.success");
                    tracing::info!(
                        host,
                        status = response.status,
                        attempts = attempt.attempts,
                        "webhook delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt.attempts };
                }
                Ok(response) => {
                    let reason = if response.status == 429 {
                        FailureReason::RateLimited
                    } else {
                        FailureReason::RemoteStatus(response.status)
                    };
                    tracing::debug!(
                        host,
                        status = response.status,
                        response = %response.body,
                        attempt = attempt.attempts,
                        "webhook rejected message"
                    );
                    (reason, self.policy.retry_wait(Some(&response)))
                }
                Err(err) => {
                    tracing::debug!(host, error = %err, attempt = attempt.attempts, "webhook request failed");
                    (FailureReason::from(&err), self.policy.retry_wait(None))
                }
            };
            metric_inc("notifier.delivery.failure");

            let over_time = self
                .policy
                .max_elapsed_ms
                .map(|ms| started.elapsed() + wait > Duration::from_millis(ms))
                .unwrap_or(false);
            if attempt.attempts >= self.policy.max_attempts || over_time {
                metric_inc("notifier.delivery.gave_up");
                tracing::warn!(
                    host,
                    attempts = attempt.attempts,
                    reason = %reason,
                    last_wait = ?attempt.last_wait,
                    "giving up on webhook delivery"
                );
                return DeliveryOutcome::GaveUp {
                    attempts: attempt.attempts,
                    last_failure: reason,
                };
            }

            tracing::debug!(
                host,
                reason = %reason,
                attempt = attempt.attempts,
                wait_ms = millis(wait),
                "retrying webhook delivery"
            );
            attempt.last_wait = Some(wait);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return DeliveryOutcome::Cancelled { attempts: attempt.attempts };
                }
                _ = sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    /// Replays scripted responses and records when each request arrived.
    struct Scripted {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn post(&self, _url: &Url, _body: &Value) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TransportResponse::new(200, "")))
        }
    }

    fn url() -> Url {
        Url::parse("https://hooks.example/1").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let transport = Scripted::new(vec![Ok(TransportResponse::new(204, ""))]);
        let deliverer = Deliverer::new(transport.clone(), DeliveryPolicy::default());
        let outcome = deliverer
            .deliver(&url(), &json!({"content": "hi"}), &CancellationToken::new())
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_drives_single_sleep() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(429, r#"{"retry_after": 5}"#)),
            Ok(TransportResponse::new(200, "")),
        ]);
        let deliverer = Deliverer::new(transport.clone(), DeliveryPolicy::default());
        let outcome = deliverer
            .deliver(&url(), &json!({"content": "hi"}), &CancellationToken::new())
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 2 });
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(500, "boom")),
            Ok(TransportResponse::new(502, "")),
            Ok(TransportResponse::new(503, "")),
        ]);
        let policy = DeliveryPolicy::default().with_max_attempts(3);
        let deliverer = Deliverer::new(transport.clone(), policy);
        let outcome = deliverer
            .deliver(&url(), &json!({}), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::GaveUp {
                attempts: 3,
                last_failure: FailureReason::RemoteStatus(503),
            }
        );
        let calls = transport.calls();
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_wait_exceeds_elapsed_budget() {
        let transport = Scripted::new(vec![Ok(TransportResponse::new(
            429,
            r#"{"retry_after": 30}"#,
        ))]);
        let policy = DeliveryPolicy::default().with_max_elapsed(Some(Duration::from_secs(10)));
        let deliverer = Deliverer::new(transport.clone(), policy);
        let outcome = deliverer
            .deliver(&url(), &json!({}), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::GaveUp {
                attempts: 1,
                last_failure: FailureReason::RateLimited,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() {
        let transport = Scripted::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Network("connection reset".into())),
            Ok(TransportResponse::new(200, "")),
        ]);
        let deliverer = Deliverer::new(transport.clone(), DeliveryPolicy::default());
        let outcome = deliverer
            .deliver(&url(), &json!({}), &CancellationToken::new())
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let transport = Scripted::new(vec![Ok(TransportResponse::new(
            429,
            r#"{"retry_after": 30}"#,
        ))]);
        let deliverer = Deliverer::new(transport.clone(), DeliveryPolicy::default());
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                deliverer
                    .deliver(&url(), &json!({}), &cancel)
                    .await
            })
        };
        sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), DeliveryOutcome::Cancelled { attempts: 1 });
        assert_eq!(transport.calls().len(), 1);
    }

    /// Never answers within any reasonable time.
    struct Hanging;

    #[async_trait]
    impl Transport for Hanging {
        async fn post(&self, _url: &Url, _body: &Value) -> Result<TransportResponse, TransportError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(TransportResponse::new(200, ""))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_request() {
        let deliverer = Deliverer::new(Arc::new(Hanging), DeliveryPolicy::default());
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { deliverer.deliver(&url(), &json!({}), &cancel).await })
        };
        let started = Instant::now();
        sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), DeliveryOutcome::Cancelled { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_attempt() {
        let transport = Scripted::new(vec![]);
        let deliverer = Deliverer::new(transport.clone(), DeliveryPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = deliverer.deliver(&url(), &json!({}), &cancel).await;
        assert_eq!(outcome, DeliveryOutcome::Cancelled { attempts: 0 });
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn retry_wait_prefers_body_then_header_then_default() {
        let policy = DeliveryPolicy::default();

        let mut response = TransportResponse::new(429, r#"{"retry_after": 0.25}"#);
        response.retry_after = Some("7".into());
        assert_eq!(policy.retry_wait(Some(&response)), Duration::from_millis(250));

        response.body = "<html>slow down</html>".into();
        assert_eq!(policy.retry_wait(Some(&response)), Duration::from_secs(7));

        response.retry_after = Some("soon".into());
        assert_eq!(policy.retry_wait(Some(&response)), Duration::from_secs(1));

        let negative = TransportResponse::new(429, r#"{"retry_after": -3}"#);
        assert_eq!(policy.retry_wait(Some(&negative)), Duration::from_secs(1));

        assert_eq!(policy.retry_wait(None), Duration::from_secs(1));
    }

    #[test]
    fn retry_wait_is_clamped_and_jittered() {
        let policy = DeliveryPolicy::default();
        let huge = TransportResponse::new(429, r#"{"retry_after": 86400}"#);
        assert_eq!(policy.retry_wait(Some(&huge)), Duration::from_secs(60));

        let jittered = DeliveryPolicy::default().with_jitter(Duration::from_millis(100));
        let wait = jittered.retry_wait(None);
        assert!(wait >= Duration::from_secs(1));
        assert!(wait <= Duration::from_millis(1_100));
    }

    #[test]
    fn huge_durations_saturate() {
        let policy = DeliveryPolicy::default()
            .with_max_elapsed(Some(Duration::MAX))
            .with_default_retry_after(Duration::MAX)
            .with_jitter(Duration::from_secs(2));
        assert_eq!(policy.max_elapsed_ms, Some(u64::MAX));
        assert_eq!(policy.default_retry_after_ms, u64::MAX);
        assert_eq!(policy.retry_jitter_ms, 2_000);

        let deliverer = Deliverer::new(Arc::new(Hanging), policy.clone());
        assert_eq!(deliverer.policy(), &policy);
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let policy = DeliveryPolicy::default().with_max_attempts(0);
        assert!(matches!(policy.check(), Err(ConfigError::BadDeliveryPolicy(_))));
    }
}

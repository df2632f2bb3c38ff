use super::breaker::{BreakerDecision, BreakerState, CircuitBreaker};
use super::provider::{EmailProvider, OutgoingEmail, ProviderError};
use super::rate_limit::SendRateLimiter;
use super::ses::SesProvider;
use super::smtp::SmtpProvider;
use entity::email_integration::{self, IntegrationKind};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{error, warn};

/// in-slice retry attempts for a retryable provider failure
static MAX_SEND_ATTEMPTS: u32 = 3;

/// base delay of the exponential in-slice retry backoff
static RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// rate limiter and breaker keys, `(workspace_id, integration_id)`
type PairKey = (i32, i32);

/// Outcome of handing one recipient to a provider
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent {
        provider_message_id: Option<String>,
    },

    /// no permit within the slice budget, the recipient was not attempted
    Throttled,

    /// the circuit breaker is open, the recipient was not attempted
    Suppressed,

    Failed {
        permanent: bool,
        error: String,
    },
}

/// Per executor registry of providers, rate limiters and circuit breakers,
/// all keyed by workspace scoped integrations
///
/// replicated executors each hold their own instance, keyed consistently so
/// they converge probabilistically, strict global rate capping is not a goal
pub struct Dispatcher {
    breaker_failure_threshold: i32,
    breaker_cooldown: Duration,

    providers: tokio::sync::Mutex<HashMap<i32, Arc<dyn EmailProvider>>>,
    limiters: Mutex<HashMap<PairKey, Arc<SendRateLimiter>>>,
    breakers: Mutex<HashMap<PairKey, Arc<CircuitBreaker>>>,
}

impl Dispatcher {
    pub fn new(breaker_failure_threshold: i32, breaker_cooldown: Duration) -> Dispatcher {
        Dispatcher {
            breaker_failure_threshold,
            breaker_cooldown,
            providers: tokio::sync::Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn limiter_for(&self, key: PairKey, requests_per_minute: u32) -> Arc<SendRateLimiter> {
        self.limiters
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(SendRateLimiter::new(requests_per_minute)))
            .clone()
    }

    pub fn breaker_for(&self, workspace_id: i32, integration_id: i32) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .unwrap()
            .entry((workspace_id, integration_id))
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.breaker_failure_threshold,
                    self.breaker_cooldown,
                ))
            })
            .clone()
    }

    /// if sends towards a integration are currently suppressed, used by the
    /// orchestrator to pause a broadcast instead of spinning on suppressions
    pub fn is_breaker_open(&self, workspace_id: i32, integration_id: i32) -> bool {
        self.breaker_for(workspace_id, integration_id).state() == BreakerState::Open
    }

    async fn provider_for(
        &self,
        integration: &email_integration::Model,
    ) -> Result<Arc<dyn EmailProvider>, ProviderError> {
        let mut providers = self.providers.lock().await;

        if let Some(provider) = providers.get(&integration.id) {
            return Ok(provider.clone());
        }

        let provider: Arc<dyn EmailProvider> = match integration.kind {
            IntegrationKind::Smtp => Arc::new(SmtpProvider::from_settings(&integration.settings)?),
            IntegrationKind::Ses => {
                let region = integration.settings.aws_region.as_deref().ok_or_else(|| {
                    ProviderError::Permanent(String::from("ses region not configured"))
                })?;

                Arc::new(SesProvider::new(region).await)
            }
        };

        providers.insert(integration.id, provider.clone());
        Ok(provider)
    }

    /// replace the provider of a integration, used by tests to plug mocks
    #[cfg(test)]
    pub async fn set_provider(&self, integration_id: i32, provider: Arc<dyn EmailProvider>) {
        self.providers.lock().await.insert(integration_id, provider);
    }

    /// Hands one recipient to the integrations provider:
    ///
    /// 1. reserve a permit from the rate limiter, bounded by `budget`
    /// 2. consult the circuit breaker
    /// 3. invoke the provider, retrying retryable failures with backoff
    ///    while the budget allows
    /// 4. record the outcome on the breaker
    #[tracing::instrument(skip_all, fields(to = %email.to, integration_id = integration.id))]
    pub async fn send_to_recipient(
        &self,
        integration: &email_integration::Model,
        email: OutgoingEmail,
        budget: Duration,
    ) -> SendOutcome {
        let started = Instant::now();

        let provider = match self.provider_for(integration).await {
            Ok(provider) => provider,
            Err(err) => {
                error!("failed to build provider: {}", err);
                return SendOutcome::Failed {
                    permanent: !err.is_retryable(),
                    error: err.to_string(),
                };
            }
        };

        let key = (integration.workspace_id, integration.id);
        let limiter = self.limiter_for(key, integration.requests_per_minute.max(1) as u32);

        if !limiter.acquire(budget).await {
            return SendOutcome::Throttled;
        }

        let breaker = self.breaker_for(integration.workspace_id, integration.id);

        if breaker.check() == BreakerDecision::Suppress {
            return SendOutcome::Suppressed;
        }

        let mut attempt = 0;
        let outcome = loop {
            match provider.send(&email).await {
                Ok(response) => {
                    break SendOutcome::Sent {
                        provider_message_id: response.provider_message_id,
                    }
                }

                Err(err) if !err.is_retryable() => {
                    break SendOutcome::Failed {
                        permanent: true,
                        error: err.to_string(),
                    }
                }

                Err(err) => {
                    attempt += 1;

                    let remaining = budget.saturating_sub(started.elapsed());
                    if attempt >= MAX_SEND_ATTEMPTS || remaining.is_zero() {
                        break SendOutcome::Failed {
                            permanent: false,
                            error: err.to_string(),
                        };
                    }

                    warn!("send attempt {} failed: {}", attempt, err);

                    let delay = backoff_delay(attempt).min(remaining);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match &outcome {
            SendOutcome::Sent { .. } => breaker.record_success(),
            SendOutcome::Failed { .. } => breaker.record_failure(),
            SendOutcome::Throttled | SendOutcome::Suppressed => {}
        }

        outcome
    }
}

/// exponential backoff with a +-20% jitter
fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    rand::thread_rng().gen_range(base.mul_f32(0.8)..base.mul_f32(1.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::dispatch::provider::ProviderResponse;
    use async_trait::async_trait;
    use entity::email_integration::IntegrationSettings;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct MockProvider {
        calls: AtomicU32,
        responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    }

    impl MockProvider {
        fn failing_with(err: ProviderError, times: usize) -> MockProvider {
            MockProvider {
                calls: AtomicU32::new(0),
                responses: Mutex::new(
                    std::iter::repeat_with(|| Err(err.clone())).take(times).collect(),
                ),
            }
        }

        fn succeeding() -> MockProvider {
            MockProvider {
                calls: AtomicU32::new(0),
                responses: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl EmailProvider for MockProvider {
        async fn send(&self, _email: &OutgoingEmail) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            self.responses.lock().unwrap().pop().unwrap_or(Ok(ProviderResponse {
                provider_message_id: Some(String::from("mock-id")),
            }))
        }

        async fn test_connection(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn integration() -> email_integration::Model {
        email_integration::Model {
            id: 10,
            created_at: chrono::Utc::now(),
            workspace_id: 1,
            name: String::from("test relay"),
            kind: IntegrationKind::Smtp,
            settings: IntegrationSettings::default(),
            requests_per_minute: 1000,
            is_default: true,
        }
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: String::from("no-reply@acme.io"),
            to: String::from("jhon@gmail.com"),
            subject: String::from("hello"),
            html: String::from("<b>hello</b>"),
            text: None,
            reply_to: None,
            cc: vec![],
            bcc: vec![],
            message_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn success_path_reports_the_provider_message_id() {
        let dispatcher = Dispatcher::new(5, Duration::from_secs(60));
        dispatcher.set_provider(10, Arc::new(MockProvider::succeeding())).await;

        let outcome = dispatcher
            .send_to_recipient(&integration(), email(), Duration::from_secs(5))
            .await;

        match outcome {
            SendOutcome::Sent { provider_message_id } => {
                assert_eq!(provider_message_id.as_deref(), Some("mock-id"))
            }
            other => panic!("expected Sent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let dispatcher = Dispatcher::new(5, Duration::from_secs(60));

        let mock = Arc::new(MockProvider::failing_with(
            ProviderError::Permanent(String::from("mailbox does not exist")),
            10,
        ));
        dispatcher.set_provider(10, mock.clone()).await;

        let outcome = dispatcher
            .send_to_recipient(&integration(), email(), Duration::from_secs(5))
            .await;

        assert!(matches!(outcome, SendOutcome::Failed { permanent: true, .. }));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failures_retry_up_to_the_attempt_cap() {
        let dispatcher = Dispatcher::new(50, Duration::from_secs(60));

        let mock = Arc::new(MockProvider::failing_with(
            ProviderError::Retryable(String::from("connection refused")),
            10,
        ));
        dispatcher.set_provider(10, mock.clone()).await;

        let outcome = dispatcher
            .send_to_recipient(&integration(), email(), Duration::from_secs(30))
            .await;

        assert!(matches!(outcome, SendOutcome::Failed { permanent: false, .. }));
        assert_eq!(mock.calls.load(Ordering::SeqCst), MAX_SEND_ATTEMPTS);
    }

    #[tokio::test]
    async fn breaker_suppresses_after_a_failure_run() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(600));

        let mock = Arc::new(MockProvider::failing_with(
            ProviderError::Permanent(String::from("rejected")),
            10,
        ));
        dispatcher.set_provider(10, mock.clone()).await;

        for _ in 0..2 {
            let outcome = dispatcher
                .send_to_recipient(&integration(), email(), Duration::from_secs(5))
                .await;
            assert!(matches!(outcome, SendOutcome::Failed { .. }));
        }

        assert!(dispatcher.is_breaker_open(1, 10));

        let outcome = dispatcher
            .send_to_recipient(&integration(), email(), Duration::from_secs(5))
            .await;

        assert!(matches!(outcome, SendOutcome::Suppressed));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }
}

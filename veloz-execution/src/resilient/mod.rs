use crate::{
    client::{OrderRef, UserStream, VenueCapabilities, VenueClient},
    error::ExecutionError,
    event::{AssetBalance, TradingEvent},
    order::{OrderIntent, OrderSnapshot, id::ClientOrderId},
    rate_limit::{RateLimiter, RequestClass},
    resilient::breaker::{BreakerConfig, CircuitBreaker, CircuitState},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::{future::Future, time::Duration};
use tracing::{debug, warn};
use veloz_instrument::{symbol::Symbol, venue::VenueId};

/// Circuit breaking for venue adapters.
pub mod breaker;

/// Retry policy of the [`Resilient`] wrapper.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// First backoff delay; doubled per attempt.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
    /// Deadline applied to every individual venue call.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Jittered exponential backoff for the given retry `attempt` (0-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max);
        // Jitter in [0.5, 1.5) spreads concurrent retries apart
        let jitter = rand::rng().random_range(0.5..1.5);
        exp.mul_f64(jitter)
    }
}

/// Decorates a [`VenueClient`] with deadline enforcement, retry with jittered exponential
/// backoff, circuit breaking, and priority rate limiting.
///
/// Every adapter in a live engine is wrapped by this before the OMS sees it.
#[derive(Debug)]
pub struct Resilient<Client> {
    pub client: Client,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl<Client> Resilient<Client>
where
    Client: VenueClient,
{
    pub fn new(
        client: Client,
        retry: RetryPolicy,
        breaker_config: BreakerConfig,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            client,
            retry,
            breaker: CircuitBreaker::new(breaker_config),
            limiter,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `op` under the breaker, rate limiter, per-call deadline, and retry policy.
    async fn call<T, F, Fut>(&self, class: RequestClass, op: F) -> Result<T, ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        if !self.breaker.admit(Utc::now()) {
            return Err(ExecutionError::CircuitOpen(self.client.venue()));
        }

        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(class).await;

            let result = match tokio::time::timeout(self.retry.request_timeout, op()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ExecutionError::Timeout),
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    if error.is_breaker_relevant() {
                        self.breaker.record_failure(Utc::now());
                    }

                    // Timeouts are never retried here: the true outcome is unknown and the
                    // reconciler resolves it on its next sweep
                    if error.is_retryable() && attempt < self.retry.max_retries {
                        let backoff = self.retry.backoff(attempt);
                        attempt += 1;
                        debug!(
                            venue = %self.client.venue(),
                            %class,
                            attempt,
                            ?backoff,
                            ?error,
                            "retrying venue call after transport failure"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if attempt > 0 {
                        warn!(
                            venue = %self.client.venue(),
                            %class,
                            attempts = attempt + 1,
                            ?error,
                            "venue call failed after retries"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}

impl<Client> VenueClient for Resilient<Client>
where
    Client: VenueClient,
{
    fn venue(&self) -> VenueId {
        self.client.venue()
    }

    fn capabilities(&self) -> VenueCapabilities {
        self.client.capabilities()
    }

    async fn place(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<TradingEvent, ExecutionError> {
        self.call(RequestClass::Place, || {
            self.client.place(symbol, cid, intent)
        })
        .await
    }

    async fn cancel(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
    ) -> Result<TradingEvent, ExecutionError> {
        self.call(RequestClass::Cancel, || self.client.cancel(symbol, order))
            .await
    }

    async fn amend(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
        new_quantity: Option<Decimal>,
        new_price: Option<Decimal>,
    ) -> Result<TradingEvent, ExecutionError> {
        self.call(RequestClass::Place, || {
            self.client.amend(symbol, order, new_quantity, new_price)
        })
        .await
    }

    async fn query_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<OrderSnapshot>, ExecutionError> {
        self.call(RequestClass::Query, || {
            self.client.query_open_orders(symbol)
        })
        .await
    }

    async fn query_order(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
    ) -> Result<Option<OrderSnapshot>, ExecutionError> {
        self.call(RequestClass::Query, || self.client.query_order(symbol, cid))
            .await
    }

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
        self.call(RequestClass::Query, || self.client.fetch_balances())
            .await
    }

    async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError> {
        // Stream setup is not retried: the engine's reconnect policy owns that loop
        self.client.subscribe_user_stream().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::TransportError,
        event::{OrderAccepted, TradingEventKind},
        rate_limit::RateLimitConfig,
        order::id::VenueOrderId,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use veloz_instrument::{test_utils::symbol, venue::VenueId};

    /// Venue stub failing with transport errors until `failures_remaining` is exhausted.
    #[derive(Debug)]
    struct FlakyVenue {
        calls: AtomicU32,
        failures_remaining: AtomicU32,
    }

    impl FlakyVenue {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures_remaining: AtomicU32::new(failures),
            }
        }

        fn accepted(&self) -> TradingEvent {
            TradingEvent::new(
                VenueId::Mock,
                1,
                Utc::now(),
                Utc::now(),
                TradingEventKind::OrderAccepted(OrderAccepted::new(
                    ClientOrderId::new("s-1"),
                    VenueOrderId::new("v-1"),
                )),
            )
        }
    }

    impl VenueClient for FlakyVenue {
        fn venue(&self) -> VenueId {
            VenueId::Mock
        }

        fn capabilities(&self) -> VenueCapabilities {
            VenueCapabilities::simulated()
        }

        async fn place(
            &self,
            _: &Symbol,
            _: &ClientOrderId,
            _: &OrderIntent,
        ) -> Result<TradingEvent, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    remaining.checked_sub(1)
                })
                .is_ok()
            {
                Err(ExecutionError::Transport(TransportError::ConnectionReset(
                    "rst".into(),
                )))
            } else {
                Ok(self.accepted())
            }
        }

        async fn cancel(&self, _: &Symbol, _: &OrderRef) -> Result<TradingEvent, ExecutionError> {
            Ok(self.accepted())
        }

        async fn amend(
            &self,
            _: &Symbol,
            _: &OrderRef,
            _: Option<Decimal>,
            _: Option<Decimal>,
        ) -> Result<TradingEvent, ExecutionError> {
            Err(ExecutionError::Internal("amend unsupported".into()))
        }

        async fn query_open_orders(
            &self,
            _: Option<&Symbol>,
        ) -> Result<Vec<OrderSnapshot>, ExecutionError> {
            Ok(vec![])
        }

        async fn query_order(
            &self,
            _: &Symbol,
            _: &ClientOrderId,
        ) -> Result<Option<OrderSnapshot>, ExecutionError> {
            Ok(None)
        }

        async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
            Ok(vec![])
        }

        async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent::new(
            crate::order::id::StrategyId::new("s"),
            1,
            veloz_instrument::symbol::SymbolIndex(0),
            veloz_instrument::Side::Buy,
            crate::order::OrderKind::Market,
            crate::order::TimeInForce::ImmediateOrCancel,
            Decimal::ONE,
            None,
            None,
            false,
            0,
        )
    }

    fn resilient(client: FlakyVenue, max_retries: u32, threshold: u32) -> Resilient<FlakyVenue> {
        Resilient::new(
            client,
            RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(2),
                request_timeout: Duration::from_secs(1),
            },
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(5),
            },
            RateLimiter::new(RateLimitConfig::default(), Utc::now()),
        )
    }

    #[tokio::test]
    async fn test_transport_failures_retried_to_success() {
        let wrapper = resilient(FlakyVenue::new(2), 3, 10);
        let symbol = symbol(VenueId::Mock, "btc", "usdt");

        let event = wrapper
            .place(&symbol, &ClientOrderId::new("s-1"), &intent())
            .await
            .unwrap();

        assert!(matches!(event.kind, TradingEventKind::OrderAccepted(_)));
        assert_eq!(wrapper.client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        // No retries; threshold 3: three failed places trip the circuit
        let wrapper = resilient(FlakyVenue::new(100), 0, 3);
        let symbol = symbol(VenueId::Mock, "btc", "usdt");
        let cid = ClientOrderId::new("s-1");

        for _ in 0..3 {
            assert!(wrapper.place(&symbol, &cid, &intent()).await.is_err());
        }
        assert_eq!(wrapper.circuit_state(), CircuitState::Open);

        let calls_before = wrapper.client.calls.load(Ordering::SeqCst);
        let error = wrapper.place(&symbol, &cid, &intent()).await.unwrap_err();
        assert_eq!(error, ExecutionError::CircuitOpen(VenueId::Mock));

        // Fast-fail: the venue was never touched
        assert_eq!(wrapper.client.calls.load(Ordering::SeqCst), calls_before);
    }
}

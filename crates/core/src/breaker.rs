//! Circuit breaker protecting calls to one dependent service.
//!
//! One breaker instance exists per dependency, constructed at process start and
//! injected into the saga; there is no ambient/static breaker state. State and
//! the rolling outcome window are shared across requests behind a mutex.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::downstream::{Dependency, ServiceError};

/// Breaker state for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; outcomes feed the rolling window.
    Closed,
    /// Calls are rejected without invoking the wrapped operation.
    Open,
    /// One probe call is allowed through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Tuning for one breaker instance.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Number of most-recent call outcomes kept in the rolling window.
    pub window_size: usize,
    /// Minimum outcomes in the window before the failure rate is evaluated.
    pub min_calls: usize,
    /// Failure rate at or above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Time the breaker stays open before allowing a half-open probe.
    pub cooldown: Duration,
    /// Maximum duration of a single wrapped call; exceeding it is a failure.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_calls: 5,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Error surfaced by a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The circuit is open; the wrapped operation was not invoked.
    #[error("circuit for {service} is open")]
    Open { service: Dependency },
    /// The wrapped operation itself failed (including timeouts).
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<BreakerError> for crate::error::RegistrationError {
    fn from(err: BreakerError) -> Self {
        match err {
            BreakerError::Open { service } => {
                crate::error::RegistrationError::BreakerOpen { service }
            }
            BreakerError::Service(ServiceError::Client { service, status }) => {
                crate::error::RegistrationError::DownstreamClient { service, status }
            }
            BreakerError::Service(ServiceError::Unavailable { service, reason }) => {
                crate::error::RegistrationError::DownstreamUnavailable { service, reason }
            }
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    /// Most-recent call outcomes, `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker for one dependent service.
pub struct CircuitBreaker {
    service: Dependency,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: Dependency, config: BreakerConfig) -> Self {
        Self {
            service,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The dependency this breaker protects.
    pub fn service(&self) -> Dependency {
        self.service
    }

    /// Current state, without side effects.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `op` under the breaker policy.
    ///
    /// Rejects immediately while open (cooldown not yet elapsed), admits a
    /// single probe when half-open, and enforces the per-call timeout. Every
    /// admitted call's outcome updates the rolling window and may transition
    /// the state machine; transitions are logged, nothing more.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.admit()?;

        let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Unavailable {
                service: self.service,
                reason: format!(
                    "call exceeded {}ms timeout",
                    self.config.call_timeout.as_millis()
                ),
            }),
        };

        self.record(result.is_ok());
        result.map_err(BreakerError::from)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides whether a call may proceed, performing the open-to-half-open
    /// transition when the cooldown has elapsed.
    fn admit(&self) -> Result<(), BreakerError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled_down {
                    return Err(BreakerError::Open {
                        service: self.service,
                    });
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(BreakerError::Open {
                        service: self.service,
                    });
                }
                inner.probe_in_flight = true;
                Ok(())
            }
        }
    }

    fn record(&self, success: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    inner.window.clear();
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Closed => {
                inner.window.push_back(!success);
                while inner.window.len() > self.config.window_size {
                    inner.window.pop_front();
                }
                if self.failure_rate_exceeded(&inner.window) {
                    inner.window.clear();
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // A call admitted before the breaker opened can report here; its
            // outcome no longer matters.
            CircuitState::Open => {}
        }
    }

    fn failure_rate_exceeded(&self, window: &VecDeque<bool>) -> bool {
        if window.len() < self.config.min_calls {
            return false;
        }
        let failures = window.iter().filter(|failed| **failed).count();
        (failures as f64 / window.len() as f64) >= self.config.failure_rate_threshold
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        tracing::warn!(
            service = %self.service,
            from = %inner.state,
            to = %next,
            "circuit breaker state transition"
        );
        inner.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> BreakerConfig {
        BreakerConfig {
            window_size: 10,
            min_calls: 4,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Dependency::Auth, config())
    }

    fn unavailable() -> ServiceError {
        ServiceError::Unavailable {
            service: Dependency::Auth,
            reason: "boom".into(),
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &Arc<AtomicUsize>) {
        let calls = calls.clone();
        let _ = breaker
            .call(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &Arc<AtomicUsize>) {
        let calls = calls.clone();
        breaker
            .call(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stays_closed_below_min_calls() {
        let breaker = breaker();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_at_failure_rate_threshold_and_short_circuits() {
        let breaker = breaker();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Rejected without invoking the wrapped operation.
        let err = {
            let calls = calls.clone();
            breaker
                .call(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ServiceError>(())
                })
                .await
                .unwrap_err()
        };
        assert!(matches!(err, BreakerError::Open { service: Dependency::Auth }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn mixed_outcomes_below_threshold_keep_it_closed() {
        let breaker = breaker();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            succeed(&breaker, &calls).await;
        }
        fail(&breaker, &calls).await;
        fail(&breaker, &calls).await;
        // 2 failures out of 8 in the window.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes_the_circuit() {
        let breaker = breaker();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Counters were reset; a single failure must not re-open it.
        fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens_and_restarts_cooldown() {
        let breaker = breaker();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cooldown restarted: still rejecting before it elapses again.
        tokio::time::advance(Duration::from_secs(10)).await;
        let before = calls.load(Ordering::SeqCst);
        fail(&breaker, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_count_as_failures() {
        let breaker = breaker();
        for _ in 0..4 {
            let err = breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, ServiceError>(())
                })
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                BreakerError::Service(ServiceError::Unavailable { .. })
            ));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

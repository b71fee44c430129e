use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering::Relaxed};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Circuit is closed, allowing all requests
    Closed = 0,
    /// Circuit is open, rejecting all requests
    Open = 1,
    /// Circuit is half-open, allowing a single trial request
    HalfOpen = 2,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures inside the sliding window before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close again
    pub success_threshold: u32,
    /// Base cooldown before re-arming an open circuit
    pub timeout_secs: u64,
    /// Cap for the exponentially growing cooldown
    pub max_timeout_secs: u64,
    /// Double the cooldown on every open transition
    pub exponential_backoff: bool,
    /// Number of recent outcomes tracked for the failure threshold
    pub sliding_window_size: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_secs: 60,
            max_timeout_secs: 300,
            exponential_backoff: true,
            sliding_window_size: 10,
        }
    }
}

/// Clock abstraction for testability
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;
}

/// Real system clock implementation
#[derive(Default, Debug)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Rejection returned while the circuit refuses calls.
#[derive(Debug, Clone, Copy, Error)]
#[error("circuit open, re-arms at {open_until_ms}ms")]
pub struct CircuitOpen {
    pub open_until_ms: u64,
}

/// Snapshot of breaker state for health endpoints and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: State,
    /// Failure share of the sliding window, 0.0 when empty.
    pub failure_ratio: f64,
    /// Re-arm instant while open.
    pub open_until_ms: Option<u64>,
}

/// Mutable breaker internals. The lock is held only for short, await-free
/// sections so outcome recording stays atomic with respect to transitions.
#[derive(Debug)]
struct Inner {
    /// Recent outcomes, `true` = failure. Bounded by `sliding_window_size`.
    window: VecDeque<bool>,
    consecutive_successes: u32,
    /// Cooldown the next open transition will use.
    next_timeout_secs: u64,
}

impl Inner {
    fn record(&mut self, failure: bool, cap: usize) {
        if self.window.len() == cap {
            self.window.pop_front();
        }
        self.window.push_back(failure);
    }

    fn failures(&self) -> u32 {
        self.window.iter().filter(|f| **f).count() as u32
    }

    fn failure_ratio(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.failures() as f64 / self.window.len() as f64
        }
    }
}

/// Shared circuit breaker.
///
/// Fast paths (state read, open check) are atomics; the sliding window lives
/// behind a short-lived mutex. Safe for parallel callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    open_until_ms: AtomicU64,
    inner: Mutex<Inner>,
    half_open_permit: Arc<Semaphore>,
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let next_timeout_secs = cfg.timeout_secs;
        Arc::new(Self {
            state: AtomicU8::new(State::Closed as u8),
            open_until_ms: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                window: VecDeque::with_capacity(cfg.sliding_window_size as usize),
                consecutive_successes: 0,
                next_timeout_secs,
            }),
            half_open_permit: Arc::new(Semaphore::new(1)),
            cfg,
            clock,
        })
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state.load(Relaxed).into()
    }

    /// Returns a permit guard when the call may proceed; `Err` when
    /// short-circuited. The guard is `Some` only for half-open probes.
    pub fn try_acquire(&self) -> Result<Option<OwnedSemaphorePermit>, CircuitOpen> {
        match self.state() {
            State::Closed => Ok(None),
            State::Open => {
                let now = self.clock.now_ms();
                let open_until = self.open_until_ms.load(Relaxed);
                if now < open_until {
                    return Err(CircuitOpen {
                        open_until_ms: open_until,
                    });
                }
                // Re-arm deadline elapsed: Open -> HalfOpen, then take the probe slot.
                debug!("circuit re-arm deadline elapsed, transitioning to half-open");
                self.state.store(State::HalfOpen as u8, Relaxed);
                self.try_acquire()
            }
            State::HalfOpen => match Arc::clone(&self.half_open_permit).try_acquire_owned() {
                Ok(permit) => Ok(Some(permit)),
                Err(_) => Err(CircuitOpen {
                    open_until_ms: self.open_until_ms.load(Relaxed),
                }),
            },
        }
    }

    /// Record a successful call outcome.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match self.state() {
            State::Closed => {
                inner.record(false, self.cfg.sliding_window_size as usize);
            }
            State::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.cfg.success_threshold {
                    info!(
                        successes = inner.consecutive_successes,
                        "circuit closing after successful probes"
                    );
                    self.state.store(State::Closed as u8, Relaxed);
                    inner.window.clear();
                    inner.consecutive_successes = 0;
                    inner.next_timeout_secs = self.cfg.timeout_secs;
                    self.refill_probe_permit();
                }
            }
            State::Open => {} // guarded by try_acquire, nothing to record
        }
    }

    /// Record a failed call outcome.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match self.state() {
            State::Closed => {
                inner.record(true, self.cfg.sliding_window_size as usize);
                if inner.failures() >= self.cfg.failure_threshold {
                    self.trip_open(&mut inner);
                }
            }
            State::HalfOpen => {
                warn!("probe failed in half-open, reopening circuit");
                self.trip_open(&mut inner);
            }
            State::Open => {}
        }
    }

    fn trip_open(&self, inner: &mut Inner) {
        let cooldown = inner.next_timeout_secs;
        let until = self.clock.now_ms() + cooldown * 1000;
        self.state.store(State::Open as u8, Relaxed);
        self.open_until_ms.store(until, Relaxed);
        inner.consecutive_successes = 0;
        if self.cfg.exponential_backoff {
            inner.next_timeout_secs = (cooldown * 2).min(self.cfg.max_timeout_secs);
        }
        self.refill_probe_permit();
        warn!(
            cooldown_secs = cooldown,
            failures = inner.failures(),
            "circuit opened"
        );
    }

    fn refill_probe_permit(&self) {
        let deficit = 1usize.saturating_sub(self.half_open_permit.available_permits());
        if deficit > 0 {
            self.half_open_permit.add_permits(deficit);
        }
    }

    /// Point-in-time view of `(state, window failure ratio, re-arm instant)`.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let state = self.state();
        BreakerStatus {
            state,
            failure_ratio: inner.failure_ratio(),
            open_until_ms: match state {
                State::Open => Some(self.open_until_ms.load(Relaxed)),
                _ => None,
            },
        }
    }
}

/// Error shape of [`guarded_call`]: either the breaker rejected the call or
/// the wrapped operation failed with its own error.
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    #[error(transparent)]
    Rejected(#[from] CircuitOpen),
    #[error("{0}")]
    Inner(E),
}

/// Run `f` under the breaker: rejected when open, outcome recorded otherwise.
pub async fn guarded_call<T, E, F, Fut>(
    cb: &Arc<CircuitBreaker>,
    f: F,
) -> Result<T, GuardedError<E>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let permit = cb.try_acquire()?;
    let res = f().await;
    match &res {
        Ok(_) => cb.on_success(),
        Err(_) => cb.on_failure(),
    }
    drop(permit);
    res.map_err(GuardedError::Inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default, Debug)]
    struct TestClock {
        now: AtomicU64,
    }

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Relaxed);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Relaxed)
        }
    }

    fn breaker(clock: Arc<TestClock>) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                timeout_secs: 5,
                max_timeout_secs: 20,
                exponential_backoff: true,
                sliding_window_size: 10,
            },
            clock,
        )
    }

    #[test]
    fn transitions_closed_open_halfopen_closed() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock.clone());

        assert_eq!(cb.state(), State::Closed);
        assert!(cb.try_acquire().unwrap().is_none());

        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), State::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
        assert!(cb.try_acquire().is_err());

        clock.advance(5_000);
        let permit = cb.try_acquire().expect("probe admitted");
        assert!(permit.is_some());
        assert_eq!(cb.state(), State::HalfOpen);

        // Two consecutive successes close the circuit.
        cb.on_success();
        assert_eq!(cb.state(), State::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock.clone());

        cb.on_failure();
        cb.on_failure();
        cb.on_failure();
        clock.advance(5_000);

        let p1 = cb.try_acquire().expect("first probe");
        assert!(p1.is_some());
        assert!(cb.try_acquire().is_err());

        drop(p1);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn half_open_failure_reopens_with_doubled_cooldown() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock.clone());

        cb.on_failure();
        cb.on_failure();
        cb.on_failure();
        let first_until = cb.status().open_until_ms.unwrap();
        assert_eq!(first_until, 5_000);

        clock.advance(5_000);
        let _permit = cb.try_acquire().expect("probe");
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);

        // Second open uses the doubled cooldown.
        let second_until = cb.status().open_until_ms.unwrap();
        assert_eq!(second_until, 5_000 + 10_000);
    }

    #[test]
    fn cooldown_caps_at_max_timeout() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock.clone());

        // 5 -> 10 -> 20 -> capped at 20
        for _ in 0..4 {
            // trip
            while cb.state() != State::Open {
                cb.on_failure();
            }
            let until = cb.status().open_until_ms.unwrap();
            clock.advance(until - clock.now_ms());
            let _p = cb.try_acquire().expect("probe");
            cb.on_failure();
        }
        let until = cb.status().open_until_ms.unwrap();
        assert_eq!(until - clock.now_ms(), 20_000);
    }

    #[test]
    fn close_resets_cooldown_to_base() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock.clone());

        cb.on_failure();
        cb.on_failure();
        cb.on_failure();
        clock.advance(5_000);
        {
            let _p = cb.try_acquire().expect("probe");
            cb.on_success();
        }
        {
            let _p = cb.try_acquire().expect("probe");
            cb.on_success();
        }
        assert_eq!(cb.state(), State::Closed);

        // Next trip is back to the base 5s cooldown.
        cb.on_failure();
        cb.on_failure();
        cb.on_failure();
        let until = cb.status().open_until_ms.unwrap();
        assert_eq!(until - clock.now_ms(), 5_000);
    }

    #[test]
    fn status_reports_window_ratio() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock);

        cb.on_success();
        cb.on_failure();
        let status = cb.status();
        assert_eq!(status.state, State::Closed);
        assert!((status.failure_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn guarded_call_records_outcomes() {
        let clock = Arc::new(TestClock::default());
        let cb = breaker(clock);

        let ok: Result<u32, GuardedError<&str>> = guarded_call(&cb, || async { Ok(7u32) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..3 {
            let _: Result<u32, _> =
                guarded_call(&cb, || async { Err::<u32, _>("boom") }).await;
        }
        assert_eq!(cb.state(), State::Open);

        let rejected: Result<u32, GuardedError<&str>> =
            guarded_call(&cb, || async { Ok(7u32) }).await;
        assert!(matches!(rejected, Err(GuardedError::Rejected(_))));
    }
}

//! Circuit breaker primitive for the archive pipeline.
//!
//! Every external dependency (archive providers, the structured extraction
//! service, the search engine) is called through one of these. The breaker
//! tracks outcomes in a sliding window, opens when the window crosses the
//! failure threshold, re-arms after an exponentially growing cooldown, and
//! admits a single probe in half-open.
//!
//! ## Usage
//! ```rust,no_run
//! use chronoscrape_reliability::{CircuitBreaker, CircuitBreakerConfig, RealClock};
//! use std::sync::Arc;
//!
//! let cb = CircuitBreaker::new(CircuitBreakerConfig::default(), Arc::new(RealClock));
//! match cb.try_acquire() {
//!     Ok(_permit) => {
//!         // perform the call, then cb.on_success() or cb.on_failure()
//!     }
//!     Err(_) => {
//!         // circuit open, fail fast
//!     }
//! }
//! ```

mod circuit_breaker;

pub use circuit_breaker::{
    guarded_call, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, Clock,
    GuardedError, RealClock, State,
};

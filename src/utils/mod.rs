pub mod circuit_breaker;
pub mod retry;
pub mod scope;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{retry_with_backoff, retry_on_transient, RetryConfig, RetryResult, IsTransient};
pub use scope::{cancel_on, RunScope};

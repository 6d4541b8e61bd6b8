pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_with_backoff, Retryable, RetryPolicy};

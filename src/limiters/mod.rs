pub mod circuit_breaker;

pub use circuit_breaker::RateLimitsCircuitBreaker;

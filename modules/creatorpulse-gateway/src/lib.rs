pub mod breaker;
pub mod gateway;
pub mod keys;
pub mod limiter;
pub mod migration;
pub mod retry;
pub mod router;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use gateway::{
    ApiGateway, GatewayFailure, GatewayMetrics, MetricsSnapshot, RequestEvent, TrackingSink,
};
pub use keys::{ApiKey, ApiKeyManager, CreatedKey, RateLimits};
pub use limiter::{
    FixedWindowLimiter, RateDecision, RateLimitInfo, SlidingWindowLimiter, TokenBucketLimiter,
    WindowStore,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use router::{
    GatewayRequest, GatewayResponse, HandlerResponse, Method, PlatformHandler, Route, Router,
};

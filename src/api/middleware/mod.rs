// Middleware module - authentication, rate limiting, CORS and observability

pub mod auth;
pub mod cors;
pub mod observability;
pub mod rate_limit;

// Re-export for convenience
pub use auth::require_auth;
pub use cors::create_cors_layer;
pub use rate_limit::{RateLimiterState, create_rate_limiter_with_quota, rate_limit_middleware};

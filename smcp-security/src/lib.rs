//! Authentication and rate limiting for the search-mcp aggregator.
//!
//! Both services are process-wide and injected into the frontend dispatcher:
//! the [`RateLimiter`] gates every `tools/call` by (tier, identifier) token
//! buckets, and the [`AuthManager`] turns an opaque API key into a
//! per-request [`AuthContext`] with permission patterns.

pub mod auth;
pub mod permissions;
pub mod rate_limit;

pub use auth::{
    hash_key, ApiKey, AuthContext, AuthManager, GeneratedKey, KeyStoreFile, AUTH_ENABLED_ENV,
    AUTH_KEYS_FILE_ENV, DEFAULT_KEYS_PATH,
};
pub use permissions::permission_matches;
pub use rate_limit::{default_tiers, RateDecision, RateLimiter, RateLimiterStats, TierConfig};

//! Token-bucket rate limiting keyed by (tier, identifier)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a full bucket must sit unused before eviction
const EVICTION_IDLE: Duration = Duration::from_secs(3600);

/// How often the eviction task runs
const EVICTION_PERIOD: Duration = Duration::from_secs(60);

/// Retry hint when the tier's refill rate is zero
const RETRY_AFTER_CAP_SECS: u64 = 86_400;

/// Token capacity and refill rate for one tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(rename = "maxTokens")]
    pub max_tokens: f64,

    /// Tokens added per second
    #[serde(rename = "refillRate")]
    pub refill_rate: f64,
}

/// Default tiers: anonymous, key-authenticated and premium callers
pub fn default_tiers() -> HashMap<String, TierConfig> {
    HashMap::from([
        (
            "default".to_string(),
            TierConfig {
                max_tokens: 100.0,
                refill_rate: 10.0,
            },
        ),
        (
            "authenticated".to_string(),
            TierConfig {
                max_tokens: 1000.0,
                refill_rate: 50.0,
            },
        ),
        (
            "premium".to_string(),
            TierConfig {
                max_tokens: 5000.0,
                refill_rate: 200.0,
            },
        ),
    ])
}

/// One bucket's state; `0 <= tokens <= max_tokens` always holds
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
    max_tokens: f64,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(config: TierConfig) -> Self {
        let now = Instant::now();
        Self {
            tokens: config.max_tokens,
            last_refill: now,
            last_used: now,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Seconds until the bucket is full again
    fn reset_after_secs(&self) -> f64 {
        if self.refill_rate <= 0.0 {
            return 0.0;
        }
        (self.max_tokens - self.tokens) / self.refill_rate
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,

    /// Whole tokens left after the check
    pub remaining: u64,

    /// Seconds until the bucket refills completely
    #[serde(rename = "resetAfterSeconds")]
    pub reset_after_secs: f64,

    /// Present on denial: whole seconds until the request would fit
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Statistics snapshot for the `get_rate_limit_stats` tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    #[serde(rename = "activeBuckets")]
    pub active_buckets: usize,

    #[serde(rename = "bucketsPerTier")]
    pub buckets_per_tier: HashMap<String, usize>,

    pub tiers: HashMap<String, TierConfig>,
}

/// Process-wide token-bucket rate limiter.
///
/// Buckets are created lazily on first use and evicted once they have been
/// idle for an hour and are back at full capacity, so an evicted bucket is
/// indistinguishable from a fresh one.
pub struct RateLimiter {
    tiers: HashMap<String, TierConfig>,
    buckets: Mutex<HashMap<(String, String), TokenBucket>>,
}

impl RateLimiter {
    /// Create a limiter with the default tiers
    pub fn new() -> Self {
        Self::with_tiers(default_tiers())
    }

    /// Create a limiter with explicit tier configuration
    pub fn with_tiers(tiers: HashMap<String, TierConfig>) -> Self {
        Self {
            tiers,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn tier_config(&self, tier: &str) -> TierConfig {
        self.tiers
            .get(tier)
            .or_else(|| self.tiers.get("default"))
            .copied()
            .unwrap_or(TierConfig {
                max_tokens: 100.0,
                refill_rate: 10.0,
            })
    }

    /// Check whether `cost` tokens are available for (tier, identifier),
    /// deducting them if so. Refill happens atomically with the check.
    pub async fn check_limit(&self, identifier: &str, tier: &str, cost: f64) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((tier.to_string(), identifier.to_string()))
            .or_insert_with(|| TokenBucket::new(self.tier_config(tier)));

        bucket.refill(now);
        bucket.last_used = now;

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            RateDecision {
                allowed: true,
                remaining: bucket.tokens.floor() as u64,
                reset_after_secs: bucket.reset_after_secs(),
                retry_after_secs: None,
            }
        } else {
            let retry_after = if bucket.refill_rate > 0.0 {
                let secs = ((cost - bucket.tokens) / bucket.refill_rate).ceil();
                (secs as u64).max(1)
            } else {
                RETRY_AFTER_CAP_SECS
            };
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_after_secs: bucket.reset_after_secs(),
                retry_after_secs: Some(retry_after),
            }
        }
    }

    /// Snapshot counts for stats reporting
    pub async fn get_stats(&self) -> RateLimiterStats {
        let buckets = self.buckets.lock().await;
        let mut per_tier: HashMap<String, usize> = HashMap::new();
        for (tier, _) in buckets.keys() {
            *per_tier.entry(tier.clone()).or_default() += 1;
        }
        RateLimiterStats {
            active_buckets: buckets.len(),
            buckets_per_tier: per_tier,
            tiers: self.tiers.clone(),
        }
    }

    /// Remove buckets that are both idle past `idle` and full.
    /// Returns the number of buckets removed.
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.refill(now);
            let is_idle = now.duration_since(bucket.last_used) >= idle;
            let is_full = bucket.tokens >= bucket.max_tokens;
            !(is_idle && is_full)
        });
        before - buckets.len()
    }

    /// Spawn the periodic eviction task
    pub fn spawn_eviction(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let removed = limiter.evict_idle(EVICTION_IDLE).await;
                if removed > 0 {
                    tracing::debug!(removed, "evicted idle rate-limit buckets");
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

//! Fixed-window admission control per client address.
//!
//! Each [`RateLimiter`] is a zone with its own window, limit and message.
//! Zone names prefix the store keys, so two zones never share a counter even
//! for the same client.

pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub use self::store::{MemoryWindowStore, RateLimitStore, RedisWindowStore, WindowHit};

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::middleware::client::ClientIdentity;

const GENERAL_MESSAGE: &str = "Too many requests from this IP, please try again later.";
const STRICT_MESSAGE: &str = "Too many authentication attempts, please try again later.";
const STRICT_WINDOW: Duration = Duration::from_secs(15 * 60);
const STRICT_MAX_REQUESTS: u64 = 5;

static RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate-limit store: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    zone: &'static str,
    window: Duration,
    max_requests: u64,
    message: &'static str,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(
        zone: &'static str,
        window: Duration,
        max_requests: u64,
        message: &'static str,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            zone,
            window,
            max_requests,
            message,
            store,
        }
    }

    /// Process-wide zone, sized from configuration.
    pub fn general(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self::new("general", config.window, config.max_requests, GENERAL_MESSAGE, store)
    }

    /// Fixed 5 requests per 15 minutes, for sensitive operations.
    pub fn strict(store: Arc<dyn RateLimitStore>) -> Self {
        Self::new("strict", STRICT_WINDOW, STRICT_MAX_REQUESTS, STRICT_MESSAGE, store)
    }

    /// Counts a request from `client` and decides whether it is admitted.
    pub async fn check(&self, client: &str) -> Result<Decision, RateLimitError> {
        let key = format!("{}:{client}", self.zone);
        let WindowHit { count, reset_after } = self.store.hit(&key, self.window).await?;

        Ok(Decision {
            allowed: count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            reset_after,
        })
    }

    fn write_headers(&self, decision: &Decision, headers: &mut HeaderMap) {
        let reset_secs = ceil_secs(decision.reset_after);
        let policy = format!("{};w={}", self.max_requests, ceil_secs(self.window));

        let pairs = [
            (&RATELIMIT_POLICY, policy),
            (&RATELIMIT_LIMIT, decision.limit.to_string()),
            (&RATELIMIT_REMAINING, decision.remaining.to_string()),
            (&RATELIMIT_RESET, reset_secs.to_string()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name.clone(), value);
            }
        }
        if !decision.allowed {
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(reset_secs));
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Both zones, built once at startup.
pub struct RateLimits {
    pub general: Arc<RateLimiter>,
    pub strict: Arc<RateLimiter>,
}

impl RateLimits {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            general: Arc::new(RateLimiter::general(config, Arc::clone(&store))),
            strict: Arc::new(RateLimiter::strict(store)),
        }
    }
}

// ─── Middleware ──────────────────────────────────────────────────

/// Admission layer for one zone. Rejections are raised as 429 and never
/// reach the wrapped routes.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    client: ClientIdentity,
    req: Request,
    next: Next,
) -> Response {
    let decision = match limiter.check(client.as_str()).await {
        Ok(decision) => decision,
        Err(e) => return AppError::from(e).into_response(),
    };

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        tracing::warn!(zone = limiter.zone, client = %client, "rate limit exceeded");
        AppError::new(StatusCode::TOO_MANY_REQUESTS, limiter.message).into_response()
    };

    limiter.write_headers(&decision, response.headers_mut());
    response
}

//! Fixed-window counter stores.
//!
//! A store only counts: `hit` increments the counter for a key and reports the
//! post-increment count and the time left in the window. Deciding whether the
//! count is over the limit is the limiter's job.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Script;

use super::RateLimitError;

/// Past this many keys the memory store drops expired windows on insert.
const PRUNE_THRESHOLD: usize = 10_000;

const HIT_LUA: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increments the counter for `key`, opening a fresh window
    /// of length `window` if none is active.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError>;

    fn store_type(&self) -> &'static str;
}

// ─── Memory ──────────────────────────────────────────────────────

struct Window {
    count: u64,
    started: Instant,
    length: Duration,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

/// Single-process counters behind one mutex.
#[derive(Default)]
pub struct MemoryWindowStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryWindowStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() >= PRUNE_THRESHOLD && !windows.contains_key(key) {
            windows.retain(|_, w| !w.expired(now));
        }

        let entry = windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            started: now,
            length: window,
        });
        if entry.expired(now) {
            entry.count = 0;
            entry.started = now;
            entry.length = window;
        }
        entry.count += 1;

        Ok(WindowHit {
            count: entry.count,
            reset_after: entry.length.saturating_sub(now.duration_since(entry.started)),
        })
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

// ─── Redis ───────────────────────────────────────────────────────

/// Counters as Redis keys with a `PEXPIRE` equal to the window, so expiry
/// is the reset and every instance sharing the Redis shares the counts.
pub struct RedisWindowStore {
    conn: ConnectionManager,
    prefix: String,
    hit: Script,
}

impl RedisWindowStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: "ratelimit:".into(),
            hit: Script::new(HIT_LUA),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl RateLimitStore for RedisWindowStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        tracing::trace!(key, window = ?window, "redis fixed window hit");

        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (u64, i64) = self
            .hit
            .key(self.key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowHit {
            count,
            reset_after: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

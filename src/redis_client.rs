use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::ratelimit::{MemoryWindowStore, RateLimitStore, RedisWindowStore};
use crate::store::{MemoryUserStore, RedisUserStore, StoreError, UserStore};

const MEMORY_URL: &str = "memory://";

/// The two process-wide stateful collaborators, opened together.
pub struct Backends {
    pub users: Arc<dyn UserStore>,
    pub windows: Arc<dyn RateLimitStore>,
}

/// Opens the backends named by `DATABASE_URL`.
///
/// `redis://…` shares one `ConnectionManager` (auto-reconnecting, cheaply
/// cloneable) between the user store and the rate-limit counters;
/// `memory://` keeps both in-process.
pub async fn connect(url: &str) -> Result<Backends, StoreError> {
    if url.starts_with(MEMORY_URL) {
        tracing::warn!("using in-memory store; data is lost on restart");
        return Ok(Backends {
            users: Arc::new(MemoryUserStore::new()),
            windows: Arc::new(MemoryWindowStore::new()),
        });
    }

    let client = redis::Client::open(url)?;
    let conn = ConnectionManager::new(client).await?;
    tracing::info!(url = %redacted(url), "redis connected");

    Ok(Backends {
        users: Arc::new(RedisUserStore::new(conn.clone())),
        windows: Arc::new(RedisWindowStore::new(conn)),
    })
}

/// Drops any `user:password@` part before logging.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}

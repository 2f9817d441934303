use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use shared::protocol::SessionToken;

pub const SESSION_DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
/// Refresh this far ahead of expiry so RPCs never race the deadline.
pub const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(30);
/// Back off this long after a failed refresh before trying again.
pub const SESSION_RETRY_PENALTY: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Inner {
    expires_at: Option<Instant>,
    retry_after: Option<Instant>,
}

/// Single-flight cache around the transport login token. Concurrent callers
/// serialize on the in-flight refresh and observe its result instead of
/// issuing duplicate token requests.
#[derive(Default)]
pub struct SessionCache {
    inner: Mutex<Inner>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh the session when forced or when the cached token is within
    /// the safety margin of expiry. `fetch` performs the actual token issue
    /// and login; only its TTL metadata is cached here.
    pub async fn ensure<F, Fut>(&self, fetch: F, force: bool) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionToken>>,
    {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if !force {
            if let Some(at) = inner.expires_at {
                if now + SESSION_REFRESH_MARGIN < at {
                    return Ok(());
                }
            }
            if let Some(at) = inner.retry_after {
                if now < at {
                    warn!("session refresh still in penalty window, keeping stale session");
                    return Ok(());
                }
            }
        }

        match fetch().await {
            Ok(token) => {
                let ttl = token
                    .expires_in
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(SESSION_DEFAULT_TTL);
                inner.expires_at = Some(Instant::now() + ttl);
                inner.retry_after = None;
                debug!(ttl_secs = ttl.as_secs(), "session refreshed");
                Ok(())
            }
            Err(err) => {
                inner.retry_after = Some(Instant::now() + SESSION_RETRY_PENALTY);
                Err(err)
            }
        }
    }
}

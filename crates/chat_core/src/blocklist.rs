use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use shared::domain::UserId;
use shared::protocol::{BlockedRow, Message};

/// Client-tracked "I blocked this peer" cutoffs. The backend only reveals
/// the opposite direction through the channel `frozen` flag, so this side of
/// the relationship is kept on the client: set when the user blocks, cleared
/// on unblock, re-seeded from the blocked-users listing on login.
#[derive(Clone, Default)]
pub struct BlockStore {
    inner: Arc<RwLock<HashMap<UserId, i64>>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &UserId, at_ms: i64) {
        self.inner.write().await.insert(user_id.clone(), at_ms);
    }

    pub async fn clear(&self, user_id: &UserId) {
        self.inner.write().await.remove(user_id);
    }

    pub async fn cutoff_for(&self, user_id: &UserId) -> Option<i64> {
        self.inner.read().await.get(user_id).copied()
    }

    pub async fn sync_from_rows(&self, rows: &[BlockedRow]) {
        let mut map = self.inner.write().await;
        map.clear();
        for row in rows {
            map.insert(row.user_id.clone(), row.blocked_at.timestamp_millis());
        }
    }
}

/// A peer message created at or after the block cutoff is hidden; everything
/// else stays visible. No cutoff means nothing is hidden.
pub fn is_visible(message: &Message, peer: &UserId, cutoff: Option<i64>) -> bool {
    match cutoff {
        Some(at) if message.author_id == *peer => message.created_at < at,
        _ => true,
    }
}

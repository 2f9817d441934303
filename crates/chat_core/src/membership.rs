use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use shared::domain::{ChannelId, UserId};
use shared::protocol::{ChannelListingEntry, ChannelMember};
use shared::time::to_ms;

use crate::MarketplaceBackend;

/// Cached view of who is in the channel and how far the peer has read.
/// Session state, not view state: an in-flight refresh is allowed to land
/// after the room closed.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    pub member_ids: HashSet<UserId>,
    pub peer_last_read_at: Option<i64>,
    pub peer_avatar: Option<String>,
    pub refreshed_at: Option<Instant>,
}

impl MembershipSnapshot {
    /// Replace the member set and merge the peer's read pointer and avatar.
    /// Returns true when the read pointer advanced.
    pub fn absorb_members(&mut self, members: &[ChannelMember], peer: &UserId) -> bool {
        self.member_ids = members.iter().map(|m| m.user_id.clone()).collect();
        self.refreshed_at = Some(Instant::now());

        let mut advanced = false;
        if let Some(member) = members.iter().find(|m| m.user_id == *peer) {
            if let Some(raw) = member.last_read_at {
                advanced = self.advance_read_pointer(to_ms(raw));
            }
            if member.avatar_url.is_some() && member.avatar_url != self.peer_avatar {
                self.peer_avatar = member.avatar_url.clone();
            }
        }
        advanced
    }

    /// Monotonic merge: the pointer never moves backwards.
    pub fn advance_read_pointer(&mut self, at_ms: i64) -> bool {
        match self.peer_last_read_at {
            Some(current) if at_ms <= current => false,
            _ => {
                self.peer_last_read_at = Some(at_ms);
                true
            }
        }
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.refreshed_at
            .is_some_and(|at| at.elapsed() < window)
    }

    /// The peer has left when the channel is down to just me.
    pub fn is_only(&self, me: &UserId) -> bool {
        self.member_ids.len() == 1 && self.member_ids.contains(me)
    }
}

/// The participant the channel was originally created with, used to re-add a
/// departed peer. Prefers members who have not withdrawn their account.
pub fn pick_origin_peer(entry: &ChannelListingEntry, me: &UserId) -> Option<UserId> {
    let others = entry
        .origin_members
        .iter()
        .filter(|m| m.user_id != *me)
        .collect::<Vec<_>>();
    others
        .iter()
        .find(|m| !m.withdrawn)
        .or_else(|| others.first())
        .map(|m| m.user_id.clone())
}

/// Walk the backend's cursor-paginated channel listing until the channel
/// shows up. `page_cap` bounds the walk.
pub async fn find_channel_paged(
    backend: &dyn MarketplaceBackend,
    channel_id: &ChannelId,
    page_cap: usize,
) -> Result<Option<ChannelListingEntry>> {
    let mut cursor: Option<ChannelId> = None;
    for _ in 0..page_cap {
        let page = backend.list_channels(cursor.as_ref()).await?;
        if let Some(found) = page
            .channels
            .iter()
            .find(|c| c.channel_id == *channel_id)
        {
            return Ok(Some(found.clone()));
        }
        if !page.has_next || page.channels.is_empty() {
            break;
        }
        cursor = page.channels.last().map(|c| c.channel_id.clone());
    }
    Ok(None)
}

use std::collections::HashSet;

use shared::domain::{ChannelId, DeliveryState, MessageId, UserId};
use shared::protocol::{Message, MessagePayload};

use crate::blocklist;
use crate::membership::MembershipSnapshot;
use crate::normalizer::Signal;

/// Message ids already materialized in this room's timeline. First insert
/// wins; entries never expire while the room is open, which is what makes
/// the optimistic echo racing the realtime broadcast harmless.
#[derive(Debug, Default)]
pub struct SeenIdLedger {
    seen: HashSet<MessageId>,
}

impl SeenIdLedger {
    pub fn insert(&mut self, id: &MessageId) -> bool {
        self.seen.insert(id.clone())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }
}

/// Side effects the engine must run after a reducer step. The reducer itself
/// never performs IO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub timeline_changed: bool,
    pub mark_read: bool,
    pub new_message_while_away: bool,
    pub read_advanced: bool,
    pub frozen_changed: Option<bool>,
    pub refresh_membership: bool,
    pub refresh_peer_standing: bool,
}

/// All mutable state of one open chat room. Mutated only through the engine
/// (single writer); the view layer reads snapshots.
pub struct RoomState {
    pub channel_id: ChannelId,
    pub me: UserId,
    pub peer: UserId,
    /// Newest first, matching the inverted room list.
    pub timeline: Vec<Message>,
    pub ledger: SeenIdLedger,
    pub snapshot: MembershipSnapshot,
    pub frozen: bool,
    pub peer_withdrawn: bool,
    pub alarm_on: bool,
    pub prev_alarm: Option<bool>,
    pub at_bottom: bool,
    pub has_next: bool,
    pub sending: bool,
    pub greeting_sent: bool,
    pub origin_peer: Option<UserId>,
}

impl RoomState {
    pub fn new(channel_id: ChannelId, me: UserId, peer: UserId, peer_withdrawn: bool) -> Self {
        Self {
            channel_id,
            me,
            peer,
            timeline: Vec::new(),
            ledger: SeenIdLedger::default(),
            snapshot: MembershipSnapshot::default(),
            frozen: false,
            peer_withdrawn,
            alarm_on: true,
            prev_alarm: None,
            at_bottom: true,
            has_next: true,
            sending: false,
            greeting_sent: false,
            origin_peer: None,
        }
    }

    /// Pure reducer: one normalized signal in, new state plus the effects
    /// the engine owes. Signals for other channels are ignored.
    pub fn apply(&mut self, signal: &Signal, block_cutoff: Option<i64>) -> ApplyOutcome {
        let mut out = ApplyOutcome::default();
        match signal {
            Signal::MessageArrived(message) => {
                if message.channel_id != self.channel_id {
                    return out;
                }
                // A hidden peer message still advances the server-side read
                // pointer so it cannot pile up as phantom unread.
                if !blocklist::is_visible(message, &self.peer, block_cutoff) {
                    out.mark_read = true;
                    return out;
                }
                if self.ledger.insert(&message.id) {
                    self.timeline.insert(0, message.clone());
                    out.timeline_changed = true;
                }
                out.mark_read = true;
                if !self.at_bottom {
                    out.new_message_while_away = true;
                }
            }
            Signal::MessageDeleted {
                channel_id,
                message_id,
            } => {
                if *channel_id != self.channel_id {
                    return out;
                }
                let before = self.timeline.len();
                self.timeline.retain(|m| m.id != *message_id);
                out.timeline_changed = self.timeline.len() != before;
            }
            Signal::ChannelChanged {
                channel_id,
                frozen,
                members,
            } => {
                if *channel_id != self.channel_id {
                    return out;
                }
                if *frozen != self.frozen {
                    self.frozen = *frozen;
                    out.frozen_changed = Some(*frozen);
                }
                out.read_advanced = self.snapshot.absorb_members(members, &self.peer);
                out.refresh_peer_standing = true;
            }
            Signal::MemberLeft { channel_id, .. } => {
                if *channel_id != self.channel_id {
                    return out;
                }
                out.refresh_membership = true;
                out.refresh_peer_standing = true;
            }
            Signal::ReadAdvanced {
                channel_id,
                user_id,
                last_read_at,
            } => {
                if *channel_id != self.channel_id || *user_id != self.peer {
                    return out;
                }
                if let Some(at) = last_read_at {
                    out.read_advanced = self.snapshot.advance_read_pointer(*at);
                }
            }
            // Index-screen signals; a room has nothing to patch.
            Signal::ChannelAdded { .. } | Signal::ChannelLeft { .. } => {}
        }
        out
    }

    /// Seed the timeline from the initial history fetch, applying the block
    /// filter and registering every visible id.
    pub fn seed_initial(&mut self, messages: Vec<Message>, block_cutoff: Option<i64>, has_next: bool) {
        self.timeline.clear();
        self.ledger = SeenIdLedger::default();
        for message in messages {
            if !blocklist::is_visible(&message, &self.peer, block_cutoff) {
                continue;
            }
            if self.ledger.insert(&message.id) {
                self.timeline.push(message);
            }
        }
        self.has_next = has_next;
    }

    /// Append an older history page below the current timeline.
    pub fn append_older(
        &mut self,
        messages: Vec<Message>,
        block_cutoff: Option<i64>,
        has_next: bool,
    ) {
        for message in messages {
            if !blocklist::is_visible(&message, &self.peer, block_cutoff) {
                continue;
            }
            if self.ledger.insert(&message.id) {
                self.timeline.push(message);
            }
        }
        self.has_next = has_next;
    }

    /// Insert the optimistic local entry at the newest position.
    pub fn insert_local(&mut self, message: Message) {
        self.ledger.insert(&message.id);
        self.timeline.insert(0, message);
    }

    /// Replace a pending local entry with the transport-confirmed message,
    /// in place. When the realtime echo already delivered the confirmed id,
    /// the local entry is simply dropped so exactly one copy survives.
    pub fn resolve_local(&mut self, local_id: &MessageId, confirmed: Message) {
        if self.ledger.contains(&confirmed.id) {
            self.timeline.retain(|m| m.id != *local_id);
            return;
        }
        self.ledger.insert(&confirmed.id);
        match self.timeline.iter_mut().find(|m| m.id == *local_id) {
            Some(slot) => *slot = confirmed,
            None => self.timeline.insert(0, confirmed),
        }
    }

    pub fn mark_failed(&mut self, local_id: &MessageId) -> bool {
        self.set_delivery(local_id, DeliveryState::Failed)
    }

    pub fn mark_pending(&mut self, local_id: &MessageId) -> bool {
        self.set_delivery(local_id, DeliveryState::Pending)
    }

    fn set_delivery(&mut self, id: &MessageId, delivery: DeliveryState) -> bool {
        match self.timeline.iter_mut().find(|m| m.id == *id) {
            Some(message) => {
                message.delivery = delivery;
                true
            }
            None => false,
        }
    }

    /// Drop a failed attempt from the timeline entirely.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.timeline.len();
        self.timeline.retain(|m| m.id != *id);
        self.timeline.len() != before
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.timeline.iter().find(|m| m.id == *id)
    }

    /// Timestamp of my newest message, the target the read probe waits for.
    pub fn newest_mine_at(&self) -> i64 {
        self.timeline
            .iter()
            .find(|m| m.author_id == self.me)
            .map(|m| m.created_at)
            .unwrap_or(0)
    }

    /// The newest message, used to detect a fresh listing-card room.
    pub fn newest_listing_id(&self) -> Option<i64> {
        match self.timeline.first().map(|m| &m.payload) {
            Some(MessagePayload::SystemCard { listing }) => Some(listing.listing_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;

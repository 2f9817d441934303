use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shared::domain::{ChannelId, UserId};
use shared::protocol::{
    AttachmentKind, ChannelListingEntry, Message, MessagePayload, OriginMember, RawEvent,
};

use crate::blocklist::BlockStore;
use crate::normalizer::{self, Signal};
use crate::resync::{ResyncScheduler, MUTATION_MUTE, MUTE_TAIL};
use crate::timeline::SeenIdLedger;
use crate::{ChatTransport, MarketplaceBackend, NOTIFICATION_SYNC_LIMIT};

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePreview {
    None,
    Text(String),
    Attachment(AttachmentKind),
    ImageGroup(usize),
    Listing,
}

pub fn preview_from_message(message: &Message) -> MessagePreview {
    match &message.payload {
        MessagePayload::Text { body } => MessagePreview::Text(body.clone()),
        MessagePayload::Attachment { file } => MessagePreview::Attachment(file.kind()),
        MessagePayload::ImageGroup { items } => MessagePreview::ImageGroup(items.len()),
        MessagePayload::SystemCard { .. } => MessagePreview::Listing,
    }
}

#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub channel_id: ChannelId,
    pub peer: Option<OriginMember>,
    pub preview: MessagePreview,
    pub last_activity_at: Option<i64>,
    pub unread_count: u32,
    pub alarm_on: bool,
    /// The newest message came from a blocked peer; the view shows a stub
    /// instead of the preview.
    pub last_from_blocked: bool,
}

#[derive(Debug, Clone)]
pub enum IndexEvent {
    RoomsChanged,
}

struct IndexState {
    rooms: Vec<RoomEntry>,
    ledger: SeenIdLedger,
    has_next: bool,
}

/// Engine behind the chat index screen: keeps the room list ordered by
/// activity, folds realtime signals into it, and falls back to a debounced
/// full refetch whenever a signal is too ambiguous to patch incrementally.
pub struct IndexEngine {
    me: UserId,
    transport: Arc<dyn ChatTransport>,
    backend: Arc<dyn MarketplaceBackend>,
    blocks: BlockStore,
    scheduler: Arc<ResyncScheduler>,
    resync_rx: Mutex<Option<mpsc::Receiver<()>>>,
    state: Mutex<IndexState>,
    events: broadcast::Sender<IndexEvent>,
}

impl IndexEngine {
    pub fn new(
        me: UserId,
        transport: Arc<dyn ChatTransport>,
        backend: Arc<dyn MarketplaceBackend>,
        blocks: BlockStore,
    ) -> Arc<Self> {
        let (scheduler, resync_rx) = ResyncScheduler::new();
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            me,
            transport,
            backend,
            blocks,
            scheduler,
            resync_rx: Mutex::new(Some(resync_rx)),
            state: Mutex::new(IndexState {
                rooms: Vec::new(),
                ledger: SeenIdLedger::default(),
                has_next: true,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    pub async fn rooms(&self) -> Vec<RoomEntry> {
        self.state.lock().await.rooms.clone()
    }

    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.transport.subscribe_events();
        tokio::spawn(async move {
            let mut resync = engine.resync_rx.lock().await.take();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => engine.handle_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "index event stream lagged, scheduling resync");
                            engine.scheduler.request().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    fired = recv_resync(&mut resync) => {
                        if fired {
                            engine.refetch_muted().await;
                        } else {
                            resync = None;
                        }
                    }
                }
            }
            engine.scheduler.shutdown().await;
        })
    }

    pub async fn handle_event(&self, event: &RawEvent) {
        // Inside the mute window only structural events pass; everything
        // else is the echo of a mutation this client just made.
        if self.scheduler.is_muted().await
            && !matches!(event.kind.as_str(), "channel_added" | "channel_left")
        {
            return;
        }
        for signal in normalizer::normalize(event) {
            self.apply_signal(signal).await;
        }
    }

    async fn apply_signal(&self, signal: Signal) {
        match signal {
            Signal::MessageArrived(message) => self.on_message(message).await,
            Signal::MessageDeleted { .. } => self.scheduler.request().await,
            Signal::ChannelAdded { entry: Some(entry) } => {
                let room = self.entry_to_room(&entry).await;
                let channel_id = room.channel_id.clone();
                {
                    let mut state = self.state.lock().await;
                    state.rooms.retain(|r| r.channel_id != channel_id);
                    state.rooms.insert(0, room);
                }
                self.emit();
                self.align_notification(&channel_id).await;
            }
            // Too incomplete to patch: refetch the whole page, muted.
            Signal::ChannelAdded { entry: None } => self.refetch_muted().await,
            Signal::ChannelLeft { channel_id } => self.remove_room(&channel_id).await,
            Signal::MemberLeft {
                channel_id,
                user_id,
            } => {
                if user_id == self.me {
                    self.remove_room(&channel_id).await;
                }
            }
            Signal::ReadAdvanced {
                channel_id,
                user_id,
                ..
            } => {
                if user_id == self.me {
                    let mut state = self.state.lock().await;
                    if let Some(room) = state
                        .rooms
                        .iter_mut()
                        .find(|r| r.channel_id == channel_id)
                    {
                        room.unread_count = 0;
                    }
                    drop(state);
                    self.emit();
                }
            }
            // Per-room detail; the index has nothing to patch.
            Signal::ChannelChanged { .. } => {}
        }
    }

    async fn on_message(&self, message: Message) {
        if self.state.lock().await.ledger.contains(&message.id) {
            return;
        }
        // A blocked peer's message advances the server read pointer so it
        // does not accumulate as unread, but never surfaces in the list.
        let cutoff = self.blocks.cutoff_for(&message.author_id).await;
        if message.author_id != self.me && cutoff.is_some_and(|at| message.created_at >= at) {
            if let Err(err) = self.transport.mark_channel_read(&message.channel_id).await {
                debug!(channel_id = %message.channel_id, %err, "mark read for blocked arrival failed");
            }
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.ledger.insert(&message.id);
            let is_mine = message.author_id == self.me;
            match state
                .rooms
                .iter()
                .position(|r| r.channel_id == message.channel_id)
            {
                Some(index) => {
                    let mut room = state.rooms.remove(index);
                    room.preview = preview_from_message(&message);
                    room.last_activity_at = Some(message.created_at);
                    room.last_from_blocked = false;
                    if !is_mine {
                        room.unread_count += 1;
                    }
                    state.rooms.insert(0, room);
                }
                None => {
                    // Unknown channel: show a placeholder row immediately,
                    // the scheduled resync fills in the peer details.
                    state.rooms.insert(
                        0,
                        RoomEntry {
                            channel_id: message.channel_id.clone(),
                            peer: None,
                            preview: preview_from_message(&message),
                            last_activity_at: Some(message.created_at),
                            unread_count: u32::from(!is_mine),
                            alarm_on: true,
                            last_from_blocked: false,
                        },
                    );
                }
            }
        }
        self.emit();
        self.scheduler.request().await;
    }

    /// Full reload of the first listing page, reconciled against what the
    /// list already shows. Server unread counts win; local previews survive
    /// where the server has none.
    pub async fn refetch(&self) -> Result<()> {
        let page = self.backend.list_channels(None).await?;
        let mut mapped = Vec::with_capacity(page.channels.len());
        for entry in &page.channels {
            mapped.push(self.entry_to_room(entry).await);
        }
        let sync_targets: Vec<ChannelId> = mapped
            .iter()
            .take(NOTIFICATION_SYNC_LIMIT)
            .map(|r| r.channel_id.clone())
            .collect();
        {
            let mut state = self.state.lock().await;
            state.has_next = page.has_next;
            let old_rooms = std::mem::take(&mut state.rooms);
            for room in mapped.iter_mut() {
                if let Some(old) = old_rooms.iter().find(|r| r.channel_id == room.channel_id) {
                    if room.preview == MessagePreview::None && !room.last_from_blocked {
                        room.preview = old.preview.clone();
                    }
                    if room.last_activity_at.is_none() {
                        room.last_activity_at = old.last_activity_at;
                    }
                    room.alarm_on = old.alarm_on;
                }
            }
            // Rooms from deeper pages stay below the refreshed first page.
            for old in old_rooms {
                if !mapped.iter().any(|r| r.channel_id == old.channel_id) {
                    mapped.push(old);
                }
            }
            state.rooms = mapped;
        }
        self.emit();
        self.sync_notifications(sync_targets).await;
        Ok(())
    }

    pub async fn load_more(&self) -> Result<()> {
        let cursor = {
            let state = self.state.lock().await;
            if !state.has_next {
                return Ok(());
            }
            state.rooms.last().map(|r| r.channel_id.clone())
        };
        let page = self.backend.list_channels(cursor.as_ref()).await?;
        let mut fresh = Vec::with_capacity(page.channels.len());
        for entry in &page.channels {
            fresh.push(self.entry_to_room(entry).await);
        }
        let sync_targets;
        {
            let mut state = self.state.lock().await;
            state.has_next = page.has_next;
            let existing: HashSet<ChannelId> =
                state.rooms.iter().map(|r| r.channel_id.clone()).collect();
            let dedup: Vec<RoomEntry> = fresh
                .into_iter()
                .filter(|r| !existing.contains(&r.channel_id))
                .collect();
            sync_targets = dedup
                .iter()
                .take(NOTIFICATION_SYNC_LIMIT)
                .map(|r| r.channel_id.clone())
                .collect::<Vec<_>>();
            state.rooms.extend(dedup);
        }
        self.emit();
        self.sync_notifications(sync_targets).await;
        Ok(())
    }

    /// Refetch wrapped in the echo-suppression window: muted while the
    /// request is out, a short tail once it lands.
    pub async fn refetch_muted(&self) {
        self.scheduler.mute_for(MUTATION_MUTE).await;
        if let Err(err) = self.refetch().await {
            warn!(%err, "channel list refetch failed");
        }
        self.scheduler.mute_for(MUTE_TAIL).await;
    }

    pub async fn toggle_alarm(&self, channel_id: &ChannelId, enabled: bool) -> Result<()> {
        self.scheduler.mute_for(MUTATION_MUTE).await;
        self.backend
            .set_channel_notifications(channel_id, enabled)
            .await?;
        if let Err(err) = self
            .transport
            .set_channel_push_enabled(channel_id, enabled)
            .await
        {
            debug!(channel_id = %channel_id, %err, "transport push toggle failed");
        }
        {
            let mut state = self.state.lock().await;
            if let Some(room) = state.rooms.iter_mut().find(|r| r.channel_id == *channel_id) {
                room.alarm_on = enabled;
            }
        }
        self.emit();
        Ok(())
    }

    pub async fn leave(&self, channel_id: &ChannelId) -> Result<()> {
        self.scheduler.mute_for(MUTATION_MUTE).await;
        self.backend.leave_channel(channel_id).await?;
        self.remove_room(channel_id).await;
        Ok(())
    }

    /// A room screen left this channel; drop it from the list without
    /// another round trip.
    pub async fn note_channel_left(&self, channel_id: &ChannelId) {
        self.remove_room(channel_id).await;
    }

    async fn remove_room(&self, channel_id: &ChannelId) {
        let removed = {
            let mut state = self.state.lock().await;
            let before = state.rooms.len();
            state.rooms.retain(|r| r.channel_id != *channel_id);
            state.rooms.len() != before
        };
        if removed {
            self.emit();
        }
    }

    /// Bring the provider's per-channel push switches in line with the
    /// backend preference for the listed rooms. Best effort per channel.
    async fn sync_notifications(&self, targets: Vec<ChannelId>) {
        if targets.is_empty() {
            return;
        }
        let fetches = targets
            .iter()
            .map(|channel_id| self.backend.channel_notifications(channel_id));
        let results = join_all(fetches).await;
        for (channel_id, result) in targets.iter().zip(results) {
            let Ok(enabled) = result else {
                continue;
            };
            {
                let mut state = self.state.lock().await;
                if let Some(room) = state.rooms.iter_mut().find(|r| r.channel_id == *channel_id) {
                    room.alarm_on = enabled;
                }
            }
            if let Err(err) = self
                .transport
                .set_channel_push_enabled(channel_id, enabled)
                .await
            {
                debug!(channel_id = %channel_id, %err, "transport push sync failed");
            }
        }
        self.emit();
    }

    async fn align_notification(&self, channel_id: &ChannelId) {
        self.sync_notifications(vec![channel_id.clone()]).await;
    }

    async fn entry_to_room(&self, entry: &ChannelListingEntry) -> RoomEntry {
        let peer = entry
            .origin_members
            .iter()
            .find(|m| m.user_id != self.me)
            .cloned();
        let cutoff = match &peer {
            Some(peer) => self.blocks.cutoff_for(&peer.user_id).await,
            None => None,
        };
        let last = entry.last_message.as_ref();
        let last_from_peer = matches!(
            (last, &peer),
            (Some(message), Some(peer)) if message.author_id == peer.user_id
        );
        let last_from_blocked = last_from_peer
            && cutoff
                .zip(last)
                .is_some_and(|(at, message)| message.created_at >= at);
        RoomEntry {
            channel_id: entry.channel_id.clone(),
            peer,
            preview: if last_from_blocked {
                MessagePreview::None
            } else {
                last.map(preview_from_message).unwrap_or(MessagePreview::None)
            },
            last_activity_at: if last_from_blocked {
                None
            } else {
                last.map(|m| m.created_at).or(Some(entry.updated_at))
            },
            unread_count: if cutoff.is_some() {
                0
            } else {
                entry.unread_count
            },
            alarm_on: true,
            last_from_blocked,
        }
    }

    fn emit(&self) {
        let _ = self.events.send(IndexEvent::RoomsChanged);
    }
}

async fn recv_resync(rx: &mut Option<mpsc::Receiver<()>>) -> bool {
    match rx {
        Some(rx) => rx.recv().await.is_some(),
        None => std::future::pending::<bool>().await,
    }
}

#[cfg(test)]
#[path = "tests/index_tests.rs"]
mod tests;

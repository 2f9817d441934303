use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::domain::{ChannelId, DeliveryState, MessageId, UserId};
use shared::protocol::{
    AttachmentInfo, BlockedRow, ChannelPage, ChannelRecord, ListingCard, Message, MessagePage,
    MessagePayload, OutgoingFile, RawEvent,
};

pub mod blocklist;
pub mod error;
pub mod index;
pub mod membership;
pub mod normalizer;
pub mod notify;
pub mod read_receipt;
pub mod resync;
pub mod session;
pub mod timeline;

pub use blocklist::BlockStore;
pub use error::SendRejection;
pub use index::{IndexEngine, IndexEvent, MessagePreview, RoomEntry};
pub use normalizer::{normalize, Signal};
pub use notify::{LocalNotifier, MissingLocalNotifier, NotificationDecision};
pub use resync::ResyncScheduler;
pub use session::SessionCache;
pub use timeline::{ApplyOutcome, RoomState, SeenIdLedger};

use read_receipt::{READ_PROBE_ATTEMPTS, READ_PROBE_INTERVAL};

/// A membership snapshot younger than this is trusted without a refetch.
const SNAPSHOT_FRESH_WINDOW: Duration = Duration::from_secs(10);
const REPAIR_TIMEOUT: Duration = Duration::from_secs(8);
/// Pages walked through the backend listing while resolving the origin member.
const ORIGIN_LOOKUP_PAGE_CAP: usize = 20;
const HISTORY_PAGE_SIZE: u32 = 20;
const UNFREEZE_ATTEMPTS: u32 = 6;
const UNFREEZE_DELAY: Duration = Duration::from_millis(400);
const MAX_ATTACHMENT_BYTES: u64 = 15 * 1024 * 1024;
pub(crate) const NOTIFICATION_SYNC_LIMIT: usize = 12;
const GREETING_TEXT: &str = "Hello! I'm writing about your listing.";

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The realtime chat provider, consumed as an opaque event source plus RPC
/// client. The wire protocol behind it is not this crate's concern.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn subscribe_events(&self) -> broadcast::Receiver<RawEvent>;
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<ChannelRecord>;
    async fn get_messages(
        &self,
        channel_id: &ChannelId,
        limit: u32,
        before: Option<&MessageId>,
    ) -> Result<MessagePage>;
    async fn send_text_message(&self, channel_id: &ChannelId, text: &str) -> Result<Message>;
    async fn send_file_message(
        &self,
        channel_id: &ChannelId,
        file: &OutgoingFile,
    ) -> Result<Message>;
    async fn add_channel_members(&self, channel_id: &ChannelId, members: &[UserId]) -> Result<()>;
    async fn mark_channel_read(&self, channel_id: &ChannelId) -> Result<()>;
    async fn set_channel_push_enabled(&self, channel_id: &ChannelId, enabled: bool) -> Result<()>;
}

pub struct MissingChatTransport;

#[async_trait]
impl ChatTransport for MissingChatTransport {
    fn subscribe_events(&self) -> broadcast::Receiver<RawEvent> {
        // Sender dropped on return: the stream reads as closed.
        let (_tx, rx) = broadcast::channel(1);
        rx
    }

    async fn get_channel(&self, channel_id: &ChannelId) -> Result<ChannelRecord> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn get_messages(
        &self,
        channel_id: &ChannelId,
        _limit: u32,
        _before: Option<&MessageId>,
    ) -> Result<MessagePage> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn send_text_message(&self, channel_id: &ChannelId, _text: &str) -> Result<Message> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn send_file_message(
        &self,
        channel_id: &ChannelId,
        _file: &OutgoingFile,
    ) -> Result<Message> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn add_channel_members(
        &self,
        channel_id: &ChannelId,
        _members: &[UserId],
    ) -> Result<()> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn mark_channel_read(&self, channel_id: &ChannelId) -> Result<()> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }

    async fn set_channel_push_enabled(
        &self,
        channel_id: &ChannelId,
        _enabled: bool,
    ) -> Result<()> {
        Err(anyhow!("chat transport unavailable for channel {channel_id}"))
    }
}

/// The marketplace's own REST layer: the channel directory that outlives
/// transport membership, notification preferences and the block list.
#[async_trait]
pub trait MarketplaceBackend: Send + Sync {
    async fn list_channels(&self, cursor: Option<&ChannelId>) -> Result<ChannelPage>;
    async fn channel_notifications(&self, channel_id: &ChannelId) -> Result<bool>;
    async fn set_channel_notifications(&self, channel_id: &ChannelId, enabled: bool)
        -> Result<()>;
    async fn leave_channel(&self, channel_id: &ChannelId) -> Result<()>;
    async fn blocked_users(&self) -> Result<Vec<BlockedRow>>;
    async fn block_user(&self, user_id: &UserId) -> Result<()>;
    async fn unblock_user(&self, user_id: &UserId) -> Result<()>;
}

pub struct MissingMarketplaceBackend;

#[async_trait]
impl MarketplaceBackend for MissingMarketplaceBackend {
    async fn list_channels(&self, _cursor: Option<&ChannelId>) -> Result<ChannelPage> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn channel_notifications(&self, _channel_id: &ChannelId) -> Result<bool> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn set_channel_notifications(
        &self,
        _channel_id: &ChannelId,
        _enabled: bool,
    ) -> Result<()> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn leave_channel(&self, _channel_id: &ChannelId) -> Result<()> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn blocked_users(&self) -> Result<Vec<BlockedRow>> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn block_user(&self, _user_id: &UserId) -> Result<()> {
        Err(anyhow!("marketplace backend is unavailable"))
    }

    async fn unblock_user(&self, _user_id: &UserId) -> Result<()> {
        Err(anyhow!("marketplace backend is unavailable"))
    }
}

#[derive(Debug, Clone)]
pub enum RoomEvent {
    TimelineChanged,
    StateChanged,
    ReadAdvanced,
    NewMessageWhileScrolledUp,
    Left,
}

/// Terminal result of one send attempt. The optimistic entry and every
/// intermediate state are published on the event stream, so callers may
/// fire-and-forget the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(SendRejection),
    Confirmed { message_id: MessageId },
    Failed { local_id: MessageId },
}

enum SendBody {
    Text(String),
    File(OutgoingFile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomViewState {
    pub frozen: bool,
    pub peer_blocked: bool,
    pub peer_withdrawn: bool,
    pub alarm_on: bool,
    pub has_next: bool,
    pub peer_avatar: Option<String>,
    pub peer_last_read_at: Option<i64>,
    pub last_read_message_id: Option<MessageId>,
}

#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub channel_id: ChannelId,
    pub me: UserId,
    pub peer: UserId,
    pub peer_withdrawn: bool,
    /// Listing this room was opened from, if any; drives the one-shot
    /// greeting when the newest message is that listing's card.
    pub listing: Option<ListingCard>,
}

/// Per-channel synchronization engine. Created when the room opens and
/// dropped on teardown; realtime events for the channel are applied strictly
/// in arrival order through one event loop.
pub struct RoomEngine {
    channel_id: ChannelId,
    me: UserId,
    peer: UserId,
    listing: Option<ListingCard>,
    transport: Arc<dyn ChatTransport>,
    backend: Arc<dyn MarketplaceBackend>,
    blocks: BlockStore,
    state: Mutex<RoomState>,
    repair_gate: Mutex<()>,
    read_probe: std::sync::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<RoomEvent>,
}

impl RoomEngine {
    pub fn new(
        options: RoomOptions,
        transport: Arc<dyn ChatTransport>,
        backend: Arc<dyn MarketplaceBackend>,
        blocks: BlockStore,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            channel_id: options.channel_id.clone(),
            me: options.me.clone(),
            peer: options.peer.clone(),
            listing: options.listing,
            transport,
            backend,
            blocks,
            state: Mutex::new(RoomState::new(
                options.channel_id,
                options.me,
                options.peer,
                options.peer_withdrawn,
            )),
            repair_gate: Mutex::new(()),
            read_probe: std::sync::Mutex::new(None),
            events,
        })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// One sequential lane per channel: events are applied in delivery
    /// order, never concurrently.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.transport.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => engine.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            channel_id = %engine.channel_id,
                            skipped, "realtime event stream lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle_event(&self, event: &RawEvent) {
        for signal in normalizer::normalize(event) {
            self.apply_signal(signal).await;
        }
    }

    async fn apply_signal(&self, signal: Signal) {
        let cutoff = self.blocks.cutoff_for(&self.peer).await;
        let outcome = self.state.lock().await.apply(&signal, cutoff);
        self.run_effects(outcome).await;
    }

    async fn run_effects(&self, outcome: ApplyOutcome) {
        if outcome.mark_read {
            if let Err(err) = self.transport.mark_channel_read(&self.channel_id).await {
                debug!(channel_id = %self.channel_id, %err, "mark read failed");
            }
        }
        if outcome.refresh_membership {
            if let Err(err) = self.refresh_members().await {
                warn!(channel_id = %self.channel_id, %err, "membership refresh failed");
            }
        }
        if outcome.refresh_peer_standing {
            self.refresh_peer_standing().await;
        }
        if outcome.timeline_changed {
            self.emit(RoomEvent::TimelineChanged);
        }
        if outcome.read_advanced {
            self.emit(RoomEvent::ReadAdvanced);
        }
        if outcome.frozen_changed.is_some() {
            self.emit(RoomEvent::StateChanged);
        }
        if outcome.new_message_while_away {
            self.emit(RoomEvent::NewMessageWhileScrolledUp);
        }
    }

    pub async fn load_initial(self: &Arc<Self>) -> Result<()> {
        let page = self
            .transport
            .get_messages(&self.channel_id, HISTORY_PAGE_SIZE, None)
            .await?;
        let cutoff = self.blocks.cutoff_for(&self.peer).await;
        self.state
            .lock()
            .await
            .seed_initial(page.messages, cutoff, page.has_next);
        self.emit(RoomEvent::TimelineChanged);

        if let Err(err) = self.transport.mark_channel_read(&self.channel_id).await {
            debug!(channel_id = %self.channel_id, %err, "initial mark read failed");
        }
        self.refresh_members().await?;
        self.refresh_peer_standing().await;
        if let Ok(enabled) = self.backend.channel_notifications(&self.channel_id).await {
            self.state.lock().await.alarm_on = enabled;
        }
        self.emit(RoomEvent::StateChanged);

        self.maybe_send_greeting().await;
        Ok(())
    }

    pub async fn load_more(&self) -> Result<()> {
        let before = {
            let state = self.state.lock().await;
            if !state.has_next || state.timeline.is_empty() {
                return Ok(());
            }
            state.timeline.last().map(|m| m.id.clone())
        };
        let page = self
            .transport
            .get_messages(&self.channel_id, HISTORY_PAGE_SIZE, before.as_ref())
            .await?;
        let cutoff = self.blocks.cutoff_for(&self.peer).await;
        self.state
            .lock()
            .await
            .append_older(page.messages, cutoff, page.has_next);
        self.emit(RoomEvent::TimelineChanged);
        Ok(())
    }

    pub async fn send_text(self: &Arc<Self>, text: &str) -> SendOutcome {
        let text = text.trim().to_string();
        if text.is_empty() {
            return SendOutcome::Rejected(SendRejection::EmptyText);
        }
        let local_id = match self
            .admit_send(MessagePayload::Text { body: text.clone() })
            .await
        {
            Ok(local_id) => local_id,
            Err(rejection) => return SendOutcome::Rejected(rejection),
        };
        let outcome = self.submit(local_id, SendBody::Text(text)).await;
        self.state.lock().await.sending = false;
        outcome
    }

    pub async fn send_file(self: &Arc<Self>, file: OutgoingFile) -> SendOutcome {
        if file.size_bytes > MAX_ATTACHMENT_BYTES {
            return SendOutcome::Rejected(SendRejection::AttachmentTooLarge);
        }
        let payload = MessagePayload::Attachment {
            file: AttachmentInfo {
                url: file.local_uri.clone(),
                name: Some(file.name.clone()),
                mime_type: file.mime_type.clone(),
                size_bytes: Some(file.size_bytes),
                thumbnail: None,
            },
        };
        let local_id = match self.admit_send(payload).await {
            Ok(local_id) => local_id,
            Err(rejection) => return SendOutcome::Rejected(rejection),
        };
        let outcome = self.submit(local_id, SendBody::File(file)).await;
        self.state.lock().await.sending = false;
        outcome
    }

    /// Gate one attempt through the composer and append the optimistic
    /// entry. Rejections leave no trace in the timeline.
    async fn admit_send(&self, payload: MessagePayload) -> Result<MessageId, SendRejection> {
        let blocked = self.blocks.cutoff_for(&self.peer).await.is_some();
        let local_id = {
            let mut state = self.state.lock().await;
            if state.sending {
                return Err(SendRejection::InFlight);
            }
            if state.frozen {
                return Err(SendRejection::Frozen);
            }
            if blocked {
                return Err(SendRejection::PeerBlocked);
            }
            if state.peer_withdrawn {
                return Err(SendRejection::PeerWithdrawn);
            }
            state.sending = true;
            let local = Message {
                id: MessageId::local(),
                channel_id: self.channel_id.clone(),
                author_id: self.me.clone(),
                created_at: now_ms(),
                payload,
                delivery: DeliveryState::Pending,
            };
            let local_id = local.id.clone();
            state.insert_local(local);
            local_id
        };
        self.emit(RoomEvent::TimelineChanged);
        Ok(local_id)
    }

    async fn submit(self: &Arc<Self>, local_id: MessageId, body: SendBody) -> SendOutcome {
        // A channel the peer has left would swallow the message; repair
        // first, then send regardless of how the repair went.
        if self.state.lock().await.snapshot.is_only(&self.me) {
            self.ensure_peer_present().await;
        }

        let sent = match &body {
            SendBody::Text(text) => self.transport.send_text_message(&self.channel_id, text).await,
            SendBody::File(file) => self.transport.send_file_message(&self.channel_id, file).await,
        };

        match sent {
            Ok(confirmed) => {
                let message_id = confirmed.id.clone();
                self.state.lock().await.resolve_local(&local_id, confirmed);
                self.emit(RoomEvent::TimelineChanged);
                if let Err(err) = self.transport.mark_channel_read(&self.channel_id).await {
                    debug!(channel_id = %self.channel_id, %err, "mark read after send failed");
                }
                self.kick_read_probe();
                SendOutcome::Confirmed { message_id }
            }
            Err(err) => {
                warn!(channel_id = %self.channel_id, %err, "message send failed");
                self.state.lock().await.mark_failed(&local_id);
                self.emit(RoomEvent::TimelineChanged);
                SendOutcome::Failed { local_id }
            }
        }
    }

    /// Resubmit a failed attempt with its original payload, in place.
    pub async fn retry(self: &Arc<Self>, local_id: &MessageId) -> SendOutcome {
        let Some(body) = self.failed_body(local_id).await else {
            return SendOutcome::Rejected(SendRejection::NoSuchAttempt);
        };
        self.state.lock().await.mark_pending(local_id);
        self.emit(RoomEvent::TimelineChanged);
        self.submit(local_id.clone(), body).await
    }

    async fn failed_body(&self, local_id: &MessageId) -> Option<SendBody> {
        let state = self.state.lock().await;
        let message = state.find(local_id)?;
        if message.delivery != DeliveryState::Failed || message.author_id != self.me {
            return None;
        }
        match &message.payload {
            MessagePayload::Text { body } => Some(SendBody::Text(body.clone())),
            MessagePayload::Attachment { file } => Some(SendBody::File(OutgoingFile {
                name: file.name.clone().unwrap_or_else(|| "file".to_string()),
                mime_type: file.mime_type.clone(),
                size_bytes: file.size_bytes.unwrap_or(0),
                local_uri: file.url.clone(),
            })),
            _ => None,
        }
    }

    /// Remove a failed attempt from the timeline entirely.
    pub async fn cancel(&self, local_id: &MessageId) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let failed = state
                .find(local_id)
                .is_some_and(|m| m.delivery == DeliveryState::Failed);
            failed && state.remove(local_id)
        };
        if removed {
            self.emit(RoomEvent::TimelineChanged);
        }
        removed
    }

    /// Re-add the departed peer before a send can reach anyone. Concurrent
    /// callers serialize on one gate, so at most one add-member call goes
    /// out; failures are logged and swallowed so the send path is never
    /// blocked on a repair that cannot succeed.
    pub async fn ensure_peer_present(&self) {
        let _gate = self.repair_gate.lock().await;
        {
            let state = self.state.lock().await;
            if state.snapshot.member_count() >= 2
                && state.snapshot.is_fresh(SNAPSHOT_FRESH_WINDOW)
            {
                return;
            }
        }
        match tokio::time::timeout(REPAIR_TIMEOUT, self.repair_once()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(channel_id = %self.channel_id, %err, "membership repair failed")
            }
            Err(_) => warn!(channel_id = %self.channel_id, "membership repair timed out"),
        }
    }

    async fn repair_once(&self) -> Result<()> {
        self.refresh_members().await?;
        if !self.state.lock().await.snapshot.is_only(&self.me) {
            return Ok(());
        }
        if self.state.lock().await.origin_peer.is_none() {
            self.refresh_peer_standing().await;
        }
        let Some(origin) = self.state.lock().await.origin_peer.clone() else {
            return Err(anyhow!("origin member unresolved"));
        };
        self.transport
            .add_channel_members(&self.channel_id, std::slice::from_ref(&origin))
            .await?;
        self.refresh_members().await?;
        info!(channel_id = %self.channel_id, member = %origin, "re-added departed peer");
        Ok(())
    }

    async fn refresh_members(&self) -> Result<()> {
        let record = self.transport.get_channel(&self.channel_id).await?;
        let (advanced, frozen_changed) = {
            let mut state = self.state.lock().await;
            let advanced = state.snapshot.absorb_members(&record.members, &self.peer);
            let frozen_changed = state.frozen != record.frozen;
            state.frozen = record.frozen;
            (advanced, frozen_changed)
        };
        if advanced {
            self.emit(RoomEvent::ReadAdvanced);
        }
        if frozen_changed {
            self.emit(RoomEvent::StateChanged);
        }
        Ok(())
    }

    /// Origin member and withdrawn standing come from the backend listing,
    /// not the transport; both lookups are best effort.
    async fn refresh_peer_standing(&self) {
        match membership::find_channel_paged(
            self.backend.as_ref(),
            &self.channel_id,
            ORIGIN_LOOKUP_PAGE_CAP,
        )
        .await
        {
            Ok(Some(entry)) => {
                let origin = membership::pick_origin_peer(&entry, &self.me);
                let withdrawn = entry
                    .origin_members
                    .iter()
                    .find(|m| m.user_id != self.me)
                    .map(|m| m.withdrawn);
                let changed = {
                    let mut state = self.state.lock().await;
                    state.origin_peer = origin;
                    match withdrawn {
                        Some(w) if w != state.peer_withdrawn => {
                            state.peer_withdrawn = w;
                            true
                        }
                        _ => false,
                    }
                };
                if changed {
                    self.emit(RoomEvent::StateChanged);
                }
            }
            Ok(None) => {
                debug!(channel_id = %self.channel_id, "channel missing from backend listing")
            }
            Err(err) => {
                warn!(channel_id = %self.channel_id, %err, "origin member lookup failed")
            }
        }
    }

    /// Probe the peer's read pointer while the view sits at the newest
    /// message; stops early once the pointer crosses my newest message.
    pub fn kick_read_probe(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let target = engine.state.lock().await.newest_mine_at();
            if target == 0 {
                return;
            }
            for _ in 0..READ_PROBE_ATTEMPTS {
                {
                    let state = engine.state.lock().await;
                    if !state.at_bottom {
                        return;
                    }
                    if state.snapshot.peer_last_read_at.unwrap_or(0) >= target {
                        return;
                    }
                }
                if let Err(err) = engine.refresh_members().await {
                    debug!(channel_id = %engine.channel_id, %err, "read probe refresh failed");
                }
                if engine
                    .state
                    .lock()
                    .await
                    .snapshot
                    .peer_last_read_at
                    .unwrap_or(0)
                    >= target
                {
                    return;
                }
                tokio::time::sleep(READ_PROBE_INTERVAL).await;
            }
            debug!(channel_id = %engine.channel_id, "read probe exhausted");
        });
        if let Some(previous) = self.probe_slot().replace(handle) {
            previous.abort();
        }
    }

    /// Scrolling away from the bottom cancels the probe; returning to the
    /// bottom is the caller's cue to kick it again.
    pub async fn set_at_bottom(&self, at_bottom: bool) {
        self.state.lock().await.at_bottom = at_bottom;
        if !at_bottom {
            if let Some(probe) = self.probe_slot().take() {
                probe.abort();
            }
        }
    }

    pub async fn block_peer(&self) -> Result<()> {
        self.backend.block_user(&self.peer).await?;
        self.blocks.set(&self.peer, now_ms()).await;
        {
            let mut state = self.state.lock().await;
            state.prev_alarm = Some(state.alarm_on);
        }
        self.apply_alarm(false).await;
        if let Err(err) = self.refresh_members().await {
            debug!(channel_id = %self.channel_id, %err, "frozen refresh after block failed");
        }
        self.emit(RoomEvent::StateChanged);
        Ok(())
    }

    pub async fn unblock_peer(self: &Arc<Self>) -> Result<()> {
        self.backend.unblock_user(&self.peer).await?;
        self.blocks.clear(&self.peer).await;
        self.wait_unfreeze().await;
        self.load_initial().await?;
        let restore = self.state.lock().await.prev_alarm.take().unwrap_or(false);
        self.apply_alarm(restore).await;
        self.emit(RoomEvent::StateChanged);
        Ok(())
    }

    /// The server lifts `frozen` shortly after an unblock; poll a few times
    /// rather than trusting the first snapshot.
    async fn wait_unfreeze(&self) {
        for _ in 0..UNFREEZE_ATTEMPTS {
            if let Err(err) = self.refresh_members().await {
                debug!(channel_id = %self.channel_id, %err, "unfreeze refresh failed");
            }
            if !self.state.lock().await.frozen {
                return;
            }
            tokio::time::sleep(UNFREEZE_DELAY).await;
        }
        debug!(channel_id = %self.channel_id, "channel still frozen after unblock wait");
    }

    /// Best effort on both layers; the room stays usable if either fails.
    async fn apply_alarm(&self, enabled: bool) {
        if let Err(err) = self
            .backend
            .set_channel_notifications(&self.channel_id, enabled)
            .await
        {
            debug!(channel_id = %self.channel_id, %err, "backend notification toggle failed");
        }
        if let Err(err) = self
            .transport
            .set_channel_push_enabled(&self.channel_id, enabled)
            .await
        {
            debug!(channel_id = %self.channel_id, %err, "transport push toggle failed");
        }
        self.state.lock().await.alarm_on = enabled;
    }

    pub async fn set_alarm(&self, enabled: bool) -> Result<()> {
        self.backend
            .set_channel_notifications(&self.channel_id, enabled)
            .await?;
        if let Err(err) = self
            .transport
            .set_channel_push_enabled(&self.channel_id, enabled)
            .await
        {
            debug!(channel_id = %self.channel_id, %err, "transport push toggle failed");
        }
        self.state.lock().await.alarm_on = enabled;
        self.emit(RoomEvent::StateChanged);
        Ok(())
    }

    pub async fn leave(&self) -> Result<()> {
        self.backend.leave_channel(&self.channel_id).await?;
        self.emit(RoomEvent::Left);
        Ok(())
    }

    /// Opened from a listing whose card is the newest message: greet once.
    async fn maybe_send_greeting(self: &Arc<Self>) {
        let Some(listing) = &self.listing else {
            return;
        };
        {
            let mut state = self.state.lock().await;
            if state.greeting_sent || state.newest_listing_id() != Some(listing.listing_id) {
                return;
            }
            state.greeting_sent = true;
        }
        if !matches!(
            self.send_text(GREETING_TEXT).await,
            SendOutcome::Confirmed { .. }
        ) {
            self.state.lock().await.greeting_sent = false;
        }
    }

    pub async fn timeline(&self) -> Vec<Message> {
        self.state.lock().await.timeline.clone()
    }

    pub async fn view_state(&self) -> RoomViewState {
        let peer_blocked = self.blocks.cutoff_for(&self.peer).await.is_some();
        let state = self.state.lock().await;
        RoomViewState {
            frozen: state.frozen,
            peer_blocked,
            peer_withdrawn: state.peer_withdrawn,
            alarm_on: state.alarm_on,
            has_next: state.has_next,
            peer_avatar: state.snapshot.peer_avatar.clone(),
            peer_last_read_at: state.snapshot.peer_last_read_at,
            last_read_message_id: read_receipt::last_read_my_message(
                &state.timeline,
                state.snapshot.peer_last_read_at,
                &self.me,
            ),
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    fn probe_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.read_probe.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for RoomEngine {
    fn drop(&mut self) {
        if let Some(probe) = self.probe_slot().take() {
            probe.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

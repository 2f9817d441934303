use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::{ChannelId, DeliveryState, MessageId, MessageKind, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    /// Millisecond timestamp assigned by the transport.
    pub created_at: i64,
    pub payload: MessagePayload,
    pub delivery: DeliveryState,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.payload {
            MessagePayload::Text { .. } => MessageKind::Text,
            MessagePayload::Attachment { .. } => MessageKind::Attachment,
            MessagePayload::ImageGroup { .. } => MessageKind::ImageGroup,
            MessagePayload::SystemCard { .. } => MessageKind::SystemCard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text { body: String },
    Attachment { file: AttachmentInfo },
    ImageGroup { items: Vec<ImageItem> },
    SystemCard { listing: ListingCard },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Other,
}

impl AttachmentInfo {
    pub fn kind(&self) -> AttachmentKind {
        let Some(mime) = self.mime_type.as_deref() else {
            return AttachmentKind::Other;
        };
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.starts_with("video/") {
            AttachmentKind::Video
        } else if mime.starts_with("audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Reference card pointing at a marketplace listing. Rendered inline in the
/// timeline but never counted for read receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCard {
    pub listing_id: i64,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub user_id: UserId,
    #[serde(default)]
    pub last_read_at: Option<i64>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Live channel snapshot as returned by the transport's `get_channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: ChannelId,
    pub members: Vec<ChannelMember>,
    #[serde(default)]
    pub frozen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_next: bool,
}

/// Membership as the marketplace backend remembers it, surviving transport
/// departures. Used to repair a channel the peer has left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginMember {
    pub user_id: UserId,
    pub nickname: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub withdrawn: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelListingEntry {
    pub channel_id: ChannelId,
    pub origin_members: Vec<OriginMember>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPage {
    pub channels: Vec<ChannelListingEntry>,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedRow {
    pub user_id: UserId,
    pub blocked_at: DateTime<Utc>,
}

/// Opaque event envelope emitted by the realtime transport. The shape of
/// `data` is provider-defined; the normalizer classifies what it can and
/// drops the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: String,
    pub data: Value,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// One incoming push, as handed over by the delivery layer in both the
/// foreground callback and the background entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub notification: Option<PushNotificationContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotificationContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Descriptor for a file the user picked; the engine forwards it to the
/// transport without touching the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingFile {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub local_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub login_token: String,
    /// Seconds until expiry; the session cache falls back to its default
    /// TTL when absent.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

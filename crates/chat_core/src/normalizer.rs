use serde_json::Value;
use tracing::debug;

use shared::domain::{ChannelId, DeliveryState, MessageId, UserId};
use shared::protocol::{
    AttachmentInfo, ChannelListingEntry, ChannelMember, ImageItem, ListingCard, Message,
    MessagePayload, OriginMember, RawEvent,
};
use shared::time::to_ms;

/// Typed lifecycle signal produced from one opaque transport event.
#[derive(Debug, Clone)]
pub enum Signal {
    MessageArrived(Message),
    MessageDeleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    ChannelChanged {
        channel_id: ChannelId,
        frozen: bool,
        members: Vec<ChannelMember>,
    },
    MemberLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
    ReadAdvanced {
        channel_id: ChannelId,
        user_id: UserId,
        last_read_at: Option<i64>,
    },
    /// `entry` is None when the event payload was too incomplete to patch
    /// the room list incrementally; the index falls back to a full refetch.
    ChannelAdded {
        entry: Option<ChannelListingEntry>,
    },
    ChannelLeft {
        channel_id: ChannelId,
    },
}

/// Classify one raw event. Events with an unrecognized kind or a malformed
/// payload produce no signals; this layer never fails and never reorders.
pub fn normalize(event: &RawEvent) -> Vec<Signal> {
    let signal = match event.kind.as_str() {
        "message" => parse_message(event.data.get("message")).map(Signal::MessageArrived),
        "message_deleted" => {
            match (
                channel_id_of(&event.data),
                string_field(&event.data, "messageId"),
            ) {
                (Some(channel_id), Some(message_id)) => Some(Signal::MessageDeleted {
                    channel_id,
                    message_id: MessageId::new(message_id),
                }),
                _ => None,
            }
        }
        "channel_changed" => parse_channel_changed(&event.data),
        "member_left" => {
            match (channel_id_of(&event.data), id_field(&event.data, "userId")) {
                (Some(channel_id), Some(user_id)) => Some(Signal::MemberLeft {
                    channel_id,
                    user_id,
                }),
                _ => None,
            }
        }
        "message_read" => {
            match (channel_id_of(&event.data), id_field(&event.data, "userId")) {
                (Some(channel_id), Some(user_id)) => Some(Signal::ReadAdvanced {
                    channel_id,
                    user_id,
                    last_read_at: event
                        .data
                        .get("lastReadAt")
                        .and_then(Value::as_i64)
                        .map(to_ms),
                }),
                _ => None,
            }
        }
        "channel_added" => Some(Signal::ChannelAdded {
            entry: parse_listing_entry(event.data.get("channel")),
        }),
        "channel_left" => channel_id_of(&event.data).map(|channel_id| Signal::ChannelLeft { channel_id }),
        _ => None,
    };

    match signal {
        Some(signal) => vec![signal],
        None => {
            debug!(kind = %event.kind, "dropping unrecognized realtime event");
            Vec::new()
        }
    }
}

fn parse_channel_changed(data: &Value) -> Option<Signal> {
    let channel = data.get("channel")?;
    let channel_id = string_field(channel, "id").map(ChannelId::new)?;
    let frozen = channel
        .get("isFrozen")
        .or_else(|| channel.get("frozen"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let members = channel
        .get("members")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(parse_member).collect())
        .unwrap_or_default();
    Some(Signal::ChannelChanged {
        channel_id,
        frozen,
        members,
    })
}

fn parse_member(v: &Value) -> Option<ChannelMember> {
    let user_id = id_field(v, "userId").or_else(|| id_field(v, "id"))?;
    Some(ChannelMember {
        user_id,
        last_read_at: v.get("lastReadAt").and_then(Value::as_i64).map(to_ms),
        avatar_url: string_field(v, "profileImageUrl"),
    })
}

fn parse_message(v: Option<&Value>) -> Option<Message> {
    let v = v?;
    let id = string_field(v, "id").map(MessageId::new)?;
    let channel_id = string_field(v, "channelId").map(ChannelId::new)?;
    let author_id = id_field(v, "userId")?;
    let created_at = to_ms(v.get("createdAt").and_then(Value::as_i64)?);
    let payload = classify_payload(v)?;
    Some(Message {
        id,
        channel_id,
        author_id,
        created_at,
        payload,
        delivery: DeliveryState::Confirmed,
    })
}

fn classify_payload(v: &Value) -> Option<MessagePayload> {
    let msg_type = string_field(v, "type").unwrap_or_else(|| "text".to_string());
    let data = v.get("data");
    let data_str = |key: &str| data.and_then(|d| string_field(d, key));

    if msg_type == "custom" {
        return match data_str("kind").as_deref() {
            Some("imageGroup") => Some(MessagePayload::ImageGroup {
                items: parse_image_items(data_str("payload").as_deref()),
            }),
            Some("listingCard") => parse_listing_card(data?).map(|listing| {
                MessagePayload::SystemCard { listing }
            }),
            _ => None,
        };
    }

    // A back-reference card travels as a text message with marker data.
    if msg_type == "text" && data_str("messageType").as_deref() == Some("listingInfo") {
        return parse_listing_card(data?).map(|listing| MessagePayload::SystemCard { listing });
    }

    // File messages are text messages with an upload attached.
    let file_url = string_field(v, "fileUrl")
        .or_else(|| v.get("file").and_then(|f| string_field(f, "url")));
    if file_url.is_some() || data_str("uiType").as_deref() == Some("file") {
        return Some(MessagePayload::Attachment {
            file: AttachmentInfo {
                url: file_url.unwrap_or_default(),
                name: data_str("fileName"),
                mime_type: data_str("fileMime"),
                size_bytes: data_str("fileSize").and_then(|s| s.parse().ok()),
                thumbnail: data_str("thumbnail"),
            },
        });
    }

    if msg_type == "text" {
        let body = string_field(v, "text")?;
        if body.is_empty() {
            return None;
        }
        return Some(MessagePayload::Text { body });
    }

    None
}

/// Image groups carry their items as a JSON string inside the data map; a
/// payload that fails to parse degrades to an empty group rather than
/// dropping the message.
fn parse_image_items(raw: Option<&str>) -> Vec<ImageItem> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|parsed| {
            parsed.get("items").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(ImageItem {
                            url: string_field(item, "url")?,
                            thumbnail: string_field(item, "thumbnail")
                                .or_else(|| string_field(item, "thumb")),
                            width: item.get("width").and_then(Value::as_u64).map(|w| w as u32),
                            height: item.get("height").and_then(Value::as_u64).map(|h| h as u32),
                        })
                    })
                    .collect()
            })
        })
        .unwrap_or_default()
}

fn parse_listing_card(data: &Value) -> Option<ListingCard> {
    let listing_id = data
        .get("listingId")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))?;
    Some(ListingCard {
        listing_id,
        brand_name: string_field(data, "brandName"),
        model_name: string_field(data, "modelName"),
        price: data
            .get("price")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))),
        thumbnail: string_field(data, "thumbnail").or_else(|| string_field(data, "imageUrl")),
    })
}

/// A channel-added payload is only usable for an incremental patch when it
/// names the channel and its origin membership.
fn parse_listing_entry(v: Option<&Value>) -> Option<ChannelListingEntry> {
    let v = v?;
    let channel_id = string_field(v, "id").map(ChannelId::new)?;
    let origin_members = v
        .get("originMembers")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(parse_origin_member)
        .collect::<Vec<_>>();
    if origin_members.is_empty() {
        return None;
    }
    Some(ChannelListingEntry {
        channel_id,
        origin_members,
        last_message: parse_message(v.get("lastMessage")),
        unread_count: v
            .get("unreadCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        updated_at: v.get("updatedAt").and_then(Value::as_i64).map(to_ms).unwrap_or(0),
    })
}

fn parse_origin_member(v: &Value) -> Option<OriginMember> {
    Some(OriginMember {
        user_id: id_field(v, "userId")?,
        nickname: string_field(v, "nickname").unwrap_or_default(),
        avatar_url: string_field(v, "profileImage"),
        withdrawn: v.get("withdrawn").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn channel_id_of(data: &Value) -> Option<ChannelId> {
    string_field(data, "channelId")
        .or_else(|| data.get("channel").and_then(|c| string_field(c, "id")))
        .map(ChannelId::new)
}

/// Provider ids show up as strings or numbers depending on the event.
fn id_field(v: &Value, key: &str) -> Option<UserId> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(UserId::new(s.clone())),
        Value::Number(n) => Some(UserId::new(n.to_string())),
        _ => None,
    }
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;

use super::*;
use serde_json::json;
use shared::domain::MessageKind;

fn event(kind: &str, data: serde_json::Value) -> RawEvent {
    RawEvent::new(kind, data)
}

fn single(event: &RawEvent) -> Signal {
    let mut signals = normalize(event);
    assert_eq!(signals.len(), 1, "expected exactly one signal");
    signals.remove(0)
}

#[test]
fn text_message_event() {
    let signal = single(&event(
        "message",
        json!({
            "message": {
                "id": "m1",
                "channelId": "c1",
                "userId": "peer",
                "type": "text",
                "text": "hello",
                "createdAt": 1_700_000_000_000i64,
            }
        }),
    ));
    let Signal::MessageArrived(message) = signal else {
        panic!("expected MessageArrived");
    };
    assert_eq!(message.id, MessageId::new("m1"));
    assert_eq!(message.kind(), MessageKind::Text);
    assert_eq!(message.created_at, 1_700_000_000_000);
    assert_eq!(message.delivery, DeliveryState::Confirmed);
}

#[test]
fn second_timestamps_are_normalized_to_millis() {
    let signal = single(&event(
        "message",
        json!({
            "message": {
                "id": "m1",
                "channelId": "c1",
                "userId": "peer",
                "type": "text",
                "text": "hello",
                "createdAt": 1_700_000_000i64,
            }
        }),
    ));
    let Signal::MessageArrived(message) = signal else {
        panic!("expected MessageArrived");
    };
    assert_eq!(message.created_at, 1_700_000_000_000);
}

#[test]
fn file_message_becomes_attachment() {
    let signal = single(&event(
        "message",
        json!({
            "message": {
                "id": "m2",
                "channelId": "c1",
                "userId": "peer",
                "type": "text",
                "text": "",
                "fileUrl": "https://cdn.example/f.pdf",
                "createdAt": 1_700_000_000_000i64,
                "data": {
                    "uiType": "file",
                    "fileName": "f.pdf",
                    "fileMime": "application/pdf",
                    "fileSize": "1024",
                }
            }
        }),
    ));
    let Signal::MessageArrived(message) = signal else {
        panic!("expected MessageArrived");
    };
    let MessagePayload::Attachment { file } = &message.payload else {
        panic!("expected attachment payload");
    };
    assert_eq!(file.url, "https://cdn.example/f.pdf");
    assert_eq!(file.size_bytes, Some(1024));
}

#[test]
fn image_group_parses_nested_payload() {
    let signal = single(&event(
        "message",
        json!({
            "message": {
                "id": "m3",
                "channelId": "c1",
                "userId": "me",
                "type": "custom",
                "createdAt": 1_700_000_000_000i64,
                "data": {
                    "kind": "imageGroup",
                    "payload": r#"{"items":[{"url":"u1","thumb":"t1"},{"url":"u2"}]}"#,
                }
            }
        }),
    ));
    let Signal::MessageArrived(message) = signal else {
        panic!("expected MessageArrived");
    };
    let MessagePayload::ImageGroup { items } = &message.payload else {
        panic!("expected image group payload");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].thumbnail.as_deref(), Some("t1"));
}

#[test]
fn malformed_image_group_payload_degrades_to_empty() {
    let signal = single(&event(
        "message",
        json!({
            "message": {
                "id": "m4",
                "channelId": "c1",
                "userId": "me",
                "type": "custom",
                "createdAt": 1_700_000_000_000i64,
                "data": { "kind": "imageGroup", "payload": "{broken" }
            }
        }),
    ));
    let Signal::MessageArrived(message) = signal else {
        panic!("expected MessageArrived");
    };
    assert_eq!(
        message.payload,
        MessagePayload::ImageGroup { items: vec![] }
    );
}

#[test]
fn listing_card_and_back_reference_are_system_cards() {
    let custom = single(&event(
        "message",
        json!({
            "message": {
                "id": "m5",
                "channelId": "c1",
                "userId": "me",
                "type": "custom",
                "createdAt": 1_700_000_000_000i64,
                "data": { "kind": "listingCard", "listingId": "42", "brandName": "Acme" }
            }
        }),
    ));
    let back = single(&event(
        "message",
        json!({
            "message": {
                "id": "m6",
                "channelId": "c1",
                "userId": "peer",
                "type": "text",
                "text": "listing",
                "createdAt": 1_700_000_000_000i64,
                "data": { "messageType": "listingInfo", "listingId": 42 }
            }
        }),
    ));
    for signal in [custom, back] {
        let Signal::MessageArrived(message) = signal else {
            panic!("expected MessageArrived");
        };
        assert_eq!(message.kind(), MessageKind::SystemCard);
        let MessagePayload::SystemCard { listing } = &message.payload else {
            unreachable!();
        };
        assert_eq!(listing.listing_id, 42);
    }
}

#[test]
fn channel_changed_carries_frozen_and_members() {
    let signal = single(&event(
        "channel_changed",
        json!({
            "channel": {
                "id": "c1",
                "isFrozen": true,
                "members": [
                    { "id": "me" },
                    { "id": "peer", "lastReadAt": 1_700_000_000i64, "profileImageUrl": "p.png" },
                ],
            }
        }),
    ));
    let Signal::ChannelChanged {
        channel_id,
        frozen,
        members,
    } = signal
    else {
        panic!("expected ChannelChanged");
    };
    assert_eq!(channel_id, ChannelId::new("c1"));
    assert!(frozen);
    assert_eq!(members.len(), 2);
    assert_eq!(members[1].last_read_at, Some(1_700_000_000_000));
    assert_eq!(members[1].avatar_url.as_deref(), Some("p.png"));
}

#[test]
fn member_left_accepts_numeric_ids() {
    let signal = single(&event(
        "member_left",
        json!({ "channelId": "c1", "userId": 123 }),
    ));
    let Signal::MemberLeft { user_id, .. } = signal else {
        panic!("expected MemberLeft");
    };
    assert_eq!(user_id, UserId::new("123"));
}

#[test]
fn message_read_maps_to_read_advanced() {
    let signal = single(&event(
        "message_read",
        json!({ "channelId": "c1", "userId": "me" }),
    ));
    let Signal::ReadAdvanced {
        channel_id,
        user_id,
        last_read_at,
    } = signal
    else {
        panic!("expected ReadAdvanced");
    };
    assert_eq!(channel_id, ChannelId::new("c1"));
    assert_eq!(user_id, UserId::new("me"));
    assert_eq!(last_read_at, None);
}

#[test]
fn complete_channel_added_yields_an_entry() {
    let signal = single(&event(
        "channel_added",
        json!({
            "channel": {
                "id": "c9",
                "originMembers": [
                    { "userId": 7, "nickname": "p7", "withdrawn": false },
                ],
                "unreadCount": 2,
                "updatedAt": 1_700_000_000_000i64,
            }
        }),
    ));
    let Signal::ChannelAdded { entry: Some(entry) } = signal else {
        panic!("expected complete ChannelAdded");
    };
    assert_eq!(entry.channel_id, ChannelId::new("c9"));
    assert_eq!(entry.origin_members[0].user_id, UserId::new("7"));
    assert_eq!(entry.unread_count, 2);
}

#[test]
fn incomplete_channel_added_has_no_entry() {
    let signal = single(&event(
        "channel_added",
        json!({ "channel": { "id": "c9", "originMembers": [] } }),
    ));
    assert!(matches!(signal, Signal::ChannelAdded { entry: None }));

    let signal = single(&event("channel_added", json!({})));
    assert!(matches!(signal, Signal::ChannelAdded { entry: None }));
}

#[test]
fn unrecognized_or_malformed_events_are_dropped() {
    assert!(normalize(&event("typing_indicator", json!({}))).is_empty());
    assert!(normalize(&event("message", json!({}))).is_empty());
    assert!(normalize(&event(
        "message",
        json!({ "message": { "channelId": "c1" } })
    ))
    .is_empty());
    assert!(normalize(&event("member_left", json!({ "channelId": "c1" }))).is_empty());
}

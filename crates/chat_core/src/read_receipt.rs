use std::time::Duration;

use shared::domain::{MessageId, MessageKind, UserId};
use shared::protocol::Message;

pub(crate) const READ_PROBE_ATTEMPTS: u32 = 10;
pub(crate) const READ_PROBE_INTERVAL: Duration = Duration::from_millis(1200);

/// Kinds that count as a delivery/read signal. Listing reference cards are
/// rendered inline but carry no read semantics.
pub fn is_read_eligible(kind: MessageKind) -> bool {
    !matches!(kind, MessageKind::SystemCard)
}

/// The single message shown with a read marker: the newest of my
/// read-eligible messages with `created_at <= cutoff`. `timeline` is ordered
/// newest-first.
pub fn last_read_my_message(
    timeline: &[Message],
    cutoff: Option<i64>,
    me: &UserId,
) -> Option<MessageId> {
    let cutoff = cutoff?;
    timeline
        .iter()
        .find(|m| m.author_id == *me && is_read_eligible(m.kind()) && m.created_at <= cutoff)
        .map(|m| m.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{ChannelId, DeliveryState};
    use shared::protocol::{ListingCard, MessagePayload};

    fn my_text(id: &str, created_at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            channel_id: ChannelId::new("c1"),
            author_id: UserId::new("me"),
            created_at,
            payload: MessagePayload::Text {
                body: "hi".into(),
            },
            delivery: DeliveryState::Confirmed,
        }
    }

    fn my_card(id: &str, created_at: i64) -> Message {
        Message {
            payload: MessagePayload::SystemCard {
                listing: ListingCard {
                    listing_id: 42,
                    brand_name: None,
                    model_name: None,
                    price: None,
                    thumbnail: None,
                },
            },
            ..my_text(id, created_at)
        }
    }

    #[test]
    fn newest_message_under_cutoff_wins() {
        let me = UserId::new("me");
        // Newest first: m2 is beyond the cutoff, m1 is under it.
        let timeline = vec![my_text("m2", 5200), my_text("m1", 4000)];
        assert_eq!(
            last_read_my_message(&timeline, Some(5000), &me),
            Some(MessageId::new("m1"))
        );
    }

    #[test]
    fn listing_cards_are_skipped() {
        let me = UserId::new("me");
        let timeline = vec![my_card("card", 4500), my_text("m1", 4000)];
        assert_eq!(
            last_read_my_message(&timeline, Some(5000), &me),
            Some(MessageId::new("m1"))
        );
    }

    #[test]
    fn peer_messages_are_skipped() {
        let me = UserId::new("me");
        let mut peer_msg = my_text("p1", 4800);
        peer_msg.author_id = UserId::new("peer");
        let timeline = vec![peer_msg, my_text("m1", 4000)];
        assert_eq!(
            last_read_my_message(&timeline, Some(5000), &me),
            Some(MessageId::new("m1"))
        );
    }

    #[test]
    fn no_cutoff_means_nothing_read() {
        let me = UserId::new("me");
        let timeline = vec![my_text("m1", 4000)];
        assert_eq!(last_read_my_message(&timeline, None, &me), None);
    }

    #[test]
    fn marker_never_regresses_as_cutoff_advances() {
        let me = UserId::new("me");
        let timeline = vec![my_text("m2", 5200), my_text("m1", 4000)];
        let mut marker_index = None;
        for cutoff in [3000, 4000, 5000, 5200, 9000] {
            let marker = last_read_my_message(&timeline, Some(cutoff), &me);
            let index = marker.map(|id| timeline.iter().position(|m| m.id == id).unwrap());
            if let (Some(prev), Some(cur)) = (marker_index, index) {
                // Newest-first: a smaller index is a newer message.
                assert!(cur <= prev);
            }
            marker_index = index.or(marker_index);
        }
        assert_eq!(marker_index, Some(0));
    }
}

use super::*;
use shared::protocol::ListingCard;

fn state() -> RoomState {
    RoomState::new(
        ChannelId::new("c1"),
        UserId::new("me"),
        UserId::new("peer"),
        false,
    )
}

fn message(id: &str, author: &str, created_at: i64) -> Message {
    Message {
        id: MessageId::new(id),
        channel_id: ChannelId::new("c1"),
        author_id: UserId::new(author),
        created_at,
        payload: MessagePayload::Text {
            body: format!("text-{id}"),
        },
        delivery: DeliveryState::Confirmed,
    }
}

fn arrived(id: &str, author: &str, created_at: i64) -> Signal {
    Signal::MessageArrived(message(id, author, created_at))
}

#[test]
fn duplicate_delivery_inserts_once() {
    let mut state = state();
    let first = state.apply(&arrived("m1", "peer", 1000), None);
    let second = state.apply(&arrived("m1", "peer", 1000), None);

    assert!(first.timeline_changed);
    assert!(!second.timeline_changed);
    assert_eq!(state.timeline.len(), 1);
    // Both deliveries still ask for the read pointer to advance.
    assert!(first.mark_read && second.mark_read);
}

#[test]
fn arrivals_prepend_in_delivery_order() {
    let mut state = state();
    state.apply(&arrived("m1", "peer", 1000), None);
    state.apply(&arrived("m2", "me", 1001), None);

    let ids: Vec<&str> = state.timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m2", "m1"]);
}

#[test]
fn blocked_arrival_marks_read_without_inserting() {
    let mut state = state();
    let out = state.apply(&arrived("m1", "peer", 9_500), Some(9_000));

    assert!(out.mark_read);
    assert!(!out.timeline_changed);
    assert!(state.timeline.is_empty());

    // Before the cutoff the same peer is visible.
    let out = state.apply(&arrived("m0", "peer", 8_000), Some(9_000));
    assert!(out.timeline_changed);
    assert_eq!(state.timeline.len(), 1);
}

#[test]
fn my_own_messages_ignore_the_block_cutoff() {
    let mut state = state();
    let out = state.apply(&arrived("m1", "me", 9_500), Some(9_000));
    assert!(out.timeline_changed);
}

#[test]
fn scrolled_away_arrival_raises_the_new_message_flag() {
    let mut state = state();
    state.at_bottom = false;
    let out = state.apply(&arrived("m1", "peer", 1000), None);
    assert!(out.new_message_while_away);

    state.at_bottom = true;
    let out = state.apply(&arrived("m2", "peer", 1001), None);
    assert!(!out.new_message_while_away);
}

#[test]
fn other_channels_are_ignored() {
    let mut state = state();
    let mut foreign = message("m1", "peer", 1000);
    foreign.channel_id = ChannelId::new("other");
    let out = state.apply(&Signal::MessageArrived(foreign), None);

    assert_eq!(out, ApplyOutcome::default());
    assert!(state.timeline.is_empty());
}

#[test]
fn deletion_removes_the_entry() {
    let mut state = state();
    state.apply(&arrived("m1", "peer", 1000), None);
    let out = state.apply(
        &Signal::MessageDeleted {
            channel_id: ChannelId::new("c1"),
            message_id: MessageId::new("m1"),
        },
        None,
    );
    assert!(out.timeline_changed);
    assert!(state.timeline.is_empty());

    let out = state.apply(
        &Signal::MessageDeleted {
            channel_id: ChannelId::new("c1"),
            message_id: MessageId::new("m1"),
        },
        None,
    );
    assert!(!out.timeline_changed);
}

#[test]
fn frozen_flips_only_on_transitions() {
    let mut state = state();
    let changed = Signal::ChannelChanged {
        channel_id: ChannelId::new("c1"),
        frozen: true,
        members: vec![],
    };
    assert_eq!(state.apply(&changed, None).frozen_changed, Some(true));
    assert_eq!(state.apply(&changed, None).frozen_changed, None);
    assert!(state.frozen);
}

#[test]
fn peer_read_pointer_is_monotonic() {
    let mut state = state();
    let advance = |state: &mut RoomState, at: i64| {
        state.apply(
            &Signal::ReadAdvanced {
                channel_id: ChannelId::new("c1"),
                user_id: UserId::new("peer"),
                last_read_at: Some(at),
            },
            None,
        )
    };

    assert!(advance(&mut state, 5_000).read_advanced);
    assert!(!advance(&mut state, 4_000).read_advanced);
    assert_eq!(state.snapshot.peer_last_read_at, Some(5_000));
    assert!(advance(&mut state, 6_000).read_advanced);
}

#[test]
fn my_read_pointer_is_not_the_peers() {
    let mut state = state();
    let out = state.apply(
        &Signal::ReadAdvanced {
            channel_id: ChannelId::new("c1"),
            user_id: UserId::new("me"),
            last_read_at: Some(5_000),
        },
        None,
    );
    assert!(!out.read_advanced);
    assert_eq!(state.snapshot.peer_last_read_at, None);
}

#[test]
fn resolve_replaces_the_local_entry_in_place() {
    let mut state = state();
    state.apply(&arrived("m0", "peer", 900), None);

    let local = Message {
        id: MessageId::local(),
        delivery: DeliveryState::Pending,
        ..message("ignored", "me", 1000)
    };
    let local_id = local.id.clone();
    state.insert_local(local);
    assert!(local_id.is_local());

    let mut confirmed = message("m1", "me", 1010);
    confirmed.delivery = DeliveryState::Confirmed;
    state.resolve_local(&local_id, confirmed);

    let ids: Vec<&str> = state.timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m0"]);
    assert_eq!(state.timeline[0].delivery, DeliveryState::Confirmed);
    assert!(state.ledger.contains(&MessageId::new("m1")));
}

#[test]
fn realtime_echo_winning_the_race_drops_the_local_entry() {
    let mut state = state();
    let local = Message {
        id: MessageId::local(),
        delivery: DeliveryState::Pending,
        ..message("ignored", "me", 1000)
    };
    let local_id = local.id.clone();
    state.insert_local(local);

    // The broadcast of the confirmed message lands first.
    state.apply(&arrived("m1", "me", 1010), None);
    assert_eq!(state.timeline.len(), 2);

    state.resolve_local(&local_id, message("m1", "me", 1010));
    assert_eq!(state.timeline.len(), 1);
    assert_eq!(state.timeline[0].id, MessageId::new("m1"));
}

#[test]
fn seed_initial_filters_and_registers_ids() {
    let mut state = state();
    state.seed_initial(
        vec![
            message("m3", "peer", 9_500),
            message("m2", "me", 9_200),
            message("m1", "peer", 8_000),
        ],
        Some(9_000),
        true,
    );

    let ids: Vec<&str> = state.timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m2", "m1"]);
    assert!(state.has_next);

    // Ids from the seed are deduplicated against later live delivery.
    let out = state.apply(&arrived("m1", "peer", 8_000), Some(9_000));
    assert!(!out.timeline_changed);
}

#[test]
fn append_older_deduplicates_against_the_ledger() {
    let mut state = state();
    state.seed_initial(vec![message("m2", "me", 9_200)], None, true);
    state.append_older(
        vec![message("m2", "me", 9_200), message("m1", "peer", 8_000)],
        None,
        false,
    );

    let ids: Vec<&str> = state.timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m2", "m1"]);
    assert!(!state.has_next);
}

#[test]
fn cancel_semantics_remove_only_known_entries() {
    let mut state = state();
    state.apply(&arrived("m1", "peer", 1000), None);
    assert!(state.remove(&MessageId::new("m1")));
    assert!(!state.remove(&MessageId::new("m1")));
}

#[test]
fn newest_listing_id_reads_the_top_card() {
    let mut state = state();
    assert_eq!(state.newest_listing_id(), None);

    let card = Message {
        payload: MessagePayload::SystemCard {
            listing: ListingCard {
                listing_id: 42,
                brand_name: None,
                model_name: None,
                price: None,
                thumbnail: None,
            },
        },
        ..message("card", "me", 1000)
    };
    state.apply(&Signal::MessageArrived(card), None);
    assert_eq!(state.newest_listing_id(), Some(42));

    state.apply(&arrived("m2", "peer", 1001), None);
    assert_eq!(state.newest_listing_id(), None);
}

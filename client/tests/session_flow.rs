//! End-to-end session scenarios over the in-memory relay.
//!
//! Two devices share a pad, open sessions against the same mock relay and
//! exchange messages. These tests drive the same headless API presenters
//! use; the literal offsets follow a 4096-byte pad with the 128-byte
//! padding bucket (first text message costs 144 pad bytes).

mod support;

use std::sync::atomic::Ordering;

use ash_client::error::Error;
use ash_client::session::{Session, SessionEvent, SessionState};
use ash_client::state::{DeliveryStatus, Direction};
use ash_client::store::{ConversationStore, PadStore};
use ash_core::message::MessageContent;

use support::{install_pair, wait_for_event, wait_until, MockRelay};

fn known_pad(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i * 31 % 251) as u8).collect()
}

fn is_received_text(event: &SessionEvent, expected: &str) -> bool {
    matches!(
        event,
        SessionEvent::MessageAppended(m)
            if m.direction == Direction::Received
                && matches!(&m.content, Some(MessageContent::Text(t)) if t == expected)
    )
}

#[tokio::test]
async fn send_and_receive_both_directions() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut alice_events = alice_session.subscribe();
    let mut bob_events = bob_session.subscribe();

    // Initiator sends from the front: first message sits at sequence 0.
    alice_session.send_text("hello").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "hello")).await;

    let (_, alice_messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(alice_messages.len(), 1);
    assert_eq!(alice_messages[0].sequence, 0);
    assert_eq!(alice_messages[0].ciphertext_len, 144);

    let (_, bob_messages) = bob_session.snapshot().await.unwrap();
    assert_eq!(bob_messages.len(), 1);
    assert_eq!(bob_messages[0].sequence, 0);
    assert_eq!(bob_messages[0].direction, Direction::Received);

    // Responder sends from the back: sequence counts down from N.
    bob_session.send_text("world!").await.unwrap();
    wait_for_event(&mut alice_events, |e| is_received_text(e, "world!")).await;

    let (_, bob_messages) = bob_session.snapshot().await.unwrap();
    let sent_back = bob_messages
        .iter()
        .find(|m| m.direction == Direction::Sent)
        .unwrap();
    assert_eq!(sent_back.sequence, 4096 - 144);

    // The receiver acked, so the sender sees a delivery confirmation.
    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            SessionEvent::DeliveryUpdated {
                status: DeliveryStatus::Delivered,
                ..
            }
        )
    })
    .await;
    assert!(!relay.acked().is_empty());

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn own_echoes_are_filtered() {
    // The mock relay echoes every submission back to its submitter.
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();

    alice_session.send_text("only once").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "only once")).await;

    // Alice must have exactly one message: her own send, no echo copy.
    let (_, alice_messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(alice_messages.len(), 1);
    assert_eq!(alice_messages[0].direction, Direction::Sent);

    // Replaying the blob at Alice once more changes nothing either: the
    // sequence sits inside her own send region.
    let blob = relay.blobs_for(&id).pop().unwrap();
    relay.inject(&id, ash_client::relay::RelayEvent::MessageReceived(blob));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (_, alice_messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(alice_messages.len(), 1);

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn duplicate_incoming_is_decrypted_once() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut alice_events = alice_session.subscribe();

    bob_session.send_text("twice?").await.unwrap();
    wait_for_event(&mut alice_events, |e| is_received_text(e, "twice?")).await;

    // Deliver the same blob again.
    let blob = relay.blobs_for(&id).pop().unwrap();
    relay.inject(&id, ash_client::relay::RelayEvent::MessageReceived(blob));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (_, alice_messages) = alice_session.snapshot().await.unwrap();
    let received: Vec<_> = alice_messages
        .iter()
        .filter(|m| m.direction == Direction::Received)
        .collect();
    assert_eq!(received.len(), 1, "duplicate must not decrypt twice");

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn pad_exhaustion_is_a_clean_failure() {
    // 200-byte pad: one 144-byte message fits, the second cannot.
    let relay = MockRelay::new();
    let (alice, _bob, id) = install_pair(relay.clone(), known_pad(200), 300).await;

    let session = Session::open(alice.deps.clone(), &id).await.unwrap();

    session.send_text("fits").await.unwrap();
    let result = session.send_text("hi").await;
    assert!(matches!(
        result,
        Err(Error::Core(ash_core::Error::PadExhausted { .. }))
    ));

    // The failed attempt consumed nothing.
    let (_, messages) = session.snapshot().await.unwrap();
    assert_eq!(messages.len(), 1);
    session.shutdown().await;

    let pad = PadStore::new(alice.vault.clone()).load(&id).await.unwrap();
    assert_eq!(pad.consumed_front(), 144);
}

#[tokio::test]
async fn failed_submit_keeps_pad_spent_and_retry_reuses_sequence() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();

    relay.fail_submits.store(true, Ordering::Release);
    let failed_id = alice_session.send_text("stuck").await.unwrap();

    let (_, messages) = alice_session.snapshot().await.unwrap();
    assert!(matches!(
        messages[0].delivery_status,
        DeliveryStatus::Failed(_)
    ));
    assert_eq!(messages[0].sequence, 0);

    // A follow-up send consumes the NEXT slice: failure released nothing.
    relay.fail_submits.store(false, Ordering::Release);
    alice_session.send_text("after").await.unwrap();
    let (_, messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(messages[1].sequence, 144);

    // Retry re-submits the original ciphertext at sequence 0.
    alice_session.retry(failed_id).await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "stuck")).await;

    let (_, messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(messages[0].delivery_status, DeliveryStatus::Sent);
    assert_eq!(messages[0].sequence, 0);

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn peer_burn_wipes_and_finalizes() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut alice_events = alice_session.subscribe();

    bob_session.burn().await.unwrap();
    assert!(relay.is_burned(&id));

    wait_for_event(&mut alice_events, |e| matches!(e, SessionEvent::PeerBurned)).await;

    // Alice: pad gone, conversation kept as a tombstone, sends refused.
    let result = alice_session.send_text("too late").await;
    assert!(matches!(result, Err(Error::InvalidState(_))));

    let pad_store = PadStore::new(alice.vault.clone());
    assert!(matches!(pad_store.load(&id).await, Err(Error::PadNotFound)));
    let tombstone = ConversationStore::new(alice.vault.clone())
        .load(&id)
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.peer_burned_at.is_some());

    // Bob: everything deleted outright.
    assert!(ConversationStore::new(bob.vault.clone())
        .load(&id)
        .await
        .unwrap()
        .is_none());
    assert!(matches!(
        PadStore::new(bob.vault.clone()).load(&id).await,
        Err(Error::PadNotFound)
    ));

    alice_session.shutdown().await;
}

#[tokio::test]
async fn expired_messages_are_wiped() {
    // Zero retention: blobs expire the moment they are stored.
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 0).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();

    alice_session.send_text("fleeting").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "fleeting")).await;

    // The sweep clears content on both ends and zeroes the pad range.
    wait_until(|| async {
        let (_, messages) = alice_session.snapshot().await.unwrap();
        messages[0].content_wiped && messages[0].content.is_none()
    })
    .await;
    wait_until(|| async {
        let (_, messages) = bob_session.snapshot().await.unwrap();
        messages[0].content_wiped
    })
    .await;

    let (_, messages) = alice_session.snapshot().await.unwrap();
    assert_eq!(messages[0].delivery_status, DeliveryStatus::Expired);

    // Forward secrecy: Bob's stored pad bytes for that range are zeroed.
    bob_session.shutdown().await;
    let pad = PadStore::new(bob.vault.clone()).load(&id).await.unwrap();
    assert!(pad.as_bytes()[..144].iter().all(|&b| b == 0));

    alice_session.shutdown().await;
}

#[tokio::test]
async fn relay_amnesia_triggers_one_reregistration() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    // Bob connects normally first.
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();
    wait_until(|| async { relay.subscriber_count() == 1 }).await;

    // Alice's first subscribe attempt 404s; her session must re-register
    // and come back on its own.
    relay.subscribe_not_found.store(1, Ordering::Release);
    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let mut alice_events = alice_session.subscribe();
    wait_until(|| async { relay.subscriber_count() == 2 }).await;

    // Both directions work after the recovery.
    alice_session.send_text("recovered").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "recovered")).await;

    bob_session.send_text("ack that").await.unwrap();
    wait_for_event(&mut alice_events, |e| is_received_text(e, "ack that")).await;

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn pad_low_warning_fires() {
    // 1024-byte pad with a 512-byte threshold: two sends cross it.
    let relay = MockRelay::new();
    let (alice, _bob, id) = install_pair(relay.clone(), known_pad(1024), 300).await;

    let session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let mut events = session.subscribe();

    // Four 144-byte sends leave 448 bytes, crossing the 512 threshold.
    for body in ["one", "two", "three", "four"] {
        session.send_text(body).await.unwrap();
    }

    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::PadLow { remaining } if *remaining < 512)
    })
    .await;

    session.shutdown().await;
}

#[tokio::test]
async fn session_state_survives_restart() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();

    alice_session.send_text("before restart").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "before restart")).await;
    alice_session.shutdown().await;

    // Counters resumed from the vault: the next send uses the next slice.
    let reopened = Session::open(alice.deps.clone(), &id).await.unwrap();
    reopened.send_text("after restart").await.unwrap();
    wait_for_event(&mut bob_events, |e| is_received_text(e, "after restart")).await;

    let (_, messages) = reopened.snapshot().await.unwrap();
    assert_eq!(messages.last().unwrap().sequence, 144);

    reopened.shutdown().await;
    bob_session.shutdown().await;
}

#[tokio::test]
async fn location_messages_roundtrip() {
    let relay = MockRelay::new();
    let (alice, bob, id) = install_pair(relay.clone(), known_pad(4096), 300).await;

    let alice_session = Session::open(alice.deps.clone(), &id).await.unwrap();
    let bob_session = Session::open(bob.deps.clone(), &id).await.unwrap();
    let mut bob_events = bob_session.subscribe();

    alice_session.send_location(50.0755, 14.4378).await.unwrap();

    let event = wait_for_event(&mut bob_events, |e| {
        matches!(
            e,
            SessionEvent::MessageAppended(m)
                if m.direction == Direction::Received
                    && matches!(m.content, Some(MessageContent::Location { .. }))
        )
    })
    .await;
    if let SessionEvent::MessageAppended(message) = event {
        match message.content {
            Some(MessageContent::Location {
                latitude,
                longitude,
            }) => {
                assert!((latitude - 50.0755).abs() < f64::EPSILON);
                assert!((longitude - 14.4378).abs() < f64::EPSILON);
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    alice_session.shutdown().await;
    bob_session.shutdown().await;
}

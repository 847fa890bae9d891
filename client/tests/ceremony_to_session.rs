//! The complete path a pair of devices walks: gesture entropy, QR
//! ceremony, mnemonic confirmation, session, messages, burn.

mod support;

use std::sync::Arc;
use std::time::Duration;

use ash_client::ceremony::{PendingSession, ScanSession};
use ash_client::config::ClientConfig;
use ash_client::error::Error;
use ash_client::ports::MemoryVault;
use ash_client::session::{Dependencies, Session, SessionEvent};
use ash_client::state::Direction;
use ash_core::entropy::{GesturePool, MIN_SAMPLES};
use ash_core::metadata::{CeremonyMetadata, MetadataFlags};
use ash_core::message::MessageContent;
use ash_core::pad::Role;
use ash_core::CodingMethod;

use support::{test_config, wait_for_event, MockRelay};

fn gesture_pool() -> GesturePool {
    let mut pool = GesturePool::new();
    for i in 0..MIN_SAMPLES as u64 + 50 {
        pool.push_sample((i * 37) as u16, (i * 91) as u16, 1000 + i * 13);
    }
    pool
}

fn ceremony_metadata() -> CeremonyMetadata {
    CeremonyMetadata::new(
        300,
        0,
        MetadataFlags::default().with_color_index(5),
        "https://mock.relay".to_string(),
    )
    .unwrap()
}

fn deps(relay: Arc<MockRelay>, vault: Arc<MemoryVault>, config: ClientConfig) -> Dependencies {
    Dependencies {
        vault,
        relay,
        config,
    }
}

#[tokio::test]
async fn full_ceremony_then_messaging() {
    let relay = MockRelay::new();

    // === Initiator samples a pad and displays frames ===
    let initiator_pending =
        PendingSession::begin_initiator(&gesture_pool(), 16 * 1024, ceremony_metadata())
            .unwrap();
    let mut stream = initiator_pending
        .frame_stream(512, Some("spoken aloud"), CodingMethod::RaptorLt)
        .unwrap();

    // === Responder scans a lossy, duplicate-prone stream ===
    let mut scan = ScanSession::new(Some("spoken aloud"), Duration::from_secs(30));
    let mut i = 0u32;
    while !scan.is_complete() {
        let frame = stream.next_frame();
        if i % 4 != 1 {
            scan.absorb(&frame).unwrap();
        }
        if i % 3 == 0 {
            scan.absorb(&frame).unwrap();
        }
        i += 1;
    }
    let responder_pending = scan.finish().unwrap();

    // === Users compare mnemonics aloud ===
    assert_eq!(initiator_pending.mnemonic(), responder_pending.mnemonic());
    assert_eq!(responder_pending.role(), Role::Responder);
    let id = initiator_pending.conversation_id().to_string();

    // === Both confirm; records land in each device's vault ===
    let alice_vault = Arc::new(MemoryVault::new());
    let bob_vault = Arc::new(MemoryVault::new());
    initiator_pending
        .confirm_mnemonic(alice_vault.clone(), true)
        .await
        .unwrap();
    responder_pending
        .confirm_mnemonic(bob_vault.clone(), true)
        .await
        .unwrap();

    // === Sessions over the shared relay ===
    let alice = Session::open(deps(relay.clone(), alice_vault, test_config()), &id)
        .await
        .unwrap();
    let bob = Session::open(deps(relay.clone(), bob_vault, test_config()), &id)
        .await
        .unwrap();
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    alice.send_text("ceremony worked").await.unwrap();
    wait_for_event(&mut bob_events, |e| {
        matches!(
            e,
            SessionEvent::MessageAppended(m)
                if m.direction == Direction::Received
                    && matches!(&m.content, Some(MessageContent::Text(t)) if t == "ceremony worked")
        )
    })
    .await;

    bob.send_location(48.2082, 16.3738).await.unwrap();
    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            SessionEvent::MessageAppended(m)
                if m.direction == Direction::Received
                    && matches!(m.content, Some(MessageContent::Location { .. }))
        )
    })
    .await;

    // === Alice burns; Bob's session dies with it ===
    alice.burn().await.unwrap();
    wait_for_event(&mut bob_events, |e| matches!(e, SessionEvent::PeerBurned)).await;
    assert!(matches!(
        bob.send_text("anyone there?").await,
        Err(Error::InvalidState(_))
    ));

    bob.shutdown().await;
}

#[tokio::test]
async fn rejected_mnemonic_installs_nothing() {
    let pending =
        PendingSession::begin_initiator(&gesture_pool(), 16 * 1024, ceremony_metadata())
            .unwrap();
    let vault = Arc::new(MemoryVault::new());

    let result = pending.confirm_mnemonic(vault.clone(), false).await;
    assert!(matches!(result, Err(Error::ChecksumMismatch)));
    assert!(vault.is_empty());
}

//! Shared test fixtures: an in-memory relay and session wiring helpers.
#![allow(dead_code)] // each integration test binary uses a subset

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use ash_client::config::ClientConfig;
use ash_client::error::{Error, Result};
use ash_client::ports::MemoryVault;
use ash_client::relay::api::{
    PollResponse, RegisterRequest, RelayEvent, RelayMessage, SubmitRequest, SubmitResponse,
};
use ash_client::relay::subscription::SubscriptionConfig;
use ash_client::relay::{AckRequest, BurnRequest, EventStream, RelayTransport};
use ash_client::session::{Dependencies, SessionEvent};
use ash_client::state::{Conversation, SequenceWindow};
use ash_client::store::{ConversationStore, CredentialStore, PadStore};
use ash_core::pad::{Pad, Role};
use ash_core::tokens::SessionTokens;

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct RelayInner {
    registered: HashSet<String>,
    blobs: Vec<(String, RelayMessage)>,
    burned: HashSet<String>,
    acked: Vec<Uuid>,
}

/// In-memory store-and-forward relay.
///
/// Every submission is broadcast to all subscribers of the conversation,
/// the submitter included, which exercises the own-echo filter the same
/// way the real relay does.
pub struct MockRelay {
    inner: Mutex<RelayInner>,
    events: broadcast::Sender<(String, RelayEvent)>,
    /// While positive, subscribe attempts fail with `NotFound` (and the
    /// counter decrements), simulating a relay that lost the conversation.
    pub subscribe_not_found: AtomicU32,
    /// Fail submissions with a network error while set.
    pub fail_submits: AtomicBool,
}

impl Default for MockRelay {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(RelayInner::default()),
            events,
            subscribe_not_found: AtomicU32::new(0),
            fail_submits: AtomicBool::new(false),
        }
    }
}

impl MockRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Push a raw event to every subscriber of `conversation_id`.
    pub fn inject(&self, conversation_id: &str, event: RelayEvent) {
        let _ = self.events.send((conversation_id.to_string(), event));
    }

    /// Blob ids acknowledged so far.
    pub fn acked(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().acked.clone()
    }

    /// All blobs submitted for a conversation.
    pub fn blobs_for(&self, conversation_id: &str) -> Vec<RelayMessage> {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .iter()
            .filter(|(conv, _)| conv == conversation_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn is_burned(&self, conversation_id: &str) -> bool {
        self.inner.lock().unwrap().burned.contains(conversation_id)
    }

    /// Live subscription streams across all conversations.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    async fn register(&self, _base_url: &str, request: &RegisterRequest) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.registered.insert(request.id.clone());
        Ok(())
    }

    async fn submit(
        &self,
        _base_url: &str,
        _auth_token: &str,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse> {
        if self.fail_submits.load(Ordering::Acquire) {
            return Err(Error::Network("mock relay is offline".into()));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.burned.contains(&request.conversation_id) {
            return Err(Error::ConversationBurned);
        }

        let message = RelayMessage {
            id: Uuid::new_v4(),
            sequence: Some(request.sequence),
            ciphertext_b64: request.ciphertext.clone(),
            received_at: Utc::now(),
        };
        let response = SubmitResponse {
            blob_id: message.id,
            expires_at: Utc::now() + ChronoDuration::seconds(i64::from(request.ttl_seconds)),
        };
        inner
            .blobs
            .push((request.conversation_id.clone(), message.clone()));
        drop(inner);

        let _ = self.events.send((
            request.conversation_id.clone(),
            RelayEvent::MessageReceived(message),
        ));
        Ok(response)
    }

    async fn poll(
        &self,
        _base_url: &str,
        _auth_token: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<PollResponse> {
        let inner = self.inner.lock().unwrap();
        if !inner.registered.contains(conversation_id) {
            return Err(Error::NotFound);
        }

        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let all: Vec<RelayMessage> = inner
            .blobs
            .iter()
            .filter(|(conv, _)| conv == conversation_id)
            .map(|(_, message)| message.clone())
            .collect();
        let messages = all.get(start..).unwrap_or_default().to_vec();

        Ok(PollResponse {
            messages,
            next_cursor: Some(all.len().to_string()),
            burned: inner.burned.contains(conversation_id),
        })
    }

    async fn ack(&self, _base_url: &str, _auth_token: &str, request: &AckRequest) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .acked
            .extend(request.blob_ids.iter().copied());
        let _ = self.events.send((
            request.conversation_id.clone(),
            RelayEvent::DeliveryConfirmed(request.blob_ids.clone()),
        ));
        Ok(())
    }

    async fn burn_status(
        &self,
        _base_url: &str,
        _auth_token: &str,
        conversation_id: &str,
    ) -> Result<bool> {
        Ok(self.inner.lock().unwrap().burned.contains(conversation_id))
    }

    async fn burn(&self, _base_url: &str, request: &BurnRequest) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .burned
            .insert(request.conversation_id.clone());
        let _ = self
            .events
            .send((request.conversation_id.clone(), RelayEvent::BurnSignal));
        Ok(())
    }

    async fn subscribe(
        &self,
        _base_url: &str,
        _auth_token: &str,
        conversation_id: &str,
    ) -> Result<EventStream> {
        let pending = self.subscribe_not_found.load(Ordering::Acquire);
        if pending > 0 {
            self.subscribe_not_found.store(pending - 1, Ordering::Release);
            return Err(Error::NotFound);
        }
        if !self.inner.lock().unwrap().registered.contains(conversation_id) {
            return Err(Error::NotFound);
        }

        let conversation_id = conversation_id.to_string();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let conversation_id = conversation_id.clone();
            async move {
                match item {
                    Ok((conv, event)) if conv == conversation_id => Some(event),
                    _ => None,
                }
            }
        });
        Ok(futures::stream::iter([RelayEvent::Connected])
            .chain(stream)
            .boxed())
    }
}

/// Fast timers for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        default_relay_url: "https://mock.relay".into(),
        unary_timeout: Duration::from_secs(2),
        subscription: SubscriptionConfig {
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(100),
            max_attempts: 5,
            poll_interval: Duration::from_millis(50),
        },
        expiry_sweep_interval: Duration::from_millis(100),
        pad_low_threshold: 512,
    }
}

/// One device with its own vault, sharing the mock relay.
pub struct Device {
    pub deps: Dependencies,
    pub vault: Arc<MemoryVault>,
}

/// Install the same pad on two devices, initiator and responder.
///
/// Returns the two devices and the conversation id.
pub async fn install_pair(
    relay: Arc<MockRelay>,
    pad_bytes: Vec<u8>,
    retention_seconds: u32,
) -> (Device, Device, String) {
    let tokens = SessionTokens::derive(&pad_bytes);
    let initiator = install_device(
        relay.clone(),
        &tokens,
        pad_bytes.clone(),
        Role::Initiator,
        retention_seconds,
    )
    .await;
    let responder = install_device(
        relay,
        &tokens,
        pad_bytes,
        Role::Responder,
        retention_seconds,
    )
    .await;
    (initiator, responder, tokens.conversation_id)
}

async fn install_device(
    relay: Arc<MockRelay>,
    tokens: &SessionTokens,
    pad_bytes: Vec<u8>,
    role: Role,
    retention_seconds: u32,
) -> Device {
    let vault = Arc::new(MemoryVault::new());
    let pad_total_size = pad_bytes.len() as u64;

    PadStore::new(vault.clone())
        .save(&tokens.conversation_id, &Pad::new(pad_bytes))
        .await
        .unwrap();
    CredentialStore::new(vault.clone())
        .save(&tokens.conversation_id, &tokens.auth_token, &tokens.burn_token)
        .await
        .unwrap();

    let conversation = Conversation {
        id: tokens.conversation_id.clone(),
        role,
        pad_total_size,
        auth_token: tokens.auth_token.clone(),
        burn_token: tokens.burn_token.clone(),
        relay_url: "https://mock.relay".into(),
        message_retention_seconds: retention_seconds,
        disappearing_timer_seconds: 0,
        color: 0,
        flags: 0x000B,
        consumed_front: 0,
        consumed_back: 0,
        processed_incoming: SequenceWindow::new(),
        relay_cursor: None,
        peer_burned_at: None,
        last_message_at: None,
        last_message_preview: None,
    };
    ConversationStore::new(vault.clone())
        .save(&conversation)
        .await
        .unwrap();

    Device {
        deps: Dependencies {
            vault: vault.clone(),
            relay,
            config: test_config(),
        },
        vault,
    }
}

/// Wait until an event matching `predicate` arrives, with a timeout.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Poll an async condition until it holds, with a timeout.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

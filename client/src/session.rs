//! Session orchestrator.
//!
//! One actor task per open conversation glues the pad manager, the durable
//! state and the relay client together. Commands arrive on an mpsc
//! channel, observable changes leave on a broadcast channel, and all
//! sends and receives are serialized through the single event loop, which
//! is what keeps the pad counters and the duplicate window race-free.
//!
//! ```text
//! [Loading] -> [Registering] -> [Live] --peer/local burn--> [Burned]
//! ```
//!
//! Presenters subscribe to [`SessionEvent`]s and stay stateless; tests
//! drive the same [`SessionHandle`] API directly.

use std::collections::HashSet;
use std::sync::Arc;

use ash_core::message::{self, MessageContent};
use ash_core::tokens;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pad_manager::PadManager;
use crate::ports::SecureVault;
use crate::relay::api::{RelayEvent, RelayMessage};
use crate::relay::subscription::{self, CursorCell};
use crate::relay::{RelayClient, RelayTransport};
use crate::state::{Conversation, DeliveryStatus, Direction, Message};
use crate::store::{ConversationStore, CredentialStore};

/// Everything a session needs from the host, bundled explicitly.
#[derive(Clone)]
pub struct Dependencies {
    /// Encrypted key-value store.
    pub vault: Arc<dyn SecureVault>,
    /// Relay HTTP transport.
    pub relay: Arc<dyn RelayTransport>,
    /// Tuning.
    pub config: ClientConfig,
}

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading the conversation and pad from the vault.
    Loading,
    /// Registering with the relay.
    Registering,
    /// Connected; messages flow.
    Live,
    /// Terminal: the pad is gone.
    Burned,
}

/// Observable session changes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged(SessionState),
    /// A message was appended to the conversation (either direction).
    MessageAppended(Message),
    /// An outgoing message changed delivery status.
    DeliveryUpdated {
        /// Local message id.
        message_id: Uuid,
        /// The new status.
        status: DeliveryStatus,
    },
    /// The peer burned the conversation; the pad has been wiped.
    PeerBurned,
    /// Remaining pad dropped below the configured threshold.
    PadLow {
        /// Unconsumed pad bytes left.
        remaining: u64,
    },
    /// A non-fatal session problem worth surfacing.
    Error(String),
}

enum Command {
    SendText {
        body: String,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    SendLocation {
        latitude: f64,
        longitude: f64,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Retry {
        message_id: Uuid,
        reply: oneshot::Sender<Result<()>>,
    },
    Burn {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<(SessionState, Vec<Message>)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to an open session; cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    conversation_id: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// The conversation this session serves.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send a text message. Returns the local message id; delivery
    /// progress arrives as [`SessionEvent::DeliveryUpdated`].
    pub async fn send_text(&self, body: impl Into<String>) -> Result<Uuid> {
        self.command(|reply| Command::SendText {
            body: body.into(),
            reply,
        })
        .await?
    }

    /// Send a one-shot location.
    pub async fn send_location(&self, latitude: f64, longitude: f64) -> Result<Uuid> {
        self.command(|reply| Command::SendLocation {
            latitude,
            longitude,
            reply,
        })
        .await?
    }

    /// Re-submit a failed message using its already-consumed sequence.
    pub async fn retry(&self, message_id: Uuid) -> Result<()> {
        self.command(|reply| Command::Retry { message_id, reply })
            .await?
    }

    /// Burn the conversation locally and (best-effort) on the relay.
    pub async fn burn(&self) -> Result<()> {
        self.command(|reply| Command::Burn { reply }).await?
    }

    /// Current state and message list snapshot.
    pub async fn snapshot(&self) -> Result<(SessionState, Vec<Message>)> {
        self.command(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the session, persisting state. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.command(|reply| Command::Shutdown { reply }).await;
    }

    async fn command<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::InvalidState("session is closed"))?;
        rx.await.map_err(|_| Error::InvalidState("session is closed"))
    }
}

/// Opens sessions over previously installed conversations.
pub struct Session;

impl Session {
    /// Load, register and go live.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the conversation is unknown or a tombstone.
    /// - `PadNotFound` if the pad record is missing.
    /// - Relay errors if registration fails (retryable by calling again).
    pub async fn open(deps: Dependencies, conversation_id: &str) -> Result<SessionHandle> {
        let (events, _) = broadcast::channel(256);
        let _ = events.send(SessionEvent::StateChanged(SessionState::Loading));

        let conv_store = ConversationStore::new(deps.vault.clone());
        let mut conversation = conv_store
            .load(conversation_id)
            .await?
            .ok_or(Error::InvalidState("unknown conversation"))?;
        if conversation.is_tombstone() {
            return Err(Error::InvalidState("conversation was burned"));
        }

        let pad =
            PadManager::load(deps.vault.clone(), conversation_id, conversation.role).await?;

        // The persisted conversation record excludes the tokens; restore
        // them from the credential record, or for installs that predate it
        // re-derive from the pad (valid only while nothing was consumed).
        let credentials = CredentialStore::new(deps.vault.clone());
        let (auth_token, burn_token) = match credentials.load(conversation_id).await? {
            Some(pair) => pair,
            None => {
                let tokens = pad.session_tokens()?;
                credentials
                    .save(conversation_id, &tokens.auth_token, &tokens.burn_token)
                    .await?;
                (tokens.auth_token, tokens.burn_token)
            }
        };
        conversation.auth_token = auth_token;
        conversation.burn_token = burn_token;

        let relay = RelayClient::new(
            deps.relay.clone(),
            conversation.relay_url.clone(),
            conversation.id.clone(),
            conversation.auth_token.clone(),
        )
        .with_unary_timeout(deps.config.unary_timeout);

        let _ = events.send(SessionEvent::StateChanged(SessionState::Registering));
        relay
            .register(
                tokens::token_hash(&conversation.auth_token),
                tokens::token_hash(&conversation.burn_token),
            )
            .await?;

        let cursor: CursorCell = Arc::new(RwLock::new(conversation.relay_cursor.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (relay_rx, relay_task) = subscription::spawn(
            relay.clone(),
            cursor.clone(),
            deps.config.subscription.clone(),
            shutdown_rx,
        )?;

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let handle = SessionHandle {
            conversation_id: conversation.id.clone(),
            commands: commands_tx,
            events: events.clone(),
        };

        let actor = SessionActor {
            config: deps.config,
            conversation,
            conv_store,
            credentials,
            pad,
            relay,
            messages: Vec::new(),
            sent_sequences: HashSet::new(),
            sent_blob_ids: HashSet::new(),
            state: SessionState::Live,
            events,
            cursor,
            shutdown_tx,
            relay_rx: Some(relay_rx),
            relay_task: Some(relay_task),
            reregistered: false,
        };
        tokio::spawn(actor.run(commands_rx));

        Ok(handle)
    }
}

struct SessionActor {
    config: ClientConfig,
    conversation: Conversation,
    conv_store: ConversationStore,
    credentials: CredentialStore,
    pad: PadManager,
    relay: RelayClient,
    messages: Vec<Message>,
    /// Sequences we submitted this process lifetime, for echo filtering.
    sent_sequences: HashSet<u64>,
    /// Blob ids the relay assigned to our submissions.
    sent_blob_ids: HashSet<Uuid>,
    state: SessionState,
    events: broadcast::Sender<SessionEvent>,
    cursor: CursorCell,
    shutdown_tx: watch::Sender<bool>,
    relay_rx: Option<mpsc::Receiver<RelayEvent>>,
    relay_task: Option<JoinHandle<()>>,
    reregistered: bool,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.set_state(SessionState::Live);
        info!(conv_id_prefix = id_prefix(&self.conversation.id), "session live");

        // Reconcile whatever queued up while we were away.
        self.catch_up_poll().await;

        let mut sweep = tokio::time::interval(self.config.expiry_sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                event = recv_or_pending(&mut self.relay_rx) => {
                    match event {
                        Some(event) => self.handle_relay_event(event).await,
                        None => {
                            // The subscription task ended on its own.
                            self.relay_rx = None;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.expiry_sweep().await;
                }
            }
        }

        let _ = self.shutdown_tx.send(true);
        if self.state != SessionState::Burned {
            self.persist_conversation().await;
        }
        if let Some(task) = self.relay_task.take() {
            let _ = task.await;
        }
        debug!("session actor stopped");
    }

    /// Returns `true` when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SendText { body, reply } => {
                let result = self.send_content(MessageContent::Text(body)).await;
                let _ = reply.send(result);
            }
            Command::SendLocation {
                latitude,
                longitude,
                reply,
            } => {
                let result = self
                    .send_content(MessageContent::Location {
                        latitude,
                        longitude,
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Retry { message_id, reply } => {
                let _ = reply.send(self.retry_message(message_id).await);
            }
            Command::Burn { reply } => {
                let result = self.local_burn().await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send((self.state, self.messages.clone()));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    // === Sending ===

    async fn send_content(&mut self, content: MessageContent) -> Result<Uuid> {
        if self.state != SessionState::Live {
            return Err(Error::InvalidState("session is not live"));
        }

        let plaintext = message::encode_plaintext(&content)?;
        let needed = message::key_slice_len(plaintext.len());

        // Consuming commits durably; from here on the bytes are spent no
        // matter what the relay says.
        let slice = self.pad.consume_for_sending(needed).await?;
        let sequence = slice.offset();
        let ciphertext = message::seal(&plaintext, slice.bytes(), sequence)?;
        self.sent_sequences.insert(sequence);

        let mut entry = Message {
            id: Uuid::new_v4(),
            blob_id: None,
            sequence,
            direction: Direction::Sent,
            content: Some(content),
            delivery_status: DeliveryStatus::Sending,
            ciphertext_len: ciphertext.len(),
            pending_ciphertext: Some(ciphertext.clone()),
            created_at: Utc::now(),
            server_expires_at: None,
            content_wiped: false,
        };

        match self
            .relay
            .submit(
                &ciphertext,
                sequence,
                self.conversation.message_retention_seconds,
            )
            .await
        {
            Ok(response) => {
                self.sent_blob_ids.insert(response.blob_id);
                entry.blob_id = Some(response.blob_id);
                entry.server_expires_at = Some(response.expires_at);
                entry.delivery_status = DeliveryStatus::Sent;
                entry.pending_ciphertext = None;
            }
            Err(e) => {
                warn!(sequence, error = %e, "submit failed; pad bytes stay consumed");
                entry.delivery_status = DeliveryStatus::Failed(e.to_string());
            }
        }

        let message_id = entry.id;
        self.note_message_activity(&entry);
        self.messages.push(entry.clone());
        self.persist_conversation().await;
        self.emit(SessionEvent::MessageAppended(entry));
        self.check_pad_low();
        Ok(message_id)
    }

    async fn retry_message(&mut self, message_id: Uuid) -> Result<()> {
        if self.state != SessionState::Live {
            return Err(Error::InvalidState("session is not live"));
        }
        let position = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(Error::InvalidState("unknown message"))?;

        let (sequence, ciphertext) = {
            let entry = &self.messages[position];
            if !matches!(entry.delivery_status, DeliveryStatus::Failed(_)) {
                return Err(Error::InvalidState("message is not in a failed state"));
            }
            let ciphertext = entry
                .pending_ciphertext
                .clone()
                .ok_or(Error::InvalidState("ciphertext no longer available"))?;
            (entry.sequence, ciphertext)
        };

        // Same sequence: the pad bytes were consumed on the first attempt.
        let outcome = self
            .relay
            .submit(
                &ciphertext,
                sequence,
                self.conversation.message_retention_seconds,
            )
            .await;

        let entry = &mut self.messages[position];
        match outcome {
            Ok(response) => {
                self.sent_blob_ids.insert(response.blob_id);
                entry.blob_id = Some(response.blob_id);
                entry.server_expires_at = Some(response.expires_at);
                entry.delivery_status = DeliveryStatus::Sent;
                entry.pending_ciphertext = None;
                let status = entry.delivery_status.clone();
                self.emit(SessionEvent::DeliveryUpdated { message_id, status });
                Ok(())
            }
            Err(e) => {
                entry.delivery_status = DeliveryStatus::Failed(e.to_string());
                let status = entry.delivery_status.clone();
                self.emit(SessionEvent::DeliveryUpdated { message_id, status });
                Err(e)
            }
        }
    }

    // === Receiving ===

    async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => debug!("relay stream connected"),
            RelayEvent::Ping => {}
            RelayEvent::MessageReceived(message) => self.handle_incoming(message).await,
            RelayEvent::DeliveryConfirmed(blob_ids) => self.mark_delivered(&blob_ids),
            RelayEvent::BurnSignal => self.handle_peer_burn().await,
            RelayEvent::NotFound => self.handle_not_found().await,
            RelayEvent::Error(message) => {
                warn!(error = %message, "relay stream error");
            }
        }
    }

    async fn handle_incoming(&mut self, message: RelayMessage) {
        if self.state != SessionState::Live {
            return;
        }
        let Some(sequence) = message.sequence else {
            warn!(blob_id = %message.id, "relayed message without sequence");
            return;
        };

        // Own-echo filters: blob ids we created, then the pad regions.
        if self.sent_blob_ids.contains(&message.id)
            || self.sent_sequences.contains(&sequence)
            || self.pad.is_own_sequence(sequence)
        {
            debug!(sequence, "dropping own echoed message");
            return;
        }
        if self.conversation.processed_incoming.is_duplicate(sequence) {
            debug!(sequence, "dropping duplicate incoming message");
            return;
        }

        use base64::Engine;
        let Ok(ciphertext) =
            base64::engine::general_purpose::STANDARD.decode(&message.ciphertext_b64)
        else {
            warn!(blob_id = %message.id, "ciphertext is not base64");
            return;
        };

        let slice = match self.pad.key_for_decryption(sequence, ciphertext.len()) {
            Ok(slice) => slice,
            Err(e) => {
                warn!(sequence, error = %e, "no key material for incoming message");
                return;
            }
        };
        let plaintext = match message::open(&ciphertext, slice.bytes(), sequence) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(sequence, error = %e, "incoming message failed authentication");
                return;
            }
        };
        let content = match message::decode_plaintext(&plaintext) {
            Ok(content) => content,
            Err(e) => {
                warn!(sequence, error = %e, "incoming message content malformed");
                return;
            }
        };

        // Accepted: advance the window, learn the peer's consumption.
        self.conversation.processed_incoming.record(sequence);
        let peer_consumed = match self.conversation.role {
            // Peer is the responder: it consumed from N down to `sequence`.
            ash_core::Role::Initiator => self.conversation.pad_total_size - sequence,
            // Peer is the initiator: it consumed up past the slice end.
            ash_core::Role::Responder => sequence + ciphertext.len() as u64,
        };
        if let Err(e) = self.pad.update_peer_consumption(peer_consumed).await {
            warn!(error = %e, "peer consumption update failed");
        }

        let entry = Message {
            id: Uuid::new_v4(),
            blob_id: Some(message.id),
            sequence,
            direction: Direction::Received,
            content: Some(content),
            delivery_status: DeliveryStatus::Delivered,
            ciphertext_len: ciphertext.len(),
            pending_ciphertext: None,
            created_at: message.received_at,
            server_expires_at: Some(
                message.received_at
                    + ChronoDuration::seconds(i64::from(
                        self.conversation.message_retention_seconds,
                    )),
            ),
            content_wiped: false,
        };
        self.note_message_activity(&entry);
        self.persist_conversation().await;

        if let Err(e) = self.relay.ack(vec![message.id]).await {
            debug!(error = %e, "ack failed (informational only)");
        }

        self.messages.push(entry.clone());
        self.emit(SessionEvent::MessageAppended(entry));
        self.check_pad_low();
    }

    fn mark_delivered(&mut self, blob_ids: &[Uuid]) {
        for blob_id in blob_ids {
            if let Some(entry) = self
                .messages
                .iter_mut()
                .find(|m| m.blob_id == Some(*blob_id) && m.direction == Direction::Sent)
            {
                entry.delivery_status = DeliveryStatus::Delivered;
                let update = SessionEvent::DeliveryUpdated {
                    message_id: entry.id,
                    status: DeliveryStatus::Delivered,
                };
                self.emit(update);
            }
        }
    }

    // === Polling and relay recovery ===

    async fn catch_up_poll(&mut self) {
        let position = self.cursor.read().await.clone();
        match self.relay.poll(position.as_deref()).await {
            Ok(response) => {
                if let Some(next) = response.next_cursor {
                    *self.cursor.write().await = Some(next.clone());
                    self.conversation.relay_cursor = Some(next);
                }
                let burned = response.burned;
                for message in response.messages {
                    self.handle_incoming(message).await;
                }
                if burned {
                    self.handle_peer_burn().await;
                } else {
                    self.persist_conversation().await;
                }
            }
            Err(Error::NotFound) => self.handle_not_found().await,
            Err(Error::ConversationBurned) => self.handle_peer_burn().await,
            Err(e) => warn!(error = %e, "catch-up poll failed"),
        }
    }

    async fn handle_not_found(&mut self) {
        if self.reregistered {
            warn!("relay lost the conversation twice");
            self.emit(SessionEvent::Error(
                Error::ConversationUnknownOnRelay.to_string(),
            ));
            return;
        }
        self.reregistered = true;

        let registration = self
            .relay
            .register(
                tokens::token_hash(&self.conversation.auth_token),
                tokens::token_hash(&self.conversation.burn_token),
            )
            .await;
        match registration {
            Ok(()) => {
                info!("re-registered with relay, restarting subscription");
                self.restart_subscription().await;
            }
            Err(e) => {
                warn!(error = %e, "re-registration failed");
                self.emit(SessionEvent::Error(
                    Error::ConversationUnknownOnRelay.to_string(),
                ));
            }
        }
    }

    async fn restart_subscription(&mut self) {
        // The old task ends right after forwarding the fatal event; wait
        // for it so the subscription slot is free again.
        self.relay_rx = None;
        if let Some(task) = self.relay_task.take() {
            let _ = task.await;
        }
        match subscription::spawn(
            self.relay.clone(),
            self.cursor.clone(),
            self.config.subscription.clone(),
            self.shutdown_tx.subscribe(),
        ) {
            Ok((rx, task)) => {
                self.relay_rx = Some(rx);
                self.relay_task = Some(task);
            }
            Err(e) => warn!(error = %e, "could not restart subscription"),
        }
    }

    // === Burning ===

    async fn handle_peer_burn(&mut self) {
        if self.state == SessionState::Burned {
            return;
        }
        info!("peer burn signal received");

        self.conversation.peer_burned_at = Some(Utc::now());
        if let Err(e) = self.pad.wipe().await {
            warn!(error = %e, "pad wipe failed during peer burn");
        }
        if let Err(e) = self.credentials.delete(&self.conversation.id).await {
            warn!(error = %e, "credential wipe failed during peer burn");
        }
        // Keep the conversation record as a tombstone.
        self.persist_conversation().await;

        let _ = self.shutdown_tx.send(true);
        self.relay_rx = None;
        self.set_state(SessionState::Burned);
        self.emit(SessionEvent::PeerBurned);
    }

    async fn local_burn(&mut self) -> Result<()> {
        if self.state == SessionState::Burned {
            return Err(Error::InvalidState("already burned"));
        }
        info!("local burn requested");

        // Fire-and-forget: the relay signal is best-effort by design.
        if let Err(e) = self.relay.burn(self.conversation.burn_token.clone()).await {
            debug!(error = %e, "relay burn signal failed (ignored)");
        }

        if let Err(e) = self.pad.wipe().await {
            warn!(error = %e, "pad wipe failed during local burn");
        }
        self.credentials.delete(&self.conversation.id).await?;
        self.conv_store.delete(&self.conversation.id).await?;
        self.messages.clear();

        let _ = self.shutdown_tx.send(true);
        self.relay_rx = None;
        self.set_state(SessionState::Burned);
        Ok(())
    }

    // === Forward secrecy sweep ===

    async fn expiry_sweep(&mut self) {
        if self.state != SessionState::Live {
            return;
        }
        let now = Utc::now();
        let due: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                !m.content_wiped && m.server_expires_at.is_some_and(|t| now >= t)
            })
            .map(|(i, _)| i)
            .collect();

        for index in due {
            let (offset, len) = self.messages[index].pad_range();
            if let Err(e) = self.pad.zero_range(offset, len).await {
                warn!(offset, len, error = %e, "expiry wipe failed");
                continue;
            }
            let entry = &mut self.messages[index];
            entry.content = None;
            entry.pending_ciphertext = None;
            entry.content_wiped = true;
            if entry.direction == Direction::Sent
                && entry.delivery_status == DeliveryStatus::Sent
            {
                entry.delivery_status = DeliveryStatus::Expired;
                let update = SessionEvent::DeliveryUpdated {
                    message_id: entry.id,
                    status: DeliveryStatus::Expired,
                };
                self.emit(update);
            }
            debug!(offset, len, "expired message wiped");
        }
    }

    // === Plumbing ===

    fn note_message_activity(&mut self, entry: &Message) {
        self.conversation.last_message_at = Some(entry.created_at);
        self.conversation.last_message_preview = if self.persistence_consented() {
            match &entry.content {
                Some(MessageContent::Text(text)) => {
                    Some(text.chars().take(80).collect())
                }
                Some(MessageContent::Location { .. }) => Some("location".to_string()),
                None => None,
            }
        } else {
            None
        };
    }

    fn persistence_consented(&self) -> bool {
        ash_core::MetadataFlags::from_raw(self.conversation.flags).persistence_consent()
    }

    async fn persist_conversation(&mut self) {
        self.conversation.consumed_front = self.pad.consumed_front();
        self.conversation.consumed_back = self.pad.consumed_back();
        if let Err(e) = self.conv_store.save(&self.conversation).await {
            warn!(error = %e, "conversation persist failed");
        }
    }

    fn check_pad_low(&mut self) {
        let remaining = self.pad.remaining();
        if remaining < self.config.pad_low_threshold {
            self.emit(SessionEvent::PadLow { remaining });
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
        }
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn recv_or_pending(
    rx: &mut Option<mpsc::Receiver<RelayEvent>>,
) -> Option<RelayEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn id_prefix(conversation_id: &str) -> &str {
    &conversation_id[..8.min(conversation_id.len())]
}

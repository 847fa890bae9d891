//! Durable conversation state and the in-memory message model.
//!
//! The [`Conversation`] record is everything a device must remember to
//! resume a session: role, pad counters, the duplicate-filter window, the
//! relay cursor. The persisted blob excludes the mnemonic and both tokens;
//! the token fields live in memory only and are re-derived from the pad
//! when a session opens.

use std::collections::VecDeque;

use ash_core::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ash_core::message::MessageContent;

/// Capacity of the incoming-sequence duplicate filter.
pub const SEQUENCE_WINDOW_CAPACITY: usize = 2048;

/// Sliding window of accepted incoming sequences with a high-water mark.
///
/// A sequence is a duplicate if it is still in the window, or if it is
/// older than anything the window tracks while the window is full (it must
/// have been processed and evicted).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceWindow {
    recent: VecDeque<u64>,
    max_processed: Option<u64>,
}

impl SequenceWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `sequence` was already accepted.
    pub fn is_duplicate(&self, sequence: u64) -> bool {
        if self.recent.contains(&sequence) {
            return true;
        }
        if self.recent.len() == SEQUENCE_WINDOW_CAPACITY {
            let oldest_tracked = self.recent.iter().copied().min().unwrap_or(0);
            if sequence < oldest_tracked
                && self.max_processed.is_some_and(|max| sequence < max)
            {
                return true;
            }
        }
        false
    }

    /// Record an accepted sequence, evicting the oldest entry when full.
    pub fn record(&mut self, sequence: u64) {
        if self.recent.len() == SEQUENCE_WINDOW_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(sequence);
        self.max_processed = Some(self.max_processed.map_or(sequence, |max| max.max(sequence)));
    }

    /// Highest accepted sequence, if any.
    pub fn max_processed(&self) -> Option<u64> {
        self.max_processed
    }

    /// Number of tracked sequences.
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Whether nothing has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

/// Durable per-session record, persisted as `conversation_<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Hex conversation id derived from the pad.
    pub id: String,
    /// Which end of the pad this device sends from.
    pub role: Role,
    /// Total pad size `N` in bytes.
    pub pad_total_size: u64,
    /// Bearer token for relay message operations. Never persisted;
    /// re-derived from the pad on load.
    #[serde(skip)]
    pub auth_token: String,
    /// Token authorizing destruction. Never persisted; re-derived from
    /// the pad on load.
    #[serde(skip)]
    pub burn_token: String,
    /// Relay base URL.
    pub relay_url: String,
    /// Server-side message retention in seconds.
    pub message_retention_seconds: u32,
    /// Client-side disappearing timer in seconds; 0 disables it.
    pub disappearing_timer_seconds: u32,
    /// Conversation color index (0..=15).
    pub color: u8,
    /// Raw ceremony flag word.
    pub flags: u16,
    /// Mirror of the pad's front counter for durable recovery.
    pub consumed_front: u64,
    /// Mirror of the pad's back counter for durable recovery.
    pub consumed_back: u64,
    /// Duplicate filter over accepted incoming sequences.
    #[serde(default)]
    pub processed_incoming: SequenceWindow,
    /// Last relay poll cursor.
    #[serde(default)]
    pub relay_cursor: Option<String>,
    /// Set when the peer burned the conversation; the record then remains
    /// as a tombstone.
    #[serde(default)]
    pub peer_burned_at: Option<DateTime<Utc>>,
    /// Timestamp of the newest message, for list ordering.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Short plaintext preview for the conversation list; only kept when
    /// the persistence-consent flag is set.
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl Conversation {
    /// Pad bytes not yet consumed by either side.
    pub fn pad_remaining(&self) -> u64 {
        self.pad_total_size - self.consumed_front - self.consumed_back
    }

    /// Whether the peer has burned this conversation.
    pub fn is_tombstone(&self) -> bool {
        self.peer_burned_at.is_some()
    }
}

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// We sent it.
    Sent,
    /// The peer sent it.
    Received,
}

/// Delivery lifecycle of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Submission in flight.
    Sending,
    /// The relay accepted it.
    Sent,
    /// The peer acknowledged it.
    Delivered,
    /// Submission failed; the consumed pad bytes are gone regardless.
    Failed(String),
    /// The relay TTL lapsed before delivery.
    Expired,
}

/// One message in the open session.
///
/// Ephemeral unless the user opted into persistence; the orchestrator
/// keeps the live list in memory either way.
#[derive(Debug, Clone)]
pub struct Message {
    /// Local id.
    pub id: Uuid,
    /// Relay-assigned blob id, once submitted.
    pub blob_id: Option<Uuid>,
    /// Absolute pad offset of the message's key slice.
    pub sequence: u64,
    /// Sent or received.
    pub direction: Direction,
    /// Decrypted content; `None` once wiped.
    pub content: Option<MessageContent>,
    /// Delivery lifecycle.
    pub delivery_status: DeliveryStatus,
    /// Ciphertext length, needed to wipe the pad range on expiry.
    pub ciphertext_len: usize,
    /// Retained ciphertext while a retry is still possible.
    pub pending_ciphertext: Option<Vec<u8>>,
    /// Local creation time.
    pub created_at: DateTime<Utc>,
    /// When the relay forgets the blob.
    pub server_expires_at: Option<DateTime<Utc>>,
    /// Whether content was cleared and the pad range zeroed.
    pub content_wiped: bool,
}

impl Message {
    /// Pad range this message consumed, as `(offset, len)`.
    pub fn pad_range(&self) -> (u64, usize) {
        (self.sequence, self.ciphertext_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_accepts_then_rejects() {
        let mut window = SequenceWindow::new();
        assert!(!window.is_duplicate(144));

        window.record(144);
        assert!(window.is_duplicate(144));
        assert!(!window.is_duplicate(288));
        assert_eq!(window.max_processed(), Some(144));
    }

    #[test]
    fn window_evicts_oldest_and_rejects_ancient() {
        let mut window = SequenceWindow::new();
        for seq in 0..SEQUENCE_WINDOW_CAPACITY as u64 + 10 {
            window.record(seq * 16);
        }
        assert_eq!(window.len(), SEQUENCE_WINDOW_CAPACITY);

        // Entry 0 was evicted, but anything older than the window while
        // the window is full is still a duplicate.
        assert!(window.is_duplicate(0));
        assert!(window.is_duplicate(16));

        // In-window entries are duplicates by membership.
        let newest = (SEQUENCE_WINDOW_CAPACITY as u64 + 9) * 16;
        assert!(window.is_duplicate(newest));

        // Fresh sequences above the high-water mark pass.
        assert!(!window.is_duplicate(newest + 16));
    }

    #[test]
    fn window_below_capacity_only_rejects_members() {
        let mut window = SequenceWindow::new();
        window.record(500);
        // 100 was never seen; with a non-full window it must pass (it may
        // be an out-of-order delivery).
        assert!(!window.is_duplicate(100));
    }

    #[test]
    fn window_survives_serde() {
        let mut window = SequenceWindow::new();
        for seq in [10u64, 30, 20] {
            window.record(seq);
        }

        let json = serde_json::to_string(&window).unwrap();
        let restored: SequenceWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, window);
        assert!(restored.is_duplicate(30));
    }

    #[test]
    fn conversation_roundtrips_through_json() {
        let conversation = Conversation {
            id: "ab12".repeat(8),
            role: Role::Initiator,
            pad_total_size: 65536,
            auth_token: "auth".into(),
            burn_token: "burn".into(),
            relay_url: "https://relay.ash.test".into(),
            message_retention_seconds: 300,
            disappearing_timer_seconds: 0,
            color: 4,
            flags: 0x000B,
            consumed_front: 144,
            consumed_back: 0,
            processed_incoming: SequenceWindow::new(),
            relay_cursor: Some("cursor-1".into()),
            peer_burned_at: None,
            last_message_at: None,
            last_message_preview: None,
        };

        let json = serde_json::to_vec(&conversation).unwrap();
        let restored: Conversation = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored.id, conversation.id);
        assert_eq!(restored.role, Role::Initiator);
        assert_eq!(restored.pad_remaining(), 65536 - 144);
        assert!(!restored.is_tombstone());
    }

    #[test]
    fn tokens_never_reach_the_persisted_form() {
        let conversation = Conversation {
            id: "feed".repeat(8),
            role: Role::Initiator,
            pad_total_size: 4096,
            auth_token: "secret-auth".into(),
            burn_token: "secret-burn".into(),
            relay_url: "https://relay.ash.test".into(),
            message_retention_seconds: 300,
            disappearing_timer_seconds: 0,
            color: 0,
            flags: 0,
            consumed_front: 0,
            consumed_back: 0,
            processed_incoming: SequenceWindow::new(),
            relay_cursor: None,
            peer_burned_at: None,
            last_message_at: None,
            last_message_preview: None,
        };

        let json = String::from_utf8(serde_json::to_vec(&conversation).unwrap()).unwrap();
        assert!(!json.contains("secret-auth"));
        assert!(!json.contains("secret-burn"));
        assert!(!json.contains("auth_token"));
        assert!(!json.contains("burn_token"));

        // Reloading yields empty token fields; the session re-derives them
        // from the pad before use.
        let restored: Conversation = serde_json::from_str(&json).unwrap();
        assert!(restored.auth_token.is_empty());
        assert!(restored.burn_token.is_empty());
    }

    #[test]
    fn legacy_record_without_new_fields_parses() {
        // Records written before the cursor/window fields existed.
        let json = r#"{
            "id": "abcd",
            "role": "responder",
            "pad_total_size": 4096,
            "relay_url": "https://r",
            "message_retention_seconds": 300,
            "disappearing_timer_seconds": 30,
            "color": 0,
            "flags": 11,
            "consumed_front": 0,
            "consumed_back": 22
        }"#;
        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.role, Role::Responder);
        assert!(conversation.relay_cursor.is_none());
        assert!(conversation.processed_incoming.is_empty());
    }
}

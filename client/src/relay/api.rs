//! Relay wire types, bit-exact with the relay HTTP API.
//!
//! All bodies are JSON. Authenticated calls carry
//! `Authorization: Bearer <auth_token>`; registration and burn carry token
//! material in the body instead (registration only ever ships hashes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /v1/conversations` body.
///
/// Both participants register with SHA-256 hashes of their tokens; the
/// relay can verify but never forge them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Hex conversation id.
    pub id: String,
    /// Hex SHA-256 of the auth token.
    pub auth_token_hash: String,
    /// Hex SHA-256 of the burn token.
    pub burn_token_hash: String,
}

/// `POST /v1/messages` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Conversation id.
    pub conversation_id: String,
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Absolute pad offset of the sender's key slice.
    pub sequence: u64,
    /// Requested retention in seconds.
    pub ttl_seconds: u32,
}

/// `POST /v1/messages` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Relay-assigned blob id.
    pub blob_id: Uuid,
    /// When the relay will forget the blob.
    pub expires_at: DateTime<Utc>,
}

/// One relayed message, in poll responses and SSE `message` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Blob id.
    pub id: Uuid,
    /// Sender's sequence; optional on the stream, required when polling.
    pub sequence: Option<u64>,
    /// Base64 ciphertext.
    pub ciphertext_b64: String,
    /// When the relay received the blob.
    pub received_at: DateTime<Utc>,
}

/// `GET /v1/messages` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// Undelivered blobs after the cursor.
    pub messages: Vec<RelayMessage>,
    /// Cursor for the next poll.
    pub next_cursor: Option<String>,
    /// Whether the conversation is burned on the relay.
    pub burned: bool,
}

/// `POST /v1/acks` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    /// Conversation id.
    pub conversation_id: String,
    /// Blobs to acknowledge.
    pub blob_ids: Vec<Uuid>,
}

/// `GET /v1/burn` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnStatusResponse {
    /// Whether the conversation is burned.
    pub burned: bool,
}

/// `POST /v1/burn` body.
///
/// Burning requires the burn token itself, not the auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnRequest {
    /// Conversation id.
    pub conversation_id: String,
    /// The cleartext burn token.
    pub burn_token: String,
}

/// `delivered` SSE event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredPayload {
    /// Acknowledged blobs.
    pub blob_ids: Vec<Uuid>,
}

/// `error` SSE event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable cause.
    pub message: String,
}

/// Events yielded by a real-time subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The stream is established.
    Connected,
    /// A new relayed message.
    MessageReceived(RelayMessage),
    /// The peer acknowledged these blobs.
    DeliveryConfirmed(Vec<Uuid>),
    /// The conversation was burned.
    BurnSignal,
    /// Keep-alive.
    Ping,
    /// The relay does not know the conversation.
    NotFound,
    /// Stream-level error; the subscription task decides whether to
    /// reconnect.
    Error(String),
}

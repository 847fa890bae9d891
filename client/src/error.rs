//! Error types for the session client.
//!
//! Three families on top of the core taxonomy:
//!
//! - **Relay**: transport and protocol failures, all recoverable; they
//!   never roll back pad state.
//! - **Storage**: vault read/write failures and tamper detection.
//! - **Session**: ceremony flow and orchestrator state violations.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session client.
#[derive(Debug, Error)]
pub enum Error {
    /// An error from the cryptographic core.
    #[error(transparent)]
    Core(#[from] ash_core::Error),

    // ==================== Relay Errors ====================
    /// The relay does not know this conversation (HTTP 404).
    #[error("conversation not found on relay")]
    NotFound,

    /// The relay rejected our token (HTTP 401/403).
    #[error("relay rejected authorization")]
    Unauthorized,

    /// The relay reports the conversation burned (HTTP 410).
    #[error("conversation has been burned on the relay")]
    ConversationBurned,

    /// Transport-level failure: connect, TLS, timeout.
    #[error("relay network error: {0}")]
    Network(String),

    /// The relay answered with something we could not parse.
    #[error("relay response malformed: {0}")]
    Decode(String),

    /// The relay answered with a server-side error status.
    #[error("relay server error: HTTP {status}")]
    ServerError {
        /// The HTTP status code.
        status: u16,
    },

    /// The relay forgot the conversation and re-registration failed too.
    #[error("conversation unknown on relay after re-registration")]
    ConversationUnknownOnRelay,

    // ==================== Storage Errors ====================
    /// No pad stored under this conversation id.
    #[error("pad not found for conversation")]
    PadNotFound,

    /// The vault failed to read.
    #[error("storage read failed: {0}")]
    ReadFailed(String),

    /// The vault failed to write.
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    /// A stored record failed to parse; it was altered outside our control.
    #[error("stored record tampered or corrupted: {0}")]
    Tamper(String),

    // ==================== Session Errors ====================
    /// The ceremony passphrase is required but was not provided.
    #[error("ceremony passphrase required")]
    PassphraseMissing,

    /// Persistent CRC failures: the passphrase does not match the stream.
    #[error("ceremony passphrase does not match the stream")]
    PassphraseInvalid,

    /// The user rejected the verification mnemonic.
    #[error("verification mnemonic rejected")]
    ChecksumMismatch,

    /// The ceremony scan did not complete within its deadline.
    #[error("pad reconstruction timed out")]
    PadReconstructionTimeout,

    /// Operation not valid in the session's current state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Whether retrying the same relay call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::ServerError { .. } | Error::Decode(_)
        )
    }
}

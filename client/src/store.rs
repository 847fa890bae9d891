//! Vault-backed persistence for pads, conversations and settings.
//!
//! Per conversation, the encrypted key-value store holds:
//!
//! - `conversation_<id>`: JSON of the [`Conversation`] record, which
//!   excludes the mnemonic and both tokens
//! - `pad_<id>`: JSON `{ bytes_b64, consumed_front, consumed_back }`
//! - `tokens_<id>`: the ceremony-derived relay credentials
//!
//! The credential record exists because token derivation reads the
//! ceremony pad bytes, and those mutate as ranges are consumed and swept;
//! re-derivation from `pad_<id>` is only valid while nothing has been
//! spent (see DESIGN.md). The pad record's legacy format (a bare base64
//! string, counters implied zero) is still accepted on read and upgraded
//! on the next write.
//!
//! Pad writes are projections: the caller describes the post-consumption
//! state and the record is written before the in-memory pad commits. A
//! crash can therefore lose pad bytes, never reuse them. Wiping overwrites
//! the record with zeros of the same shape before deleting it, so the
//! key-value layer never retains a recoverable copy.

use std::sync::Arc;

use ash_core::pad::{Pad, Role};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::ports::SecureVault;
use crate::state::Conversation;

/// Key of the process-wide settings blob.
const SETTINGS_KEY: &str = "settings";

fn pad_key(conversation_id: &str) -> String {
    format!("pad_{conversation_id}")
}

fn conversation_key(conversation_id: &str) -> String {
    format!("conversation_{conversation_id}")
}

fn credential_key(conversation_id: &str) -> String {
    format!("tokens_{conversation_id}")
}

/// Serialized pad record.
#[derive(Serialize, Deserialize)]
struct PadRecord {
    bytes_b64: String,
    consumed_front: u64,
    consumed_back: u64,
}

/// Pad persistence over the vault.
#[derive(Clone)]
pub struct PadStore {
    vault: Arc<dyn SecureVault>,
}

impl PadStore {
    /// Create a store over the given vault.
    pub fn new(vault: Arc<dyn SecureVault>) -> Self {
        Self { vault }
    }

    /// Load a pad.
    ///
    /// # Errors
    ///
    /// - `PadNotFound` if no record exists.
    /// - `Tamper` if the record parses neither as JSON nor as the legacy
    ///   bare-base64 form, or its counters are inconsistent.
    pub async fn load(&self, conversation_id: &str) -> Result<Pad> {
        let raw = self
            .vault
            .get(&pad_key(conversation_id))
            .await?
            .ok_or(Error::PadNotFound)?;

        if let Ok(record) = serde_json::from_slice::<PadRecord>(&raw) {
            let bytes = Zeroizing::new(
                STANDARD
                    .decode(&record.bytes_b64)
                    .map_err(|_| Error::Tamper("pad bytes are not base64".into()))?,
            );
            return Pad::from_parts(bytes.to_vec(), record.consumed_front, record.consumed_back)
                .map_err(|_| Error::Tamper("pad counters violate the split invariant".into()));
        }

        // Legacy format: the whole value is bare base64 of the pad bytes.
        let text =
            std::str::from_utf8(&raw).map_err(|_| Error::Tamper("pad record unreadable".into()))?;
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|_| Error::Tamper("pad record unreadable".into()))?;
        Ok(Pad::new(bytes))
    }

    /// Persist the pad's current state.
    pub async fn save(&self, conversation_id: &str, pad: &Pad) -> Result<()> {
        let record = PadRecord {
            bytes_b64: STANDARD.encode(pad.as_bytes()),
            consumed_front: pad.consumed_front(),
            consumed_back: pad.consumed_back(),
        };
        self.put_record(conversation_id, &record).await
    }

    /// Persist the state the pad will have after consuming `len` bytes for
    /// sending, without touching the in-memory pad.
    ///
    /// Written before the memory commit so a crash between the two leaves
    /// the spent range unusable rather than reusable.
    pub async fn save_with_pending_send(
        &self,
        conversation_id: &str,
        pad: &Pad,
        role: Role,
        len: usize,
    ) -> Result<()> {
        let slice = pad.peek_send(role, len)?;
        let offset = slice.offset() as usize;

        let mut projected = Zeroizing::new(pad.as_bytes().to_vec());
        projected[offset..offset + len].iter_mut().for_each(|b| *b = 0);

        let (front, back) = match role {
            Role::Initiator => (pad.consumed_front() + len as u64, pad.consumed_back()),
            Role::Responder => (pad.consumed_front(), pad.consumed_back() + len as u64),
        };
        let record = PadRecord {
            bytes_b64: STANDARD.encode(&*projected),
            consumed_front: front,
            consumed_back: back,
        };
        self.put_record(conversation_id, &record).await
    }

    /// Overwrite the record with zeros, then delete it.
    pub async fn wipe(&self, conversation_id: &str, pad_len: usize) -> Result<()> {
        let blank = PadRecord {
            bytes_b64: STANDARD.encode(vec![0u8; pad_len]),
            consumed_front: pad_len as u64,
            consumed_back: 0,
        };
        self.put_record(conversation_id, &blank).await?;
        self.vault.delete(&pad_key(conversation_id)).await
    }

    async fn put_record(&self, conversation_id: &str, record: &PadRecord) -> Result<()> {
        let json = serde_json::to_vec(record)
            .map_err(|e| Error::WriteFailed(format!("pad record serialization: {e}")))?;
        self.vault.put(&pad_key(conversation_id), json).await
    }
}

/// Conversation record persistence over the vault.
#[derive(Clone)]
pub struct ConversationStore {
    vault: Arc<dyn SecureVault>,
}

impl ConversationStore {
    /// Create a store over the given vault.
    pub fn new(vault: Arc<dyn SecureVault>) -> Self {
        Self { vault }
    }

    /// Load a conversation record, `None` if absent.
    pub async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        match self.vault.get(&conversation_key(conversation_id)).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| Error::Tamper(format!("conversation record: {e}"))),
        }
    }

    /// Persist a conversation record.
    pub async fn save(&self, conversation: &Conversation) -> Result<()> {
        let json = serde_json::to_vec(conversation)
            .map_err(|e| Error::WriteFailed(format!("conversation serialization: {e}")))?;
        self.vault.put(&conversation_key(&conversation.id), json).await
    }

    /// Delete a conversation record.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        self.vault.delete(&conversation_key(conversation_id)).await
    }
}

/// Serialized relay credentials.
#[derive(Serialize, Deserialize)]
struct CredentialRecord {
    auth_token: String,
    burn_token: String,
}

/// Ceremony-derived relay credential persistence.
///
/// Written once at install, read at every session open, destroyed with
/// the pad. Cleartext tokens never leave the device; this record lives in
/// the same encrypted vault as the pad itself, which already dominates it.
#[derive(Clone)]
pub struct CredentialStore {
    vault: Arc<dyn SecureVault>,
}

impl CredentialStore {
    /// Create a store over the given vault.
    pub fn new(vault: Arc<dyn SecureVault>) -> Self {
        Self { vault }
    }

    /// Load the `(auth_token, burn_token)` pair, `None` if absent.
    pub async fn load(&self, conversation_id: &str) -> Result<Option<(String, String)>> {
        match self.vault.get(&credential_key(conversation_id)).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice::<CredentialRecord>(&raw)
                .map(|record| Some((record.auth_token, record.burn_token)))
                .map_err(|e| Error::Tamper(format!("credential record: {e}"))),
        }
    }

    /// Persist the credential pair.
    pub async fn save(
        &self,
        conversation_id: &str,
        auth_token: &str,
        burn_token: &str,
    ) -> Result<()> {
        let record = CredentialRecord {
            auth_token: auth_token.to_string(),
            burn_token: burn_token.to_string(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| Error::WriteFailed(format!("credential serialization: {e}")))?;
        self.vault.put(&credential_key(conversation_id), json).await
    }

    /// Destroy the credential record.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        self.vault.delete(&credential_key(conversation_id)).await
    }
}

/// Process-wide settings, persisted as one blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Default relay URL offered when creating ceremonies.
    pub relay_url: String,
    /// Require biometric unlock to open the app.
    #[serde(default)]
    pub biometric_lock_enabled: bool,
    /// Lock immediately when the app is backgrounded.
    #[serde(default)]
    pub lock_on_background: bool,
}

impl Settings {
    /// Load settings, `None` if never saved.
    pub async fn load(vault: &dyn SecureVault) -> Result<Option<Settings>> {
        match vault.get(SETTINGS_KEY).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| Error::Tamper(format!("settings record: {e}"))),
        }
    }

    /// Persist settings.
    pub async fn save(&self, vault: &dyn SecureVault) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::WriteFailed(format!("settings serialization: {e}")))?;
        vault.put(SETTINGS_KEY, json).await
    }
}

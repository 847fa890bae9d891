//! Session-side manager over a stored pad.
//!
//! Wraps the in-memory [`Pad`] together with its vault record and keeps the
//! two consistent:
//!
//! - sending persists the projected post-consumption record first, then
//!   commits in memory, so a crash can lose pad bytes but never reuse them;
//! - a failed persist is a clean no-op (no bytes consumed);
//! - peer-consumption updates and range wipes persist after mutating,
//!   which is safe because both only ever shrink what is usable.

use std::sync::Arc;

use ash_core::pad::{KeySlice, Pad, Role};
use ash_core::tokens::SessionTokens;

use crate::error::{Error, Result};
use crate::ports::SecureVault;
use crate::store::PadStore;

/// A loaded pad bound to its conversation and role.
pub struct PadManager {
    conversation_id: String,
    role: Role,
    pad: Pad,
    store: PadStore,
    wiped: bool,
}

impl PadManager {
    /// Load the pad for `conversation_id` from the vault.
    ///
    /// # Errors
    ///
    /// `PadNotFound` if no pad record exists.
    pub async fn load(
        vault: Arc<dyn SecureVault>,
        conversation_id: &str,
        role: Role,
    ) -> Result<Self> {
        let store = PadStore::new(vault);
        let pad = store.load(conversation_id).await?;
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            role,
            pad,
            store,
            wiped: false,
        })
    }

    /// Install a freshly ceremonied pad and persist it.
    pub async fn install(
        vault: Arc<dyn SecureVault>,
        conversation_id: &str,
        role: Role,
        pad: Pad,
    ) -> Result<Self> {
        let store = PadStore::new(vault);
        store.save(conversation_id, &pad).await?;
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            role,
            pad,
            store,
            wiped: false,
        })
    }

    /// This device's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Derive the session tokens from the stored pad bytes.
    ///
    /// This matches the ceremony-time derivation only while the stored
    /// bytes are still the ceremony bytes, i.e. before any range was
    /// consumed or swept. Installs persist the credential record for that
    /// reason; this derivation is the fallback for records that predate
    /// it.
    ///
    /// # Errors
    ///
    /// `InvalidState` once the pad is wiped.
    pub fn session_tokens(&self) -> Result<SessionTokens> {
        self.ensure_live()?;
        Ok(SessionTokens::derive(self.pad.as_bytes()))
    }

    /// Total pad size `N`.
    pub fn total_size(&self) -> u64 {
        self.pad.len() as u64
    }

    /// Bytes consumed from the front.
    pub fn consumed_front(&self) -> u64 {
        self.pad.consumed_front()
    }

    /// Bytes consumed from the back.
    pub fn consumed_back(&self) -> u64 {
        self.pad.consumed_back()
    }

    /// Unconsumed bytes remaining.
    pub fn remaining(&self) -> u64 {
        self.pad.remaining() as u64
    }

    /// Whether `len` bytes can still be consumed for sending.
    pub fn can_send(&self, len: usize) -> bool {
        !self.wiped && self.pad.can_send(len)
    }

    /// Consume `len` bytes from this role's send region, durably.
    ///
    /// The returned slice's offset is the message sequence. Fails as a
    /// clean no-op: on `PadExhausted` or a vault write failure nothing was
    /// consumed; on success both disk and memory advanced.
    pub async fn consume_for_sending(&mut self, len: usize) -> Result<KeySlice> {
        self.ensure_live()?;
        let slice = self.pad.peek_send(self.role, len)?;

        // Disk first. If this crashes half-way the counters on disk are
        // ahead of memory: the range is lost, never reused.
        self.store
            .save_with_pending_send(&self.conversation_id, &self.pad, self.role, len)
            .await?;
        self.pad.commit_send(self.role, len);
        Ok(slice)
    }

    /// Key material for decrypting a received message.
    pub fn key_for_decryption(&self, offset: u64, len: usize) -> Result<KeySlice> {
        self.ensure_live()?;
        Ok(self.pad.key_for_decryption(self.role, offset, len)?)
    }

    /// Advance the peer's consumption counter (monotonic) and persist.
    pub async fn update_peer_consumption(&mut self, consumed: u64) -> Result<()> {
        self.ensure_live()?;
        self.pad.update_peer_consumption(self.role, consumed)?;
        self.store.save(&self.conversation_id, &self.pad).await
    }

    /// Zero a pad range (expiry sweep) and persist. Idempotent.
    pub async fn zero_range(&mut self, offset: u64, len: usize) -> Result<()> {
        self.ensure_live()?;
        self.pad.zero_range(offset, len)?;
        self.store.save(&self.conversation_id, &self.pad).await
    }

    /// Whether a relayed sequence points into our own send region.
    pub fn is_own_sequence(&self, sequence: u64) -> bool {
        self.pad.is_own_sequence(self.role, sequence)
    }

    /// Zero the pad in memory and destroy its vault record.
    ///
    /// Terminal: every later operation fails with `InvalidState`.
    pub async fn wipe(&mut self) -> Result<()> {
        let len = self.pad.len();
        self.pad.wipe();
        self.wiped = true;
        self.store.wipe(&self.conversation_id, len).await
    }

    fn ensure_live(&self) -> Result<()> {
        if self.wiped {
            return Err(Error::Core(ash_core::Error::InvalidState));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PadManager")
            .field("conversation_id", &self.conversation_id)
            .field("role", &self.role)
            .field("remaining", &self.pad.remaining())
            .field("wiped", &self.wiped)
            .finish()
    }
}

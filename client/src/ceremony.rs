//! Ceremony finalization: from pad bytes to an installed conversation.
//!
//! Both roles end in a [`PendingSession`]: pad bytes, metadata, derived
//! tokens and the 6-word mnemonic. Nothing touches the vault until the
//! users have compared mnemonics aloud and confirmed; a rejection discards
//! the pad (`ChecksumMismatch`).
//!
//! The receiver side wraps the core decoder with a scan deadline
//! ([`ScanSession`]) and the wrong-passphrase heuristic: a masked stream
//! scanned with the wrong passphrase fails CRC on every frame, so a long
//! run of CRC failures with zero accepted frames surfaces as
//! `PassphraseInvalid` instead of an endless scan.

use std::sync::Arc;

use ash_core::ceremony::{CeremonyPayload, CeremonyReceiver};
use ash_core::entropy::GesturePool;
use ash_core::metadata::CeremonyMetadata;
use ash_core::pad::{Pad, Role};
use ash_core::tokens::{self, SessionTokens};
use ash_core::CeremonyStream;
use tokio::time::Instant;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::pad_manager::PadManager;
use crate::ports::SecureVault;
use crate::state::{Conversation, SequenceWindow};

/// Consecutive CRC failures (with nothing accepted) that convict the
/// passphrase rather than the channel.
const PASSPHRASE_FAILURE_THRESHOLD: u32 = 24;

/// A completed ceremony waiting for mnemonic confirmation.
pub struct PendingSession {
    pad_bytes: Zeroizing<Vec<u8>>,
    metadata: CeremonyMetadata,
    role: Role,
    tokens: SessionTokens,
    mnemonic: Vec<&'static str>,
}

impl PendingSession {
    /// Initiator path: sample a fresh pad from gesture entropy.
    pub fn begin_initiator(
        pool: &GesturePool,
        pad_len: usize,
        metadata: CeremonyMetadata,
    ) -> Result<Self> {
        let pad_bytes = Zeroizing::new(pool.sample_pad(pad_len)?);
        Ok(Self::from_parts(pad_bytes, metadata, Role::Initiator))
    }

    /// Receiver path: adopt a decoded ceremony payload.
    pub fn from_ceremony(payload: CeremonyPayload) -> Self {
        let CeremonyPayload { metadata, pad } = payload;
        Self::from_parts(Zeroizing::new(pad), metadata, Role::Responder)
    }

    fn from_parts(
        pad_bytes: Zeroizing<Vec<u8>>,
        metadata: CeremonyMetadata,
        role: Role,
    ) -> Self {
        let tokens = SessionTokens::derive(&pad_bytes);
        let mnemonic = tokens::mnemonic(&pad_bytes);
        Self {
            pad_bytes,
            metadata,
            role,
            tokens,
            mnemonic,
        }
    }

    /// The words both users read aloud.
    pub fn mnemonic(&self) -> &[&'static str] {
        &self.mnemonic
    }

    /// The conversation id this session will have.
    pub fn conversation_id(&self) -> &str {
        &self.tokens.conversation_id
    }

    /// This device's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Ceremony settings in effect.
    pub fn metadata(&self) -> &CeremonyMetadata {
        &self.metadata
    }

    /// Initiator side: the frame stream to display.
    pub fn frame_stream(
        &self,
        block_size: usize,
        passphrase: Option<&str>,
        method: ash_core::CodingMethod,
    ) -> Result<CeremonyStream> {
        Ok(CeremonyStream::new(
            &self.metadata,
            &self.pad_bytes,
            block_size,
            passphrase,
            method,
        )?)
    }

    /// Resolve the mnemonic comparison.
    ///
    /// On `confirmed == true` the pad and conversation records are
    /// persisted and the durable [`Conversation`] is returned. On `false`
    /// the pad is discarded and `ChecksumMismatch` is returned.
    pub async fn confirm_mnemonic(
        self,
        vault: Arc<dyn SecureVault>,
        confirmed: bool,
    ) -> Result<(Conversation, PadManager)> {
        if !confirmed {
            // Dropping self zeroizes the pad bytes.
            return Err(Error::ChecksumMismatch);
        }

        let conversation = Conversation {
            id: self.tokens.conversation_id.clone(),
            role: self.role,
            pad_total_size: self.pad_bytes.len() as u64,
            auth_token: self.tokens.auth_token.clone(),
            burn_token: self.tokens.burn_token.clone(),
            relay_url: self.metadata.relay_url.clone(),
            message_retention_seconds: self.metadata.ttl_seconds,
            disappearing_timer_seconds: self.metadata.disappearing_seconds,
            color: self.metadata.flags.color_index(),
            flags: self.metadata.flags.raw(),
            consumed_front: 0,
            consumed_back: 0,
            processed_incoming: SequenceWindow::new(),
            relay_cursor: None,
            peer_burned_at: None,
            last_message_at: None,
            last_message_preview: None,
        };

        let pad = Pad::new(self.pad_bytes.to_vec());
        let manager =
            PadManager::install(vault.clone(), &conversation.id, self.role, pad).await?;

        // The persisted conversation record excludes the tokens; they go
        // into their own credential record so reconnects survive pad
        // consumption.
        crate::store::CredentialStore::new(vault.clone())
            .save(
                &conversation.id,
                &self.tokens.auth_token,
                &self.tokens.burn_token,
            )
            .await?;
        crate::store::ConversationStore::new(vault)
            .save(&conversation)
            .await?;

        Ok((conversation, manager))
    }
}

impl std::fmt::Debug for PendingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSession")
            .field("conversation_id", &self.tokens.conversation_id)
            .field("role", &self.role)
            .field("pad_len", &self.pad_bytes.len())
            .finish()
    }
}

/// Receiver-side scan loop with a completion deadline.
pub struct ScanSession {
    receiver: CeremonyReceiver,
    deadline: Instant,
    crc_failures: u32,
    frames_accepted: u32,
}

impl ScanSession {
    /// Start scanning; the ceremony must complete within `timeout`.
    pub fn new(passphrase: Option<&str>, timeout: std::time::Duration) -> Self {
        Self {
            receiver: CeremonyReceiver::new(passphrase),
            deadline: Instant::now() + timeout,
            crc_failures: 0,
            frames_accepted: 0,
        }
    }

    /// Absorb one scanned frame.
    ///
    /// Damaged or foreign frames are dropped silently (`Ok(false)`); a
    /// noisy camera channel is expected. Returns `Ok(true)` on completion.
    ///
    /// # Errors
    ///
    /// - `PadReconstructionTimeout` once the deadline passes.
    /// - `PassphraseInvalid` after a long run of CRC failures with no
    ///   accepted frame.
    pub fn absorb(&mut self, wire: &[u8]) -> Result<bool> {
        if Instant::now() >= self.deadline {
            return Err(Error::PadReconstructionTimeout);
        }

        match self.receiver.absorb(wire) {
            Ok(complete) => {
                self.frames_accepted += 1;
                self.crc_failures = 0;
                Ok(complete)
            }
            Err(ash_core::Error::FrameCorrupt { .. }) => {
                self.crc_failures += 1;
                if self.frames_accepted == 0
                    && self.crc_failures >= PASSPHRASE_FAILURE_THRESHOLD
                {
                    return Err(Error::PassphraseInvalid);
                }
                Ok(false)
            }
            Err(ash_core::Error::FrameMalformed { .. })
            | Err(ash_core::Error::FrameIncompatible { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Scan progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.receiver.progress()
    }

    /// Whether the payload is fully reconstructed.
    pub fn is_complete(&self) -> bool {
        self.receiver.is_complete()
    }

    /// Finish the scan and hand over to mnemonic confirmation.
    pub fn finish(self) -> Result<PendingSession> {
        let payload = self.receiver.finish()?;
        Ok(PendingSession::from_ceremony(payload))
    }
}

//! One-time pad with split directional consumption.
//!
//! Both devices hold the same pad bytes. The initiator consumes key material
//! from the front of the pad, the responder from the back, so no byte is ever
//! used by both parties:
//!
//! ```text
//! ┌────────────────┬──────────────────────┬────────────────┐
//! │ initiator sent │      available       │ responder sent │
//! │ [0, front)     │                      │ [N - back, N)  │
//! └────────────────┴──────────────────────┴────────────────┘
//! ```
//!
//! Consumption is strictly monotonic, spent bytes are zeroed immediately,
//! and the whole buffer is zeroed on drop.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// Which end of the pad this device sends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Created the pad; sends from the front.
    Initiator,
    /// Received the pad via ceremony; sends from the back.
    Responder,
}

impl Role {
    /// The role of the other device.
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Preset pad sizes offered at ceremony time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadSize {
    /// 64 KiB - short-lived conversations, fastest transfer.
    Small,
    /// 256 KiB - the default.
    Medium,
    /// 1 MiB - long conversations, slowest transfer.
    Large,
}

impl PadSize {
    /// Size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            PadSize::Small => 64 * 1024,
            PadSize::Medium => 256 * 1024,
            PadSize::Large => 1024 * 1024,
        }
    }
}

/// Key material extracted from the pad for one message.
///
/// Holds the absolute pad offset the slice starts at (the message sequence)
/// and the bytes themselves, zeroed on drop. Callers must not retain the
/// slice past the AEAD call that consumes it.
pub struct KeySlice {
    offset: u64,
    bytes: Zeroizing<Vec<u8>>,
}

impl KeySlice {
    pub(crate) fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            offset,
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Absolute pad offset the slice starts at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The key material.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Slice length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for KeySlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySlice")
            .field("offset", &self.offset)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A one-time pad with split consumption counters.
///
/// # Invariants
///
/// - `consumed_front + consumed_back <= len` at all times.
/// - Both counters are monotonically non-decreasing.
/// - A byte position is used for encryption by at most one party.
pub struct Pad {
    bytes: Vec<u8>,
    consumed_front: usize,
    consumed_back: usize,
}

impl Drop for Pad {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Pad {
    /// Wrap freshly sampled pad bytes, nothing consumed yet.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            consumed_front: 0,
            consumed_back: 0,
        }
    }

    /// Reconstruct a pad from persisted bytes and counters.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the counters violate the split invariant.
    pub fn from_parts(bytes: Vec<u8>, consumed_front: u64, consumed_back: u64) -> Result<Self> {
        let front = consumed_front as usize;
        let back = consumed_back as usize;
        if front.checked_add(back).map_or(true, |sum| sum > bytes.len()) {
            return Err(Error::InvalidState);
        }
        Ok(Self {
            bytes,
            consumed_front: front,
            consumed_back: back,
        })
    }

    /// Total pad size `N`.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the pad holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes consumed from the front (initiator sends).
    #[inline]
    pub fn consumed_front(&self) -> u64 {
        self.consumed_front as u64
    }

    /// Bytes consumed from the back (responder sends).
    #[inline]
    pub fn consumed_back(&self) -> u64 {
        self.consumed_back as u64
    }

    /// Unconsumed bytes remaining between the two send regions.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.consumed_front - self.consumed_back
    }

    /// Whether no unconsumed bytes remain.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Whether `len` bytes can still be consumed for sending.
    pub fn can_send(&self, len: usize) -> bool {
        self.remaining() >= len
    }

    /// Absolute offset the next `len`-byte send slice would start at.
    fn send_offset(&self, role: Role, len: usize) -> u64 {
        match role {
            Role::Initiator => self.consumed_front as u64,
            Role::Responder => (self.bytes.len() - self.consumed_back - len) as u64,
        }
    }

    /// Read the next send slice without consuming it.
    ///
    /// Used by the pad manager to persist the post-consumption state before
    /// committing in memory. `commit_send` with the same arguments completes
    /// the consumption.
    pub fn peek_send(&self, role: Role, len: usize) -> Result<KeySlice> {
        if !self.can_send(len) {
            return Err(Error::PadExhausted {
                needed: len,
                available: self.remaining(),
            });
        }
        let offset = self.send_offset(role, len);
        let start = offset as usize;
        Ok(KeySlice::new(offset, self.bytes[start..start + len].to_vec()))
    }

    /// Commit a consumption previously observed with `peek_send`: zero the
    /// spent range and advance the role's counter.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the remaining bytes; callers must have
    /// checked via `peek_send` or `can_send` first (broken invariant).
    pub fn commit_send(&mut self, role: Role, len: usize) {
        assert!(self.can_send(len), "commit_send without available pad bytes");
        let start = self.send_offset(role, len) as usize;
        self.bytes[start..start + len].zeroize();
        match role {
            Role::Initiator => self.consumed_front += len,
            Role::Responder => self.consumed_back += len,
        }
    }

    /// Consume the next `len` bytes from this role's send region.
    ///
    /// The returned slice starts at the message sequence offset. The spent
    /// range in the pad is zeroed before this returns.
    ///
    /// # Errors
    ///
    /// `PadExhausted` if fewer than `len` bytes remain; the pad is untouched.
    pub fn consume_for_sending(&mut self, role: Role, len: usize) -> Result<KeySlice> {
        let slice = self.peek_send(role, len)?;
        self.commit_send(role, len);
        Ok(slice)
    }

    /// Read `len` bytes at `offset` for decrypting a received message.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` if the range exceeds the pad bounds.
    /// - `AlreadyConsumedBySelf` if the range overlaps this role's own send
    ///   region; that material was spent by us and can never decrypt a
    ///   peer message.
    pub fn key_for_decryption(&self, role: Role, offset: u64, len: usize) -> Result<KeySlice> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(Error::OutOfRange {
                offset,
                len,
                pad_len: self.bytes.len(),
            })?;
        if end > self.bytes.len() as u64 {
            return Err(Error::OutOfRange {
                offset,
                len,
                pad_len: self.bytes.len(),
            });
        }

        let overlaps_own = match role {
            Role::Initiator => offset < self.consumed_front as u64,
            Role::Responder => end > (self.bytes.len() - self.consumed_back) as u64,
        };
        if overlaps_own {
            return Err(Error::AlreadyConsumedBySelf { offset, len });
        }

        let start = offset as usize;
        Ok(KeySlice::new(offset, self.bytes[start..start + len].to_vec()))
    }

    /// Advance the peer's consumption counter to at least `consumed`.
    ///
    /// Counters never decrease; a lower value is a no-op. Used when a
    /// received message reveals how far the peer has consumed.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the new value would violate the split invariant,
    /// which indicates a misbehaving peer.
    pub fn update_peer_consumption(&mut self, role: Role, consumed: u64) -> Result<()> {
        let consumed = consumed as usize;
        match role.peer() {
            Role::Initiator => {
                let new = self.consumed_front.max(consumed);
                if new + self.consumed_back > self.bytes.len() {
                    return Err(Error::InvalidState);
                }
                self.consumed_front = new;
            }
            Role::Responder => {
                let new = self.consumed_back.max(consumed);
                if self.consumed_front + new > self.bytes.len() {
                    return Err(Error::InvalidState);
                }
                self.consumed_back = new;
            }
        }
        Ok(())
    }

    /// Overwrite `len` bytes at `offset` with zeros. Idempotent.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the range exceeds the pad bounds.
    pub fn zero_range(&mut self, offset: u64, len: usize) -> Result<()> {
        let end = offset as usize + len;
        if end > self.bytes.len() {
            return Err(Error::OutOfRange {
                offset,
                len,
                pad_len: self.bytes.len(),
            });
        }
        self.bytes[offset as usize..end].zeroize();
        Ok(())
    }

    /// Zero every byte and mark the pad fully consumed.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
        self.consumed_front = self.bytes.len();
        self.consumed_back = 0;
    }

    /// Whether `sequence` points into this role's own send region, meaning
    /// a relayed message carrying it is our own submission echoed back.
    pub fn is_own_sequence(&self, role: Role, sequence: u64) -> bool {
        match role {
            Role::Initiator => sequence < self.consumed_front as u64,
            Role::Responder => sequence >= (self.bytes.len() - self.consumed_back) as u64,
        }
    }

    /// Raw pad bytes, for ceremony framing and token derivation only.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose pad bytes in debug output.
        f.debug_struct("Pad")
            .field("len", &self.bytes.len())
            .field("consumed_front", &self.consumed_front)
            .field("consumed_back", &self.consumed_back)
            .field("remaining", &self.remaining())
            .finish()
    }
}

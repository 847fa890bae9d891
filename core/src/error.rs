//! Error types for ash-core.
//!
//! # Error Categories
//!
//! - **Entropy**: `InsufficientEntropy`
//! - **Ceremony frames**: `FrameCorrupt`, `FrameMalformed`, `FrameIncompatible`, `EmptyPayload`
//! - **Metadata**: `MetadataMalformed`
//! - **Pad**: `PadExhausted`, `OutOfRange`, `AlreadyConsumedBySelf`, `InvalidState`
//! - **Messages**: `MessageTooLarge`, `ContentMalformed`, `AuthenticationFailed`, `KeySliceMismatch`

use thiserror::Error;

/// Result type alias for ash-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ash-core operations.
///
/// Variants carry the context needed for diagnostics; none of them ever
/// contain key material or pad bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // ==================== Entropy Errors ====================
    /// Not enough gesture entropy collected, or the OS randomness source
    /// was unavailable. The sampler refuses to produce a pad either way.
    #[error("insufficient entropy: collected {collected} of {required} required bytes")]
    InsufficientEntropy {
        /// Entropy bytes gathered so far.
        collected: usize,
        /// Minimum bytes required before sampling is allowed.
        required: usize,
    },

    // ==================== Ceremony Frame Errors ====================
    /// Frame CRC verification failed.
    ///
    /// Either the frame was corrupted in transit or it was masked with a
    /// different passphrase. A noisy channel is expected; callers drop these.
    #[error("frame CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    FrameCorrupt {
        /// CRC value carried by the frame.
        expected: u32,
        /// CRC computed over the received bytes.
        actual: u32,
    },

    /// Frame is truncated or internally inconsistent.
    #[error("frame malformed: {size} bytes, minimum is {minimum}")]
    FrameMalformed {
        /// Actual size in bytes.
        size: usize,
        /// Minimum required size.
        minimum: usize,
    },

    /// Frame parameters disagree with the stream being decoded.
    ///
    /// Emitted when version, coding method, block size or source block count
    /// do not match what the first accepted frame established.
    #[error("frame incompatible: {field} disagrees with the active stream")]
    FrameIncompatible {
        /// Name of the disagreeing header field.
        field: &'static str,
    },

    /// Ceremony payload cannot be empty.
    #[error("payload cannot be empty")]
    EmptyPayload,

    // ==================== Metadata Errors ====================
    /// Ceremony metadata failed to parse or validate.
    #[error("metadata malformed: {reason}")]
    MetadataMalformed {
        /// What failed.
        reason: &'static str,
    },

    // ==================== Pad Errors ====================
    /// Not enough unconsumed bytes remain in the pad.
    #[error("pad exhausted: needed {needed}, available {available}")]
    PadExhausted {
        /// Number of bytes requested.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// Requested range falls outside the pad.
    #[error("range out of pad bounds: offset {offset} len {len}, pad is {pad_len} bytes")]
    OutOfRange {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Total pad length.
        pad_len: usize,
    },

    /// Requested range overlaps the caller's own send region.
    ///
    /// Key material in the send region was consumed by this device and must
    /// never be handed out for decryption.
    #[error("range overlaps own send region: offset {offset} len {len}")]
    AlreadyConsumedBySelf {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        len: usize,
    },

    /// Operation attempted against a pad or session in an unusable state
    /// (wiped, burned, or violating the split-counter invariant).
    #[error("invalid pad state")]
    InvalidState,

    // ==================== Message Errors ====================
    /// Message payload exceeds the largest padding bucket.
    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Decrypted message content failed to parse.
    #[error("message content malformed")]
    ContentMalformed,

    /// AEAD verification failed.
    ///
    /// Intentionally uninformative: nothing about what specifically failed
    /// is leaked.
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Key slice length does not match what the operation requires.
    #[error("key slice mismatch: got {slice_len} bytes, operation requires {required}")]
    KeySliceMismatch {
        /// Length of the supplied slice.
        slice_len: usize,
        /// Length the operation requires.
        required: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = Error::PadExhausted {
            needed: 100,
            available: 50,
        };
        assert_eq!(err.to_string(), "pad exhausted: needed 100, available 50");

        let err = Error::FrameCorrupt {
            expected: 0xDEAD_BEEF,
            actual: 0xCAFE_BABE,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
        assert!(err.to_string().contains("0xcafebabe"));
    }

    #[test]
    fn error_implements_std_error() {
        let err = Error::EmptyPayload;
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn error_is_clone_and_eq() {
        let err1 = Error::FrameIncompatible { field: "method" };
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}

//! ASH Core - cryptographic core for secure ephemeral messaging.
//!
//! This crate implements the pieces both devices must agree on bit-exactly:
//!
//! - One-time pad sampling from user entropy ([`entropy`])
//! - Pad lifecycle with split directional consumption ([`pad`])
//! - The ceremony codec: fountain-coded QR frames carrying pad and
//!   metadata across the air gap ([`frame`], [`fountain`], [`ceremony`],
//!   [`metadata`])
//! - Session token and mnemonic derivation ([`tokens`], [`wordlist`])
//! - Per-message AEAD over pad key slices ([`message`])
//!
//! # Security Properties
//!
//! - Key material is fresh pad bytes, used exactly once
//! - Split consumption: the two roles can never use the same pad byte
//! - Spent and expired ranges are zeroed for forward secrecy
//! - Every derivation is deterministic, so two devices holding the same
//!   pad agree on ids, tokens and mnemonics without talking to each other
//!
//! # Constraints
//!
//! This crate intentionally does NOT:
//! - Access the network
//! - Perform file I/O
//! - Log anything
//! - Keep any global state
//!
//! Session orchestration, persistence and the relay client live in
//! `ash-client`, which drives this crate through capability ports.
//!
//! # Example: Ceremony and First Exchange
//!
//! ```
//! use ash_core::{
//!     ceremony::{CeremonyReceiver, CeremonyStream},
//!     message::{self, MessageContent},
//!     metadata::CeremonyMetadata,
//!     pad::{Pad, Role},
//!     tokens,
//! };
//!
//! // Initiator: a freshly sampled pad (the entropy module does this for
//! // real sessions) plus ceremony settings.
//! let pad_bytes: Vec<u8> = (0..16 * 1024).map(|i| (i % 251) as u8).collect();
//! let metadata = CeremonyMetadata::default();
//!
//! // Display side emits frames until the receiver completes.
//! let mut stream = CeremonyStream::with_defaults(&metadata, &pad_bytes, None).unwrap();
//! let mut receiver = CeremonyReceiver::new(None);
//! while !receiver.is_complete() {
//!     receiver.absorb(&stream.next_frame()).unwrap();
//! }
//! let payload = receiver.finish().unwrap();
//! assert_eq!(payload.pad, pad_bytes);
//!
//! // Both ends derive the same mnemonic and read it aloud.
//! assert_eq!(tokens::mnemonic(&pad_bytes), tokens::mnemonic(&payload.pad));
//!
//! // Initiator sends the first message.
//! let mut initiator = Pad::new(pad_bytes);
//! let mut responder = Pad::new(payload.pad);
//!
//! let plaintext =
//!     message::encode_plaintext(&MessageContent::Text("hello".into())).unwrap();
//! let slice = initiator
//!     .consume_for_sending(Role::Initiator, message::key_slice_len(plaintext.len()))
//!     .unwrap();
//! let ciphertext = message::seal(&plaintext, slice.bytes(), slice.offset()).unwrap();
//!
//! // Responder locates the key material by the sequence alone.
//! let key = responder
//!     .key_for_decryption(Role::Responder, slice.offset(), ciphertext.len())
//!     .unwrap();
//! let opened = message::open(&ciphertext, key.bytes(), slice.offset()).unwrap();
//! assert_eq!(
//!     message::decode_plaintext(&opened).unwrap(),
//!     MessageContent::Text("hello".into())
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ceremony;
pub mod entropy;
pub mod error;
pub mod fountain;
pub mod frame;
pub mod message;
pub mod metadata;
pub mod pad;
pub mod tokens;
pub mod wordlist;

pub use ceremony::{CeremonyPayload, CeremonyReceiver, CeremonyStream};
pub use error::{Error, Result};
pub use frame::{CodingMethod, Frame, DEFAULT_BLOCK_SIZE};
pub use message::MessageContent;
pub use metadata::{CeremonyMetadata, MetadataFlags};
pub use pad::{KeySlice, Pad, PadSize, Role};
pub use tokens::SessionTokens;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::key_slice_len;

    /// The whole ceremony-to-messaging path both devices walk.
    #[test]
    fn full_ceremony_and_bidirectional_messaging() {
        let pad_bytes: Vec<u8> = (0..32 * 1024).map(|i| (i * 7 % 253) as u8).collect();
        let metadata = CeremonyMetadata::new(
            600,
            0,
            MetadataFlags::default(),
            "https://relay.ash.test".to_string(),
        )
        .unwrap();

        // === Transfer over a lossy, duplicating channel ===
        let mut stream =
            CeremonyStream::new(&metadata, &pad_bytes, 512, Some("over voice"), CodingMethod::RaptorLt)
                .unwrap();
        let mut receiver = CeremonyReceiver::new(Some("over voice"));

        let mut i = 0u32;
        while !receiver.is_complete() {
            let frame = stream.next_frame();
            if i % 5 != 3 {
                receiver.absorb(&frame).unwrap();
            }
            if i % 4 == 0 {
                receiver.absorb(&frame).ok();
            }
            i += 1;
        }
        let payload = receiver.finish().unwrap();
        assert_eq!(payload.pad, pad_bytes);
        assert_eq!(payload.metadata, metadata);

        // === Both sides derive identical tokens ===
        let a = SessionTokens::derive(&pad_bytes);
        let b = SessionTokens::derive(&payload.pad);
        assert_eq!(a, b);
        assert_eq!(tokens::mnemonic(&pad_bytes), tokens::mnemonic(&payload.pad));

        // === Messaging in both directions ===
        let mut initiator = Pad::new(pad_bytes);
        let mut responder = Pad::new(payload.pad);

        // Initiator -> responder.
        let out = message::encode_plaintext(&MessageContent::Text("first".into())).unwrap();
        let slice = initiator
            .consume_for_sending(Role::Initiator, key_slice_len(out.len()))
            .unwrap();
        let seq = slice.offset();
        let ct = message::seal(&out, slice.bytes(), seq).unwrap();

        let key = responder
            .key_for_decryption(Role::Responder, seq, ct.len())
            .unwrap();
        let opened = message::open(&ct, key.bytes(), seq).unwrap();
        assert_eq!(
            message::decode_plaintext(&opened).unwrap(),
            MessageContent::Text("first".into())
        );
        responder
            .update_peer_consumption(Role::Responder, seq + ct.len() as u64)
            .unwrap();

        // Responder -> initiator.
        let back = message::encode_plaintext(&MessageContent::Location {
            latitude: 50.08,
            longitude: 14.43,
        })
        .unwrap();
        let slice = responder
            .consume_for_sending(Role::Responder, key_slice_len(back.len()))
            .unwrap();
        let seq = slice.offset();
        let ct = message::seal(&back, slice.bytes(), seq).unwrap();

        let key = initiator
            .key_for_decryption(Role::Initiator, seq, ct.len())
            .unwrap();
        let opened = message::open(&ct, key.bytes(), seq).unwrap();
        assert!(matches!(
            message::decode_plaintext(&opened).unwrap(),
            MessageContent::Location { .. }
        ));

        // Conservation held throughout.
        assert!(
            initiator.consumed_front() + initiator.consumed_back()
                <= initiator.len() as u64
        );
    }

    /// A tampered ciphertext must never decrypt.
    #[test]
    fn tampered_message_rejected() {
        let pad_bytes: Vec<u8> = (0..4096).map(|i| (i * 11 % 255) as u8).collect();
        let mut sender = Pad::new(pad_bytes.clone());
        let receiver = Pad::new(pad_bytes);

        let out = message::encode_plaintext(&MessageContent::Text("secret".into())).unwrap();
        let slice = sender
            .consume_for_sending(Role::Initiator, key_slice_len(out.len()))
            .unwrap();
        let mut ct = message::seal(&out, slice.bytes(), slice.offset()).unwrap();
        ct[5] ^= 0xFF;

        let key = receiver
            .key_for_decryption(Role::Responder, slice.offset(), ct.len())
            .unwrap();
        assert!(matches!(
            message::open(&ct, key.bytes(), slice.offset()),
            Err(Error::AuthenticationFailed)
        ));
    }
}

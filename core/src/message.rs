//! Per-message AEAD over pad key slices.
//!
//! Each message consumes `L + 16` pad bytes where `L` is the padded
//! plaintext length. The slice doubles as the entire keying material:
//!
//! ```text
//! slice[0..32]  ChaCha20-Poly1305 key
//! slice[32..44] 96-bit nonce
//! slice[44..]   folded over the Poly1305 tag as a mask
//! ```
//!
//! Every slice is fresh one-time-pad material used exactly once, so
//! deriving the AEAD key from it keeps OTP-level secrecy while adding
//! authenticated integrity. The associated data is the 8-byte little-endian
//! sequence (the absolute pad offset of the slice), which binds the
//! ciphertext to its key location.
//!
//! Plaintext pipeline before sealing:
//!
//! ```text
//! content -> [discriminator: u8][content bytes]          (encode_content)
//!         -> [true_len: u16 LE][payload][0x00 fill]      (pad_to_bucket)
//! ```
//!
//! Bucket padding is always on; observable ciphertext lengths are limited
//! to the bucket grid plus the tag.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// ChaCha20 key length.
pub const KEY_LEN: usize = 32;

/// AEAD nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// Shortest usable key slice: key, nonce and tag mask must fit.
pub const MIN_KEY_SLICE: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

/// Plaintext padding buckets in bytes.
pub const PADDING_BUCKETS: [usize; 7] = [128, 256, 512, 1024, 2048, 4096, 8192];

/// Bytes of the true-length prefix inside a padded bucket.
const LEN_PREFIX: usize = 2;

/// Largest content payload (discriminator byte included) that fits the
/// top bucket.
pub const MAX_PAYLOAD_LEN: usize = PADDING_BUCKETS[6] - LEN_PREFIX;

/// Content discriminator: UTF-8 text.
const CONTENT_TEXT: u8 = 0x01;

/// Content discriminator: one-shot geographic point.
const CONTENT_LOCATION: u8 = 0x02;

/// What a message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// UTF-8 text.
    Text(String),
    /// A single geographic point.
    Location {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
}

impl MessageContent {
    /// Serialize to the discriminated payload form.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` if the payload exceeds the top padding bucket.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            MessageContent::Text(text) => {
                let mut bytes = Vec::with_capacity(1 + text.len());
                bytes.push(CONTENT_TEXT);
                bytes.extend_from_slice(text.as_bytes());
                bytes
            }
            MessageContent::Location {
                latitude,
                longitude,
            } => {
                let mut bytes = Vec::with_capacity(1 + 16);
                bytes.push(CONTENT_LOCATION);
                bytes.extend_from_slice(&latitude.to_le_bytes());
                bytes.extend_from_slice(&longitude.to_le_bytes());
                bytes
            }
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(payload)
    }

    /// Parse the discriminated payload form.
    ///
    /// # Errors
    ///
    /// `ContentMalformed` on an empty payload, unknown discriminator,
    /// invalid UTF-8 or a wrong-sized location body.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (&discriminator, body) = payload.split_first().ok_or(Error::ContentMalformed)?;
        match discriminator {
            CONTENT_TEXT => {
                let text =
                    std::str::from_utf8(body).map_err(|_| Error::ContentMalformed)?;
                Ok(MessageContent::Text(text.to_string()))
            }
            CONTENT_LOCATION => {
                if body.len() != 16 {
                    return Err(Error::ContentMalformed);
                }
                let latitude = f64::from_le_bytes(
                    body[..8].try_into().expect("length checked above"),
                );
                let longitude = f64::from_le_bytes(
                    body[8..].try_into().expect("length checked above"),
                );
                Ok(MessageContent::Location {
                    latitude,
                    longitude,
                })
            }
            _ => Err(Error::ContentMalformed),
        }
    }
}

/// The bucket a payload of `payload_len` bytes pads into.
///
/// # Errors
///
/// `MessageTooLarge` if no bucket fits.
pub fn bucket_len(payload_len: usize) -> Result<usize> {
    PADDING_BUCKETS
        .iter()
        .copied()
        .find(|&bucket| bucket >= payload_len + LEN_PREFIX)
        .ok_or(Error::MessageTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_LEN,
        })
}

/// Right-pad `payload` to its bucket with a true-length prefix.
pub fn pad_to_bucket(payload: &[u8]) -> Result<Vec<u8>> {
    let bucket = bucket_len(payload.len())?;
    let mut padded = Vec::with_capacity(bucket);
    padded.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    padded.extend_from_slice(payload);
    padded.resize(bucket, 0);
    Ok(padded)
}

/// Strip bucket padding, returning the true payload.
///
/// # Errors
///
/// `ContentMalformed` if the length prefix is inconsistent.
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < LEN_PREFIX {
        return Err(Error::ContentMalformed);
    }
    let true_len = u16::from_le_bytes([padded[0], padded[1]]) as usize;
    if LEN_PREFIX + true_len > padded.len() {
        return Err(Error::ContentMalformed);
    }
    Ok(padded[LEN_PREFIX..LEN_PREFIX + true_len].to_vec())
}

/// Content → padded plaintext ready for [`seal`].
pub fn encode_plaintext(content: &MessageContent) -> Result<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(pad_to_bucket(&content.encode()?)?))
}

/// Padded plaintext from [`open`] → content.
pub fn decode_plaintext(padded: &[u8]) -> Result<MessageContent> {
    MessageContent::decode(&unpad(padded)?)
}

/// Pad bytes consumed by a plaintext of `plaintext_len` bytes.
pub const fn key_slice_len(plaintext_len: usize) -> usize {
    plaintext_len + TAG_LEN
}

/// Encrypt `plaintext` under a fresh key slice.
///
/// The ciphertext is exactly as long as the slice; `sequence` is bound as
/// associated data and must be the slice's absolute pad offset.
///
/// # Errors
///
/// `KeySliceMismatch` if the slice length is not `plaintext + 16` bytes or
/// is too short to carry key, nonce and mask.
pub fn seal(plaintext: &[u8], key_slice: &[u8], sequence: u64) -> Result<Vec<u8>> {
    let required = key_slice_len(plaintext.len());
    if key_slice.len() != required || key_slice.len() < MIN_KEY_SLICE {
        return Err(Error::KeySliceMismatch {
            slice_len: key_slice.len(),
            required: required.max(MIN_KEY_SLICE),
        });
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_slice[..KEY_LEN]));
    let nonce = Nonce::from_slice(&key_slice[KEY_LEN..KEY_LEN + NONCE_LEN]);

    let mut ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &sequence.to_le_bytes(),
            },
        )
        .map_err(|_| Error::AuthenticationFailed)?;

    fold_mask(&mut ciphertext, &key_slice[MIN_KEY_SLICE - TAG_LEN..]);
    Ok(ciphertext)
}

/// Decrypt a ciphertext with the key slice located by its sequence.
///
/// # Errors
///
/// - `KeySliceMismatch` if the slice does not match the ciphertext length.
/// - `AuthenticationFailed` if any bit of the ciphertext, the slice or the
///   sequence is wrong.
pub fn open(ciphertext: &[u8], key_slice: &[u8], sequence: u64) -> Result<Vec<u8>> {
    if key_slice.len() != ciphertext.len() || key_slice.len() < MIN_KEY_SLICE {
        return Err(Error::KeySliceMismatch {
            slice_len: key_slice.len(),
            required: ciphertext.len().max(MIN_KEY_SLICE),
        });
    }

    let mut unmasked = ciphertext.to_vec();
    fold_mask(&mut unmasked, &key_slice[MIN_KEY_SLICE - TAG_LEN..]);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_slice[..KEY_LEN]));
    let nonce = Nonce::from_slice(&key_slice[KEY_LEN..KEY_LEN + NONCE_LEN]);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &unmasked,
                aad: &sequence.to_le_bytes(),
            },
        )
        .map_err(|_| Error::AuthenticationFailed)
}

/// XOR the remaining slice bytes cyclically over the trailing tag.
///
/// An involution: applying it twice restores the input.
fn fold_mask(ciphertext: &mut [u8], mask: &[u8]) {
    let tag_start = ciphertext.len() - TAG_LEN;
    for (i, byte) in mask.iter().enumerate() {
        ciphertext[tag_start + (i % TAG_LEN)] ^= byte;
    }
}

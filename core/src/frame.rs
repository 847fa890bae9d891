//! QR frame wire format for the ceremony.
//!
//! Every QR code carries one coded block wrapped in this little-endian
//! layout:
//!
//! ```text
//! [version: u8][method: u8][block_size: u16][source_block_count: u32]
//! [seed: u32][payload_len: u32][payload][crc32: u32]
//! ```
//!
//! The CRC-32 (polynomial 0xEDB88320) is always computed over the plaintext
//! frame from `version` through `payload`. When a passphrase is set, those
//! same bytes are XOR-masked with a keystream derived from the passphrase
//! and the frame seed; the CRC stays in the clear. A receiver unmasks first
//! and then checks the CRC, so a wrong passphrase shows up as a CRC failure
//! on virtually every frame.
//!
//! Frames travel base64-url encoded inside QR codes (error correction
//! level L).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Frame format version.
pub const FRAME_VERSION: u8 = 1;

/// Header length in bytes.
pub const FRAME_HEADER_LEN: usize = 16;

/// Trailing CRC length in bytes.
pub const FRAME_CRC_LEN: usize = 4;

/// Smallest parseable frame: header, one payload byte, CRC.
pub const MIN_FRAME_LEN: usize = FRAME_HEADER_LEN + 1 + FRAME_CRC_LEN;

/// Default coded block size in bytes.
///
/// 1500 payload + 16 header + 4 CRC = 1520 bytes, base64 ≈ 2027 characters,
/// comfortably inside the 2900-character budget of a level-L QR code.
pub const DEFAULT_BLOCK_SIZE: usize = 1500;

/// Largest accepted block size.
///
/// Caps the masking keystream (header + payload) under the 8160-byte output
/// bound of a single HKDF-Expand invocation.
pub const MAX_BLOCK_SIZE: usize = 8128;

/// HKDF salt for passphrase frame keys.
pub const FRAME_KEY_SALT: &[u8] = b"ash/qr-frame/v1";

/// Erasure coding strategy announced in each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CodingMethod {
    /// Rateless fountain coding; any sufficient frame subset decodes.
    #[default]
    RaptorLt = 0x01,
    /// Plain cycling through source blocks; every block must be seen.
    PlainRepeat = 0x02,
}

impl CodingMethod {
    /// Parse the wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::RaptorLt),
            0x02 => Some(Self::PlainRepeat),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// One coded block with its stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Coding strategy of the stream.
    pub method: CodingMethod,
    /// Coded block size in bytes; identical for every frame of a stream.
    pub block_size: u16,
    /// Number of source blocks `K` in the stream.
    pub source_block_count: u32,
    /// Seed identifying this coded block.
    pub seed: u32,
    /// The coded block.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialized length.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len() + FRAME_CRC_LEN
    }

    /// Serialize, masking with `passphrase` when given.
    pub fn encode(&self, passphrase: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(FRAME_VERSION);
        buf.push(self.method.to_byte());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.source_block_count.to_le_bytes());
        buf.extend_from_slice(&self.seed.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&buf);
        if let Some(pass) = passphrase {
            apply_mask(&mut buf, pass, self.seed);
        }
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse a received frame, unmasking with `passphrase` when given.
    ///
    /// # Errors
    ///
    /// - `FrameMalformed` if the frame is truncated, oversized or
    ///   internally inconsistent.
    /// - `FrameCorrupt` if the CRC does not verify (corruption in transit
    ///   or a wrong passphrase).
    /// - `FrameIncompatible` for an unknown version or coding method.
    pub fn decode(bytes: &[u8], passphrase: Option<&str>) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(Error::FrameMalformed {
                size: bytes.len(),
                minimum: MIN_FRAME_LEN,
            });
        }
        if bytes.len() > FRAME_HEADER_LEN + MAX_BLOCK_SIZE + FRAME_CRC_LEN {
            return Err(Error::FrameMalformed {
                size: bytes.len(),
                minimum: MIN_FRAME_LEN,
            });
        }

        let body_len = bytes.len() - FRAME_CRC_LEN;
        let expected = u32::from_le_bytes(
            bytes[body_len..]
                .try_into()
                .expect("CRC length already validated"),
        );

        let mut body = bytes[..body_len].to_vec();
        if let Some(pass) = passphrase {
            // The keystream is keyed by the seed, so the seed field itself is
            // never masked (see apply_mask) and can be read here directly.
            let seed = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
            apply_mask(&mut body, pass, seed);
        }

        let actual = crc32fast::hash(&body);
        if actual != expected {
            return Err(Error::FrameCorrupt { expected, actual });
        }

        let version = body[0];
        if version != FRAME_VERSION {
            return Err(Error::FrameIncompatible { field: "version" });
        }
        let method =
            CodingMethod::from_byte(body[1]).ok_or(Error::FrameIncompatible { field: "method" })?;
        let block_size = u16::from_le_bytes([body[2], body[3]]);
        let source_block_count = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        let seed = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
        let payload_len = u32::from_le_bytes([body[12], body[13], body[14], body[15]]) as usize;

        let payload = &body[FRAME_HEADER_LEN..];
        if payload_len != payload.len() || payload_len != block_size as usize {
            return Err(Error::FrameMalformed {
                size: bytes.len(),
                minimum: FRAME_HEADER_LEN + block_size as usize + FRAME_CRC_LEN,
            });
        }
        if source_block_count == 0 {
            return Err(Error::FrameMalformed {
                size: bytes.len(),
                minimum: MIN_FRAME_LEN,
            });
        }

        Ok(Self {
            method,
            block_size,
            source_block_count,
            seed,
            payload: payload.to_vec(),
        })
    }

    /// Serialize to the base64-url text placed inside a QR code.
    pub fn to_qr_text(&self, passphrase: Option<&str>) -> String {
        URL_SAFE_NO_PAD.encode(self.encode(passphrase))
    }

    /// Parse from QR text.
    pub fn from_qr_text(text: &str, passphrase: Option<&str>) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|_| Error::FrameMalformed {
                size: text.len(),
                minimum: MIN_FRAME_LEN,
            })?;
        Self::decode(&bytes, passphrase)
    }
}

/// XOR the passphrase keystream over the frame bytes before the CRC.
///
/// The keystream never covers the 4 seed bytes at offsets 8..12, so the
/// receiver can read the seed and derive the same keystream.
fn apply_mask(body: &mut [u8], passphrase: &str, seed: u32) {
    let hk = Hkdf::<Sha256>::new(Some(FRAME_KEY_SALT), passphrase.as_bytes());
    let mut keystream = Zeroizing::new(vec![0u8; body.len()]);
    hk.expand(&seed.to_le_bytes(), keystream.as_mut_slice())
        .expect("frame length is within the HKDF-Expand output bound");

    for (i, byte) in body.iter_mut().enumerate() {
        if !(8..12).contains(&i) {
            *byte ^= keystream[i];
        }
    }
}

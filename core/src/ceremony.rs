//! Ceremony payload framing: pad and metadata across the air gap.
//!
//! The displayed stream carries one opaque payload:
//!
//! ```text
//! [pad_len: u32 LE][pad bytes][metadata record][zero fill to the block grid]
//! ```
//!
//! The metadata record is self-delimiting (its URL length field is at a
//! fixed offset), so the receiver recovers the pad length from the prefix,
//! parses the metadata right after the pad, and ignores the zero fill.
//!
//! [`CeremonyStream`] is the display side: an unbounded lazy sequence of
//! wire frames. [`CeremonyReceiver`] is the camera side: feed it scanned
//! frames in any order until it completes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::fountain::{BlockDecoder, BlockEncoder};
use crate::frame::{CodingMethod, Frame, DEFAULT_BLOCK_SIZE, MIN_FRAME_LEN};
use crate::metadata::CeremonyMetadata;

/// Length of the pad-length prefix inside the payload.
const PAD_LEN_PREFIX: usize = 4;

/// Display-side frame stream for a ceremony.
///
/// Frames are generated lazily and indefinitely; the display cycles until
/// the receiver signals completion out-of-band (a tap, typically).
pub struct CeremonyStream {
    encoder: BlockEncoder,
    passphrase: Option<String>,
    payload_len: usize,
    next_seed: u32,
}

impl CeremonyStream {
    /// Build the stream for `pad` plus `metadata`.
    ///
    /// # Errors
    ///
    /// `EmptyPayload` if `pad` is empty.
    pub fn new(
        metadata: &CeremonyMetadata,
        pad: &[u8],
        block_size: usize,
        passphrase: Option<&str>,
        method: CodingMethod,
    ) -> Result<Self> {
        if pad.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let metadata_bytes = metadata.encode();
        let mut payload =
            Vec::with_capacity(PAD_LEN_PREFIX + pad.len() + metadata_bytes.len());
        payload.extend_from_slice(&(pad.len() as u32).to_le_bytes());
        payload.extend_from_slice(pad);
        payload.extend_from_slice(&metadata_bytes);

        let payload_len = payload.len();
        let encoder = BlockEncoder::new(method, &payload, block_size)?;

        Ok(Self {
            encoder,
            passphrase: passphrase.map(String::from),
            payload_len,
            next_seed: 0,
        })
    }

    /// Build the stream with the default block size.
    pub fn with_defaults(
        metadata: &CeremonyMetadata,
        pad: &[u8],
        passphrase: Option<&str>,
    ) -> Result<Self> {
        Self::new(
            metadata,
            pad,
            DEFAULT_BLOCK_SIZE,
            passphrase,
            CodingMethod::RaptorLt,
        )
    }

    /// The next wire frame. Can be called forever.
    pub fn next_frame(&mut self) -> Vec<u8> {
        let frame = self.frame_at(self.next_seed);
        self.next_seed = self.next_seed.wrapping_add(1);
        frame
    }

    /// The wire frame for a specific seed; deterministic, so two devices
    /// rendering the same stream show identical frames.
    pub fn frame_at(&self, seed: u32) -> Vec<u8> {
        Frame {
            method: self.encoder.method(),
            block_size: self.encoder.block_size() as u16,
            source_block_count: self.encoder.source_count() as u32,
            seed,
            payload: self.encoder.block(seed),
        }
        .encode(self.passphrase.as_deref())
    }

    /// The next frame as QR text.
    pub fn next_qr_text(&mut self) -> String {
        URL_SAFE_NO_PAD.encode(self.next_frame())
    }

    /// Number of source blocks `K` (the decode lower bound).
    pub fn source_count(&self) -> usize {
        self.encoder.source_count()
    }

    /// Coded block size in bytes.
    pub fn block_size(&self) -> usize {
        self.encoder.block_size()
    }

    /// Coding method of the stream.
    pub fn method(&self) -> CodingMethod {
        self.encoder.method()
    }

    /// Total payload length being transferred (prefix + pad + metadata).
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }
}

/// Decoded ceremony result.
#[derive(Debug)]
pub struct CeremonyPayload {
    /// Settings the initiator chose.
    pub metadata: CeremonyMetadata,
    /// The reconstructed pad. Callers install it and drop this struct
    /// promptly; the session layer zeroizes its copy.
    pub pad: Vec<u8>,
}

/// Camera-side decoder for a ceremony stream.
///
/// Stream parameters are learned from the first accepted frame; later
/// frames that disagree are rejected as incompatible and should be dropped
/// by the caller (a neighbouring display, usually).
pub struct CeremonyReceiver {
    passphrase: Option<String>,
    decoder: Option<BlockDecoder>,
    expected: Option<(CodingMethod, u16, u32)>,
    frames_absorbed: usize,
}

impl CeremonyReceiver {
    /// Create a receiver; `passphrase` must match the display side when the
    /// stream is masked.
    pub fn new(passphrase: Option<&str>) -> Self {
        Self {
            passphrase: passphrase.map(String::from),
            decoder: None,
            expected: None,
            frames_absorbed: 0,
        }
    }

    /// Absorb one scanned wire frame.
    ///
    /// Returns `Ok(true)` once the payload is fully reconstructed.
    ///
    /// # Errors
    ///
    /// - `FrameCorrupt` / `FrameMalformed` for damaged scans — drop and
    ///   keep scanning; a noisy channel is expected.
    /// - `FrameIncompatible` if the frame belongs to a different stream.
    pub fn absorb(&mut self, wire: &[u8]) -> Result<bool> {
        let frame = Frame::decode(wire, self.passphrase.as_deref())?;

        let params = (frame.method, frame.block_size, frame.source_block_count);
        match self.expected {
            None => {
                self.expected = Some(params);
                self.decoder = Some(BlockDecoder::new(
                    frame.method,
                    frame.source_block_count as usize,
                    frame.block_size as usize,
                ));
            }
            Some(expected) if expected != params => {
                let field = if expected.0 != params.0 {
                    "method"
                } else if expected.1 != params.1 {
                    "block_size"
                } else {
                    "source_block_count"
                };
                return Err(Error::FrameIncompatible { field });
            }
            Some(_) => {}
        }

        let decoder = self.decoder.as_mut().expect("decoder initialized above");
        self.frames_absorbed += 1;
        Ok(decoder.absorb(frame.seed, &frame.payload))
    }

    /// Absorb a frame scanned as QR text.
    pub fn absorb_qr_text(&mut self, text: &str) -> Result<bool> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|_| Error::FrameMalformed {
                size: text.len(),
                minimum: MIN_FRAME_LEN,
            })?;
        self.absorb(&bytes)
    }

    /// Whether the payload is fully reconstructed.
    pub fn is_complete(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| d.is_complete())
    }

    /// Decode progress in `[0, 1]`: solved source blocks over `K`.
    pub fn progress(&self) -> f64 {
        self.decoder.as_ref().map_or(0.0, |d| d.progress())
    }

    /// Source block count `K`, or 0 before the first accepted frame.
    pub fn source_count(&self) -> usize {
        self.decoder.as_ref().map_or(0, |d| d.source_count())
    }

    /// Frames absorbed, duplicates included.
    pub fn frames_absorbed(&self) -> usize {
        self.frames_absorbed
    }

    /// Distinct coded blocks absorbed.
    pub fn unique_frames(&self) -> usize {
        self.decoder.as_ref().map_or(0, |d| d.unique_seeds())
    }

    /// Reassemble and parse the payload.
    ///
    /// # Errors
    ///
    /// - `InvalidState` while incomplete.
    /// - `MetadataMalformed` if the reconstructed payload does not parse
    ///   (which indicates a corrupted stream that still passed per-frame
    ///   CRCs — effectively unreachable, but never a panic).
    pub fn finish(&self) -> Result<CeremonyPayload> {
        let decoder = self.decoder.as_ref().ok_or(Error::InvalidState)?;
        let data = decoder.assemble().ok_or(Error::InvalidState)?;

        if data.len() < PAD_LEN_PREFIX {
            return Err(Error::MetadataMalformed {
                reason: "payload shorter than its prefix",
            });
        }
        let pad_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let pad_end = PAD_LEN_PREFIX + pad_len;
        if pad_len == 0 || data.len() < pad_end {
            return Err(Error::MetadataMalformed {
                reason: "pad length prefix out of range",
            });
        }

        let (metadata, _) = CeremonyMetadata::decode(&data[pad_end..])?;
        let pad = data[PAD_LEN_PREFIX..pad_end].to_vec();

        Ok(CeremonyPayload { metadata, pad })
    }
}

//! Pad sampling from user gesture entropy.
//!
//! A fresh pad is derived from two inputs mixed through HKDF:
//!
//! - gesture observations `(x, y, t)` collected while the user drags on the
//!   entropy canvas (at least 500 points, three bytes each), and
//! - a 32-byte snapshot from the operating system CSPRNG.
//!
//! The sampler refuses to produce a pad if either input is unavailable.
//! Extraction uses the fixed salt `ash/pad-extract/v1`; expansion uses the
//! info label `ash/pad/v1` with a chunk counter appended, because a single
//! HKDF-Expand invocation caps at 8160 output bytes while pads reach 4 MiB.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// HKDF-Extract salt for pad sampling.
pub const PAD_EXTRACT_SALT: &[u8] = b"ash/pad-extract/v1";

/// HKDF-Expand info label for pad sampling.
pub const PAD_EXPAND_INFO: &[u8] = b"ash/pad/v1";

/// Minimum gesture observations before sampling is allowed.
pub const MIN_SAMPLES: usize = 500;

/// Bytes contributed per gesture observation.
pub const SAMPLE_BYTES: usize = 3;

/// Minimum gesture bytes before sampling is allowed.
pub const MIN_ENTROPY_BYTES: usize = MIN_SAMPLES * SAMPLE_BYTES;

/// Smallest pad the sampler will produce (16 KiB).
pub const MIN_PAD_BYTES: usize = 16 * 1024;

/// Largest pad the sampler will produce (4 MiB).
pub const MAX_PAD_BYTES: usize = 4 * 1024 * 1024;

/// Bytes taken from the OS CSPRNG and mixed into the extractor.
const SYSTEM_ENTROPY_BYTES: usize = 32;

/// One HKDF-Expand invocation outputs at most 255 * 32 bytes; pads are
/// expanded in fixed chunks well under that limit.
const EXPAND_CHUNK: usize = 4096;

/// Accumulates gesture observations from the entropy canvas.
///
/// Each observation contributes three bytes (the low byte of each
/// coordinate and of the timestamp); the extractor does the whitening, so
/// no per-sample conditioning happens here.
///
/// # Example
///
/// ```
/// use ash_core::entropy::{GesturePool, MIN_SAMPLES};
///
/// let mut pool = GesturePool::new();
/// for i in 0..MIN_SAMPLES as u64 {
///     pool.push_sample((i * 7) as u16, (i * 13) as u16, i * 16);
/// }
/// assert!(pool.is_saturated());
/// ```
pub struct GesturePool {
    bytes: Zeroizing<Vec<u8>>,
    samples: usize,
}

impl Default for GesturePool {
    fn default() -> Self {
        Self::new()
    }
}

impl GesturePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            bytes: Zeroizing::new(Vec::with_capacity(MIN_ENTROPY_BYTES)),
            samples: 0,
        }
    }

    /// Record one drag observation.
    pub fn push_sample(&mut self, x: u16, y: u16, t_millis: u64) {
        self.bytes.push((x ^ (x >> 8)) as u8);
        self.bytes.push((y ^ (y >> 8)) as u8);
        self.bytes.push(t_millis as u8);
        self.samples += 1;
    }

    /// Number of observations recorded so far.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Entropy bytes gathered so far.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Collection progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        (self.samples as f64 / MIN_SAMPLES as f64).min(1.0)
    }

    /// Whether enough observations have been gathered to sample a pad.
    pub fn is_saturated(&self) -> bool {
        self.samples >= MIN_SAMPLES
    }

    /// Sample a pad of exactly `pad_len` bytes.
    ///
    /// # Errors
    ///
    /// - `InsufficientEntropy` if the pool is not saturated or the OS
    ///   CSPRNG is unavailable.
    /// - `OutOfRange` if `pad_len` falls outside the supported pad sizes.
    pub fn sample_pad(&self, pad_len: usize) -> Result<Vec<u8>> {
        if !self.is_saturated() {
            return Err(Error::InsufficientEntropy {
                collected: self.bytes.len(),
                required: MIN_ENTROPY_BYTES,
            });
        }
        if !(MIN_PAD_BYTES..=MAX_PAD_BYTES).contains(&pad_len) {
            return Err(Error::OutOfRange {
                offset: 0,
                len: pad_len,
                pad_len: MAX_PAD_BYTES,
            });
        }

        let mut system = Zeroizing::new([0u8; SYSTEM_ENTROPY_BYTES]);
        OsRng
            .try_fill_bytes(system.as_mut())
            .map_err(|_| Error::InsufficientEntropy {
                collected: self.bytes.len(),
                required: MIN_ENTROPY_BYTES,
            })?;

        Ok(expand_pad(&self.bytes, system.as_ref(), pad_len))
    }
}

impl std::fmt::Debug for GesturePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the gathered bytes.
        f.debug_struct("GesturePool")
            .field("samples", &self.samples)
            .field("saturated", &self.is_saturated())
            .finish()
    }
}

/// HKDF-Extract then chunked HKDF-Expand to exactly `pad_len` bytes.
fn expand_pad(gesture: &[u8], system: &[u8], pad_len: usize) -> Vec<u8> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(gesture.len() + system.len()));
    ikm.extend_from_slice(gesture);
    ikm.extend_from_slice(system);

    let hk = Hkdf::<Sha256>::new(Some(PAD_EXTRACT_SALT), &ikm);

    let mut pad = vec![0u8; pad_len];
    let mut info = Vec::with_capacity(PAD_EXPAND_INFO.len() + 4);
    for (chunk_index, chunk) in pad.chunks_mut(EXPAND_CHUNK).enumerate() {
        info.clear();
        info.extend_from_slice(PAD_EXPAND_INFO);
        info.extend_from_slice(&(chunk_index as u32).to_le_bytes());
        hk.expand(&info, chunk)
            .expect("chunk length is within the HKDF-Expand output bound");
    }
    pad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saturated_pool() -> GesturePool {
        let mut pool = GesturePool::new();
        for i in 0..MIN_SAMPLES as u64 {
            pool.push_sample((i * 31) as u16, (i * 17) as u16, i * 12 + 3);
        }
        pool
    }

    #[test]
    fn pool_tracks_samples_and_bytes() {
        let mut pool = GesturePool::new();
        assert_eq!(pool.samples(), 0);
        assert!(!pool.is_saturated());

        pool.push_sample(10, 20, 30);
        assert_eq!(pool.samples(), 1);
        assert_eq!(pool.byte_len(), SAMPLE_BYTES);
    }

    #[test]
    fn unsaturated_pool_refuses_to_sample() {
        let mut pool = GesturePool::new();
        pool.push_sample(1, 2, 3);

        let result = pool.sample_pad(MIN_PAD_BYTES);
        assert!(matches!(result, Err(Error::InsufficientEntropy { .. })));
    }

    #[test]
    fn sample_produces_requested_length() {
        let pool = saturated_pool();
        let pad = pool.sample_pad(MIN_PAD_BYTES).unwrap();
        assert_eq!(pad.len(), MIN_PAD_BYTES);
    }

    #[test]
    fn sample_rejects_out_of_range_sizes() {
        let pool = saturated_pool();
        assert!(pool.sample_pad(1024).is_err());
        assert!(pool.sample_pad(MAX_PAD_BYTES + 1).is_err());
    }

    #[test]
    fn expansion_is_deterministic_for_fixed_inputs() {
        let gesture = vec![0xA5u8; MIN_ENTROPY_BYTES];
        let system = [0x5Au8; 32];

        let a = expand_pad(&gesture, &system, 32 * 1024);
        let b = expand_pad(&gesture, &system, 32 * 1024);
        assert_eq!(a, b);
    }

    #[test]
    fn expansion_chunks_are_independent_of_total_length() {
        // A longer pad must start with the same bytes as a shorter one.
        let gesture = vec![0x11u8; MIN_ENTROPY_BYTES];
        let system = [0x22u8; 32];

        let short = expand_pad(&gesture, &system, EXPAND_CHUNK);
        let long = expand_pad(&gesture, &system, EXPAND_CHUNK * 3);
        assert_eq!(short[..], long[..EXPAND_CHUNK]);
    }

    #[test]
    fn different_inputs_diverge() {
        let gesture = vec![0x11u8; MIN_ENTROPY_BYTES];
        let mut other = gesture.clone();
        other[100] ^= 0x01;
        let system = [0u8; 32];

        let a = expand_pad(&gesture, &system, 1024);
        let b = expand_pad(&other, &system, 1024);
        assert_ne!(a, b);
    }

    #[test]
    fn system_entropy_contributes() {
        let gesture = vec![0x11u8; MIN_ENTROPY_BYTES];
        let a = expand_pad(&gesture, &[0u8; 32], 1024);
        let b = expand_pad(&gesture, &[1u8; 32], 1024);
        assert_ne!(a, b);
    }

    #[test]
    fn sampled_pads_are_not_identical_across_calls() {
        // The OS CSPRNG snapshot differs per call.
        let pool = saturated_pool();
        let a = pool.sample_pad(MIN_PAD_BYTES).unwrap();
        let b = pool.sample_pad(MIN_PAD_BYTES).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_hides_bytes() {
        let pool = saturated_pool();
        let debug = format!("{pool:?}");
        assert!(debug.contains("samples"));
        assert!(!debug.contains("bytes"));
    }
}

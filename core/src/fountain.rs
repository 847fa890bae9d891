//! Rateless block coding for ceremony transfer.
//!
//! The display side emits an unbounded stream of coded blocks; the camera
//! side reconstructs the payload from any sufficient subset, in any order,
//! with duplicates and losses tolerated.
//!
//! The `RaptorLt` stream is deterministic and systematic:
//!
//! - seeds `0..K` are the source blocks themselves,
//! - the next `P = ceil(K * 0.05) + 3` seeds are pre-coded parity blocks,
//!   each the XOR of about `K/4` sources chosen by a seed-keyed PRNG,
//! - every later seed is a repair block: the XOR of a pseudo-random subset
//!   of the `K + P` combined symbols, with the subset size drawn from a
//!   soliton-style degree table.
//!
//! Both ends derive identical equations from a seed alone, so the decoder
//! is a classic peeling decoder: reduce every incoming equation against the
//! solved symbols, solve singletons, and propagate. The parity structure
//! joins the same loop as zero-valued equations linking each parity symbol
//! to its sources, which lets parity repair stuck sources and sources
//! unlock stuck repairs.
//!
//! `PlainRepeat` carries source block `seed mod K` with no coding at all.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::frame::{CodingMethod, MAX_BLOCK_SIZE};

/// Seed domain for the parity pre-code PRNG, so parity equations never
/// collide with repair equations derived from small seeds.
const PARITY_SEED_BASE: u64 = 0x70AD_5EED_0000_0000;

/// Number of pre-coded parity blocks for `k` source blocks.
///
/// Both ends must agree on this formula; it is part of the stream format.
pub fn parity_count(k: usize) -> usize {
    (k as f64 * 0.05).ceil() as usize + 3
}

/// Deterministic PRNG driving equation selection.
///
/// splitmix64 seed scramble feeding an xorshift* generator; quality only
/// matters for decoding overhead, not security.
struct SeedRng {
    state: u64,
}

impl SeedRng {
    fn new(seed: u64) -> Self {
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        if z == 0 {
            z = 0x6A09_E667_F3BC_C909;
        }
        Self { state: z }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        self.state.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Soliton-style degree table for repair blocks.
///
/// Weighted towards degree 2 and 3 (what drives peeling), with a small
/// degree-1 share to bootstrap and a heavy tail to cover stragglers.
fn sample_degree(rng: &mut SeedRng, symbols: usize) -> usize {
    if symbols <= 2 {
        return 1;
    }
    let r = rng.next_f64();
    if r < 0.06 {
        1
    } else if r < 0.47 {
        2
    } else if r < 0.77 {
        3
    } else if r < 0.91 {
        4
    } else if r < 0.98 {
        (symbols / 4).clamp(5, 12)
    } else {
        (symbols / 2).clamp(12, 24)
    }
}

/// Choose `count` distinct indices in `[0, n)`, PRF-seeded Fisher-Yates.
fn pick_distinct(rng: &mut SeedRng, n: usize, count: usize) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..n).collect();
    let take = count.min(n);
    let mut picked = Vec::with_capacity(take);
    for _ in 0..take {
        let i = rng.pick(pool.len());
        picked.push(pool.swap_remove(i));
    }
    picked
}

/// Source indices XORed into parity block `index`. Frozen stream format.
fn parity_sources(index: usize, k: usize) -> Vec<usize> {
    let mut rng = SeedRng::new(PARITY_SEED_BASE | index as u64);
    let degree = (k / 4).max(2).min(k);
    pick_distinct(&mut rng, k, degree)
}

/// Combined-space symbol indices XORed into the coded block for `seed`.
fn equation_for_seed(method: CodingMethod, seed: u32, k: usize) -> Vec<usize> {
    match method {
        CodingMethod::PlainRepeat => vec![seed as usize % k],
        CodingMethod::RaptorLt => {
            let s = seed as usize;
            let p = parity_count(k);
            if s < k + p {
                // Systematic source block or a parity block: the symbol itself.
                vec![s]
            } else {
                let mut rng = SeedRng::new(u64::from(seed));
                let degree = sample_degree(&mut rng, k + p);
                pick_distinct(&mut rng, k + p, degree)
            }
        }
    }
}

#[inline]
fn xor_into(dest: &mut [u8], src: &[u8]) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Generates coded blocks for a payload. Deterministic: the same seed
/// always yields the same block on every device.
pub struct BlockEncoder {
    method: CodingMethod,
    block_size: usize,
    source: Vec<Vec<u8>>,
    parity: Vec<Vec<u8>>,
}

impl BlockEncoder {
    /// Split `data` into `block_size` source blocks (the last zero-padded)
    /// and pre-compute the parity layer.
    ///
    /// # Errors
    ///
    /// `EmptyPayload` if `data` is empty.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or above [`MAX_BLOCK_SIZE`] (caller
    /// bug; ceremony streams validate their configuration).
    pub fn new(method: CodingMethod, data: &[u8], block_size: usize) -> Result<Self> {
        assert!(
            (1..=MAX_BLOCK_SIZE).contains(&block_size),
            "block_size out of range"
        );
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let k = data.len().div_ceil(block_size);
        let mut source = Vec::with_capacity(k);
        for chunk in data.chunks(block_size) {
            let mut block = chunk.to_vec();
            block.resize(block_size, 0);
            source.push(block);
        }

        let parity = match method {
            CodingMethod::PlainRepeat => Vec::new(),
            CodingMethod::RaptorLt => {
                let p = parity_count(k);
                (0..p)
                    .map(|i| {
                        let mut block = vec![0u8; block_size];
                        for src in parity_sources(i, k) {
                            xor_into(&mut block, &source[src]);
                        }
                        block
                    })
                    .collect()
            }
        };

        Ok(Self {
            method,
            block_size,
            source,
            parity,
        })
    }

    /// Number of source blocks `K`.
    pub fn source_count(&self) -> usize {
        self.source.len()
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Coding method of this stream.
    pub fn method(&self) -> CodingMethod {
        self.method
    }

    /// The coded block for `seed`.
    pub fn block(&self, seed: u32) -> Vec<u8> {
        let k = self.source.len();
        match self.method {
            CodingMethod::PlainRepeat => self.source[seed as usize % k].clone(),
            CodingMethod::RaptorLt => {
                let s = seed as usize;
                if s < k {
                    self.source[s].clone()
                } else if s < k + self.parity.len() {
                    self.parity[s - k].clone()
                } else {
                    let mut block = vec![0u8; self.block_size];
                    for idx in equation_for_seed(self.method, seed, k) {
                        let sym = if idx < k {
                            &self.source[idx]
                        } else {
                            &self.parity[idx - k]
                        };
                        xor_into(&mut block, sym);
                    }
                    block
                }
            }
        }
    }
}

/// One unresolved XOR relation over combined-space symbols.
struct Equation {
    value: Vec<u8>,
    unknowns: Vec<usize>,
}

/// Peeling decoder reconstructing the payload from coded blocks.
///
/// Tolerates arbitrary order, duplicates and losses. Completion requires
/// all `K` source symbols; parity symbols are solved opportunistically.
pub struct BlockDecoder {
    method: CodingMethod,
    k: usize,
    block_size: usize,
    /// Source symbols followed by parity symbols (RaptorLt only).
    symbols: Vec<Option<Vec<u8>>>,
    pending: Vec<Equation>,
    seen: HashSet<u32>,
    solved_sources: usize,
}

impl BlockDecoder {
    /// Build a decoder for a stream with `k` source blocks.
    pub fn new(method: CodingMethod, k: usize, block_size: usize) -> Self {
        let total = match method {
            CodingMethod::PlainRepeat => k,
            CodingMethod::RaptorLt => k + parity_count(k),
        };

        let mut decoder = Self {
            method,
            k,
            block_size,
            symbols: vec![None; total],
            pending: Vec::new(),
            seen: HashSet::new(),
            solved_sources: 0,
        };

        if method == CodingMethod::RaptorLt {
            // Structural relations: parity XOR its sources is all zeroes.
            // Feeding them as ordinary equations lets the peeling loop use
            // parity both ways (derive parity from sources and vice versa).
            for i in 0..parity_count(k) {
                let mut unknowns = parity_sources(i, k);
                unknowns.push(k + i);
                decoder.pending.push(Equation {
                    value: vec![0u8; block_size],
                    unknowns,
                });
            }
        }

        decoder
    }

    /// Absorb one coded block. Returns `true` once all sources are solved.
    ///
    /// Duplicate seeds and blocks that carry no new information are
    /// silently ignored.
    pub fn absorb(&mut self, seed: u32, payload: &[u8]) -> bool {
        if self.is_complete() {
            return true;
        }
        debug_assert_eq!(payload.len(), self.block_size);
        if !self.seen.insert(seed) {
            return self.is_complete();
        }

        let indices = equation_for_seed(self.method, seed, self.k);
        self.add_equation(payload.to_vec(), indices);
        self.is_complete()
    }

    fn add_equation(&mut self, mut value: Vec<u8>, indices: Vec<usize>) {
        let mut unknowns = Vec::with_capacity(indices.len());
        for idx in indices {
            match &self.symbols[idx] {
                Some(known) => xor_into(&mut value, known),
                None => unknowns.push(idx),
            }
        }
        match unknowns.len() {
            0 => {} // redundant block
            1 => self.solve(unknowns[0], value),
            _ => self.pending.push(Equation { value, unknowns }),
        }
    }

    fn solve(&mut self, idx: usize, value: Vec<u8>) {
        if self.symbols[idx].is_some() {
            return;
        }
        if idx < self.k {
            self.solved_sources += 1;
        }
        self.symbols[idx] = Some(value);
        self.propagate(idx);
    }

    /// Belief-propagation sweep: substitute a newly solved symbol into
    /// every pending equation and keep solving singletons until quiescent.
    fn propagate(&mut self, start: usize) {
        let mut worklist = vec![start];
        while let Some(solved_idx) = worklist.pop() {
            let solved_val = self.symbols[solved_idx]
                .clone()
                .expect("worklist entries are solved");

            let mut resolved: Vec<(usize, Vec<u8>)> = Vec::new();
            self.pending.retain_mut(|eq| {
                if let Some(pos) = eq.unknowns.iter().position(|&u| u == solved_idx) {
                    eq.unknowns.swap_remove(pos);
                    xor_into(&mut eq.value, &solved_val);
                }
                match eq.unknowns.len() {
                    0 => false,
                    1 => {
                        resolved.push((eq.unknowns[0], std::mem::take(&mut eq.value)));
                        false
                    }
                    _ => true,
                }
            });

            for (idx, value) in resolved {
                if self.symbols[idx].is_none() {
                    if idx < self.k {
                        self.solved_sources += 1;
                    }
                    self.symbols[idx] = Some(value);
                    worklist.push(idx);
                }
            }
        }
    }

    /// Whether every source symbol is solved.
    pub fn is_complete(&self) -> bool {
        self.solved_sources == self.k
    }

    /// Fraction of source symbols solved, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.k == 0 {
            return 1.0;
        }
        self.solved_sources as f64 / self.k as f64
    }

    /// Solved source symbols.
    pub fn solved_sources(&self) -> usize {
        self.solved_sources
    }

    /// Source block count `K`.
    pub fn source_count(&self) -> usize {
        self.k
    }

    /// Distinct seeds absorbed so far.
    pub fn unique_seeds(&self) -> usize {
        self.seen.len()
    }

    /// Concatenated source blocks (`K * block_size` bytes, block padding
    /// included), or `None` while incomplete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut data = Vec::with_capacity(self.k * self.block_size);
        for symbol in &self.symbols[..self.k] {
            data.extend_from_slice(symbol.as_ref()?);
        }
        Some(data)
    }
}

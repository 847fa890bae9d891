//! Session token and mnemonic derivation.
//!
//! Both ceremony participants hold the same pad, so both derive identical
//! tokens without any server involvement:
//!
//! - the conversation id names the session on the relay,
//! - the auth token authorizes message operations,
//! - the burn token authorizes destruction (defense in depth: the auth
//!   token alone cannot burn),
//! - the mnemonic is the 6-word verification code the two users read aloud.
//!
//! Every derivation is an HMAC-SHA256 over the full pad, keyed by a fixed
//! domain label. Cleartext tokens never leave the device; the relay only
//! ever sees their SHA-256 hashes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::wordlist::WORDLIST;

type HmacSha256 = Hmac<Sha256>;

/// Domain label for the conversation id.
pub const CONVERSATION_ID_LABEL: &[u8] = b"ash/conv-id/v1";

/// Domain label for the auth token.
pub const AUTH_TOKEN_LABEL: &[u8] = b"ash/auth/v1";

/// Domain label for the burn token.
pub const BURN_TOKEN_LABEL: &[u8] = b"ash/burn/v1";

/// Domain label for the verification mnemonic.
pub const VERIFY_LABEL: &[u8] = b"ash/verify/v1";

/// Bytes of the keyed digest used for the conversation id.
pub const CONVERSATION_ID_BYTES: usize = 16;

/// Words in the verification mnemonic.
pub const MNEMONIC_WORDS: usize = 6;

/// Bits consumed per mnemonic word (2048-entry wordlist).
const BITS_PER_WORD: u32 = 11;

/// The three relay-facing tokens for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Hex-encoded conversation id (32 characters).
    pub conversation_id: String,
    /// Base64-url auth token.
    pub auth_token: String,
    /// Base64-url burn token.
    pub burn_token: String,
}

impl SessionTokens {
    /// Derive all three tokens from the pad.
    pub fn derive(pad: &[u8]) -> Self {
        Self {
            conversation_id: conversation_id(pad),
            auth_token: auth_token(pad),
            burn_token: burn_token(pad),
        }
    }
}

fn keyed_digest(label: &[u8], pad: &[u8]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(label).expect("HMAC accepts keys of any length");
    mac.update(pad);
    mac.finalize().into_bytes().into()
}

/// Hex-encoded conversation id: the first 16 bytes of the keyed digest.
pub fn conversation_id(pad: &[u8]) -> String {
    hex::encode(&keyed_digest(CONVERSATION_ID_LABEL, pad)[..CONVERSATION_ID_BYTES])
}

/// Base64-url auth token.
pub fn auth_token(pad: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(keyed_digest(AUTH_TOKEN_LABEL, pad))
}

/// Base64-url burn token.
pub fn burn_token(pad: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(keyed_digest(BURN_TOKEN_LABEL, pad))
}

/// Hex SHA-256 of a token, the only form ever sent to the relay.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The 6-word verification mnemonic.
///
/// Words index the 2048-entry wordlist by consecutive 11-bit chunks of
/// the keyed verification digest.
pub fn mnemonic(pad: &[u8]) -> Vec<&'static str> {
    let digest = keyed_digest(VERIFY_LABEL, pad);

    let mut words = Vec::with_capacity(MNEMONIC_WORDS);
    let mut acc: u32 = 0;
    let mut acc_bits: u32 = 0;
    let mut next_byte = 0usize;

    while words.len() < MNEMONIC_WORDS {
        while acc_bits < BITS_PER_WORD {
            acc = (acc << 8) | u32::from(digest[next_byte]);
            acc_bits += 8;
            next_byte += 1;
        }
        acc_bits -= BITS_PER_WORD;
        let index = ((acc >> acc_bits) & 0x7FF) as usize;
        acc &= (1 << acc_bits) - 1;
        words.push(WORDLIST[index]);
    }

    words
}

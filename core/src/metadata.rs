//! Ceremony metadata carried alongside the pad during QR transfer.
//!
//! The record is bit-exact and little-endian:
//!
//! ```text
//! [ttl_seconds: u32][disappearing_seconds: u32][flags: u16][url_len: u8][relay_url: url_len bytes]
//! ```
//!
//! Flag word layout (16 bits):
//!
//! | bits  | meaning                  |
//! |-------|--------------------------|
//! | 0     | notify on new message    |
//! | 1     | notify before expiry     |
//! | 2     | notify on expiry         |
//! | 3     | notify delivery failed   |
//! | 4     | persistence consent      |
//! | 5-7   | padding size class       |
//! | 8-11  | reserved                 |
//! | 12-15 | conversation color index |
//!
//! Reserved bits are preserved verbatim on re-serialization and never
//! interpreted.

use crate::error::{Error, Result};

/// Fixed-width prefix before the relay URL: 4 + 4 + 2 + 1 bytes.
pub const METADATA_MIN_LEN: usize = 11;

/// Maximum relay URL length (it must fit the u8 length field).
pub const MAX_RELAY_URL_LEN: usize = 255;

/// Default message TTL in seconds (5 minutes).
pub const DEFAULT_TTL_SECONDS: u32 = 300;

const NOTIFY_NEW_MESSAGE: u16 = 1 << 0;
const NOTIFY_EXPIRING: u16 = 1 << 1;
const NOTIFY_EXPIRED: u16 = 1 << 2;
const NOTIFY_DELIVERY_FAILED: u16 = 1 << 3;
const PERSISTENCE_CONSENT: u16 = 1 << 4;
const PADDING_CLASS_SHIFT: u16 = 5;
const PADDING_CLASS_MASK: u16 = 0b111 << PADDING_CLASS_SHIFT;
const COLOR_SHIFT: u16 = 12;
const COLOR_MASK: u16 = 0b1111 << COLOR_SHIFT;

/// The 16-bit ceremony flag word.
///
/// Accessors cover the named bits; everything else (including the reserved
/// range) round-trips untouched through `raw`/`from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataFlags(u16);

impl Default for MetadataFlags {
    fn default() -> Self {
        Self(NOTIFY_NEW_MESSAGE | NOTIFY_EXPIRING | NOTIFY_DELIVERY_FAILED)
    }
}

impl MetadataFlags {
    /// Wrap a raw flag word.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw flag word, unknown bits included.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Notify when a new message arrives.
    pub const fn notify_new_message(self) -> bool {
        self.0 & NOTIFY_NEW_MESSAGE != 0
    }

    /// Notify before a message expires.
    pub const fn notify_expiring(self) -> bool {
        self.0 & NOTIFY_EXPIRING != 0
    }

    /// Notify when a message expires.
    pub const fn notify_expired(self) -> bool {
        self.0 & NOTIFY_EXPIRED != 0
    }

    /// Notify the sender if delivery fails.
    pub const fn notify_delivery_failed(self) -> bool {
        self.0 & NOTIFY_DELIVERY_FAILED != 0
    }

    /// Whether the user consented to persisting message history.
    pub const fn persistence_consent(self) -> bool {
        self.0 & PERSISTENCE_CONSENT != 0
    }

    /// Padding size class (0..=7).
    pub const fn padding_class(self) -> u8 {
        ((self.0 & PADDING_CLASS_MASK) >> PADDING_CLASS_SHIFT) as u8
    }

    /// Conversation color index (0..=15).
    pub const fn color_index(self) -> u8 {
        ((self.0 & COLOR_MASK) >> COLOR_SHIFT) as u8
    }

    /// Set or clear the persistence-consent bit.
    pub fn with_persistence_consent(self, consent: bool) -> Self {
        if consent {
            Self(self.0 | PERSISTENCE_CONSENT)
        } else {
            Self(self.0 & !PERSISTENCE_CONSENT)
        }
    }

    /// Replace the padding size class, keeping everything else.
    pub fn with_padding_class(self, class: u8) -> Self {
        let class = u16::from(class & 0b111) << PADDING_CLASS_SHIFT;
        Self((self.0 & !PADDING_CLASS_MASK) | class)
    }

    /// Replace the color index, keeping everything else.
    pub fn with_color_index(self, color: u8) -> Self {
        let color = u16::from(color & 0b1111) << COLOR_SHIFT;
        Self((self.0 & !COLOR_MASK) | color)
    }
}

/// Conversation settings agreed at ceremony time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeremonyMetadata {
    /// How long submitted messages stay on the relay, in seconds.
    pub ttl_seconds: u32,
    /// Client-side disappearing timer in seconds; 0 disables it.
    pub disappearing_seconds: u32,
    /// Flag word, see module docs.
    pub flags: MetadataFlags,
    /// Relay server URL, `http` or `https`, at most 255 bytes.
    pub relay_url: String,
}

impl Default for CeremonyMetadata {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            disappearing_seconds: 0,
            flags: MetadataFlags::default(),
            relay_url: String::new(),
        }
    }
}

impl CeremonyMetadata {
    /// Create validated metadata.
    ///
    /// # Errors
    ///
    /// `MetadataMalformed` if the relay URL is too long or has a scheme
    /// other than `http`/`https`.
    pub fn new(
        ttl_seconds: u32,
        disappearing_seconds: u32,
        flags: MetadataFlags,
        relay_url: String,
    ) -> Result<Self> {
        validate_relay_url(&relay_url)?;
        Ok(Self {
            ttl_seconds: if ttl_seconds == 0 {
                DEFAULT_TTL_SECONDS
            } else {
                ttl_seconds
            },
            disappearing_seconds,
            flags,
            relay_url,
        })
    }

    /// Serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        METADATA_MIN_LEN + self.relay_url.len()
    }

    /// Encode to the little-endian wire form.
    pub fn encode(&self) -> Vec<u8> {
        let url = self.relay_url.as_bytes();
        let mut bytes = Vec::with_capacity(METADATA_MIN_LEN + url.len());
        bytes.extend_from_slice(&self.ttl_seconds.to_le_bytes());
        bytes.extend_from_slice(&self.disappearing_seconds.to_le_bytes());
        bytes.extend_from_slice(&self.flags.raw().to_le_bytes());
        bytes.push(url.len() as u8);
        bytes.extend_from_slice(url);
        bytes
    }

    /// Decode from the wire form.
    ///
    /// Returns the record and the number of bytes it occupied; trailing
    /// bytes (block padding from the ceremony codec) are left alone.
    ///
    /// # Errors
    ///
    /// `MetadataMalformed` if the record is truncated or the URL is invalid.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < METADATA_MIN_LEN {
            return Err(Error::MetadataMalformed {
                reason: "record truncated",
            });
        }

        let ttl_seconds = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let disappearing_seconds = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let flags = MetadataFlags::from_raw(u16::from_le_bytes([bytes[8], bytes[9]]));
        let url_len = bytes[10] as usize;

        let end = METADATA_MIN_LEN + url_len;
        if bytes.len() < end {
            return Err(Error::MetadataMalformed {
                reason: "relay URL truncated",
            });
        }

        let relay_url = std::str::from_utf8(&bytes[METADATA_MIN_LEN..end])
            .map_err(|_| Error::MetadataMalformed {
                reason: "relay URL is not UTF-8",
            })?
            .to_string();
        validate_relay_url(&relay_url)?;

        Ok((
            Self {
                ttl_seconds,
                disappearing_seconds,
                flags,
                relay_url,
            },
            end,
        ))
    }
}

/// URL rules: at most 255 bytes, scheme `http` or `https`. An empty URL is
/// allowed and means "use the host default".
fn validate_relay_url(url: &str) -> Result<()> {
    if url.len() > MAX_RELAY_URL_LEN {
        return Err(Error::MetadataMalformed {
            reason: "relay URL too long",
        });
    }
    if !url.is_empty() && !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(Error::MetadataMalformed {
            reason: "relay URL scheme must be http or https",
        });
    }
    Ok(())
}

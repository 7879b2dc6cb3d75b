//! Content identifiers stamped into written images.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use sha1::{Digest, Sha1};

use crate::Result;

static TIME_BASED_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of the content of a written image: a GUID plus the 32-bit value written to the
/// COFF `TimeDateStamp` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId {
    /// GUID part, usable as a module version id
    pub guid: uguid::Guid,
    /// Value for the COFF time stamp
    pub stamp: u32,
}

impl ContentId {
    /// Creates an id from its parts
    #[must_use]
    pub const fn new(guid: uguid::Guid, stamp: u32) -> Self {
        ContentId { guid, stamp }
    }

    /// Derives an id from a content hash of at least 20 bytes.
    ///
    /// The GUID is formed from the first 16 bytes with the version and variant bits of a
    /// random (version 4) GUID; the stamp is bytes 16..20 with the top bit set.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `hash` is shorter than 20 bytes.
    pub fn from_hash(hash: &[u8]) -> Result<ContentId> {
        if hash.len() < 20 {
            return Err(invalid_argument!(
                "hash",
                "content hash must be at least 20 bytes, got {}",
                hash.len()
            ));
        }

        let mut prefix = [0u8; 20];
        prefix.copy_from_slice(&hash[..20]);
        Ok(Self::from_hash_prefix(&prefix))
    }

    fn from_hash_prefix(hash: &[u8; 20]) -> ContentId {
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&hash[..16]);
        guid[7] = (guid[7] & 0x0F) | (4 << 4);
        guid[8] = (guid[8] & 0x3F) | (2 << 6);

        ContentId {
            guid: uguid::Guid::from_bytes(guid),
            stamp: 0x8000_0000 | u32::from_le_bytes([hash[16], hash[17], hash[18], hash[19]]),
        }
    }

    /// Deterministic id: SHA-1 over `content`
    #[must_use]
    pub fn from_content(content: &[u8]) -> ContentId {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(Sha1::digest(content).as_slice());
        Self::from_hash_prefix(&hash)
    }

    /// Time-based id: the stamp is the current Unix time and the GUID is unique per call.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn time_based(content: &[u8]) -> ContentId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut hasher = Sha1::new();
        hasher.update(content);
        hasher.update(now.as_nanos().to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(TIME_BASED_SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
        let mut hash = [0u8; 20];
        hash.copy_from_slice(hasher.finalize().as_slice());

        ContentId {
            stamp: now.as_secs() as u32,
            ..Self::from_hash_prefix(&hash)
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / 0x{:08X}", self.guid, self.stamp)
    }
}

/// Strategy producing the [`ContentId`] of a finished image.
///
/// The provider sees the complete image with a zero time stamp.
pub enum ContentIdProvider {
    /// Unique per serialization; the stamp is the current time
    TimeBased,
    /// SHA-1 over the image content
    Deterministic,
    /// Caller-supplied deterministic function
    Custom(Box<dyn Fn(&[u8]) -> ContentId + Send + Sync>),
}

impl Default for ContentIdProvider {
    fn default() -> Self {
        ContentIdProvider::TimeBased
    }
}

impl fmt::Debug for ContentIdProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentIdProvider::TimeBased => f.write_str("TimeBased"),
            ContentIdProvider::Deterministic => f.write_str("Deterministic"),
            ContentIdProvider::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl ContentIdProvider {
    /// Returns `true` if the same content always yields the same id
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, ContentIdProvider::TimeBased)
    }

    /// Computes the id of `content`
    #[must_use]
    pub fn provide(&self, content: &[u8]) -> ContentId {
        match self {
            ContentIdProvider::TimeBased => ContentId::time_based(content),
            ContentIdProvider::Deterministic => ContentId::from_content(content),
            ContentIdProvider::Custom(provider) => provider(content),
        }
    }
}

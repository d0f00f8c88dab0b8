//! Cache-scoped keys for the LMDB durable tier.
//!
//! Several caches share one LMDB database. Every key starts with the
//! owning cache's name, so one cache's rows form a contiguous prefix and
//! can never be read or deleted through another cache's name.

use meridian_core::{ObjectId, StorageError};

/// Separator byte between the cache name and the object id.
const SEPARATOR: u8 = 0xFF;

/// Longest cache name a key can carry.
pub const MAX_CACHE_NAME_LEN: usize = u16::MAX as usize;

/// A durable-tier key scoped to one cache.
///
/// # Binary Format
///
/// - Bytes 0-1: cache name length `n` (u16, big-endian)
/// - Bytes 2..n+2: cache name (UTF-8)
/// - Byte n+2: separator (0xFF)
/// - Bytes n+3..n+11: object id (u64, big-endian)
///
/// Big-endian ids keep one cache's rows sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DurableKey {
    cache_name: String,
    object_id: ObjectId,
}

impl DurableKey {
    pub fn new(cache_name: &str, object_id: ObjectId) -> Result<Self, StorageError> {
        check_name(cache_name)?;
        Ok(Self {
            cache_name: cache_name.to_string(),
            object_id,
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = encode_prefix(&self.cache_name);
        bytes.extend_from_slice(&self.object_id.as_u64().to_be_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the length prefix, separator, name encoding or
    /// id width is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        let (len_bytes, rest) = bytes.split_at(2);
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if rest.len() != len + 1 + 8 || rest[len] != SEPARATOR {
            return None;
        }

        let cache_name = std::str::from_utf8(&rest[..len]).ok()?.to_string();
        let id_bytes: [u8; 8] = rest[len + 1..].try_into().ok()?;

        Some(Self {
            cache_name,
            object_id: ObjectId::new(u64::from_be_bytes(id_bytes)),
        })
    }

    /// Prefix shared by every key of one cache.
    pub fn cache_prefix(cache_name: &str) -> Result<Vec<u8>, StorageError> {
        check_name(cache_name)?;
        Ok(encode_prefix(cache_name))
    }
}

fn check_name(cache_name: &str) -> Result<(), StorageError> {
    if cache_name.len() > MAX_CACHE_NAME_LEN {
        return Err(StorageError::Serialization {
            reason: format!(
                "cache name is {} bytes, at most {} allowed",
                cache_name.len(),
                MAX_CACHE_NAME_LEN
            ),
        });
    }
    Ok(())
}

fn encode_prefix(cache_name: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(cache_name.len() + 11);
    bytes.extend_from_slice(&(cache_name.len() as u16).to_be_bytes());
    bytes.extend_from_slice(cache_name.as_bytes());
    bytes.push(SEPARATOR);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let key = DurableKey::new("points", ObjectId::new(123_456)).unwrap();
        let decoded = DurableKey::decode(&key.encode()).expect("key should decode");
        assert_eq!(decoded, key);
        assert_eq!(decoded.cache_name(), "points");
        assert_eq!(decoded.object_id(), ObjectId::new(123_456));
    }

    #[test]
    fn test_prefix_matches_only_own_cache() {
        let key = DurableKey::new("paths", ObjectId::new(1)).unwrap().encode();
        assert!(key.starts_with(&DurableKey::cache_prefix("paths").unwrap()));
        assert!(!key.starts_with(&DurableKey::cache_prefix("path").unwrap()));
        assert!(!key.starts_with(&DurableKey::cache_prefix("paths2").unwrap()));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(DurableKey::decode(&[]).is_none());
        let mut key = DurableKey::new("x", ObjectId::new(9)).unwrap().encode();
        key[3] = 0x00;
        assert!(DurableKey::decode(&key).is_none());
        let short = &DurableKey::new("x", ObjectId::new(9)).unwrap().encode()[..6];
        assert!(DurableKey::decode(short).is_none());
    }

    #[test]
    fn test_rejects_long_names() {
        let name = "n".repeat(MAX_CACHE_NAME_LEN + 1);
        assert!(DurableKey::new(&name, ObjectId::new(1)).is_err());
        assert!(DurableKey::cache_prefix(&name).is_err());
    }

    #[test]
    fn test_ids_sort_within_cache() {
        let a = DurableKey::new("c", ObjectId::new(2)).unwrap().encode();
        let b = DurableKey::new("c", ObjectId::new(256)).unwrap().encode();
        assert!(a < b);
    }
}

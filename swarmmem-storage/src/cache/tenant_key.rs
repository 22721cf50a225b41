//! Swarm-scoped cache key for multi-swarm LMDB isolation.
//!
//! `MemoryCacheKey`'s private constructor makes cross-swarm access
//! uncompilable: you cannot construct a key without a `swarm_id`.

use swarmmem_core::SwarmId;

const SEPARATOR: u8 = 0xFF;

/// A cache key scoped to a specific swarm, namespace, and logical key.
///
/// # Binary Format
///
/// Encodes to a fixed 41-byte array:
/// - Bytes 0-15: `swarm_id` (UUID as bytes)
/// - Byte 16: separator (`0xFF`)
/// - Bytes 17-24: first 8 bytes of `sha256(namespace)`
/// - Bytes 25-40: first 16 bytes of `sha256(key)`
///
/// Logical keys are caller-chosen byte strings, not UUIDs, so unlike a
/// UUID-keyed cache this format stores a hash rather than the original
/// bytes; collisions are tolerated as cache misses, never cross-swarm
/// leaks, because the swarm_id component is never hashed away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryCacheKey {
    inner: MemoryCacheKeyInner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MemoryCacheKeyInner {
    swarm_id: SwarmId,
    namespace_hash: [u8; 8],
    key_hash: [u8; 16],
}

fn hash_prefix<const N: usize>(bytes: &[u8]) -> [u8; N] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}

impl MemoryCacheKey {
    /// Build a key for `namespace`/`key` within `swarm_id`. The only way to
    /// construct a `MemoryCacheKey`, so every cache lookup is swarm-scoped
    /// by construction.
    pub fn new(swarm_id: SwarmId, namespace: &str, key: &[u8]) -> Self {
        Self {
            inner: MemoryCacheKeyInner {
                swarm_id,
                namespace_hash: hash_prefix(namespace.as_bytes()),
                key_hash: hash_prefix(key),
            },
        }
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.inner.swarm_id
    }

    pub fn encode(&self) -> [u8; 41] {
        let mut bytes = [0u8; 41];
        bytes[0..16].copy_from_slice(self.inner.swarm_id.as_uuid().as_bytes());
        bytes[16] = SEPARATOR;
        bytes[17..25].copy_from_slice(&self.inner.namespace_hash);
        bytes[25..41].copy_from_slice(&self.inner.key_hash);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 41 || bytes[16] != SEPARATOR {
            return None;
        }
        let swarm_id = SwarmId::new(uuid::Uuid::from_slice(&bytes[0..16]).ok()?);
        let mut namespace_hash = [0u8; 8];
        namespace_hash.copy_from_slice(&bytes[17..25]);
        let mut key_hash = [0u8; 16];
        key_hash.copy_from_slice(&bytes[25..41]);
        Some(Self {
            inner: MemoryCacheKeyInner {
                swarm_id,
                namespace_hash,
                key_hash,
            },
        })
    }

    /// Prefix matching every key cached for this swarm, for LMDB range scans.
    pub fn swarm_prefix(swarm_id: SwarmId) -> [u8; 17] {
        let mut prefix = [0u8; 17];
        prefix[0..16].copy_from_slice(swarm_id.as_uuid().as_bytes());
        prefix[16] = SEPARATOR;
        prefix
    }

    /// Prefix matching every key cached for this swarm and namespace.
    pub fn swarm_namespace_prefix(swarm_id: SwarmId, namespace: &str) -> [u8; 25] {
        let mut prefix = [0u8; 25];
        prefix[0..16].copy_from_slice(swarm_id.as_uuid().as_bytes());
        prefix[16] = SEPARATOR;
        prefix[17..25].copy_from_slice(&hash_prefix::<8>(namespace.as_bytes()));
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmmem_core::EntityIdType;

    #[test]
    fn test_encode_decode_roundtrip() {
        let swarm_id = SwarmId::now_v7();
        let key = MemoryCacheKey::new(swarm_id, "ns", b"my-key");
        let decoded = MemoryCacheKey::decode(&key.encode()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_encode_length() {
        let key = MemoryCacheKey::new(SwarmId::now_v7(), "ns", b"k");
        assert_eq!(key.encode().len(), 41);
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(MemoryCacheKey::decode(&[0u8; 40]).is_none());
    }

    #[test]
    fn test_decode_wrong_separator() {
        let mut bytes = [0u8; 41];
        bytes[16] = 0x00;
        assert!(MemoryCacheKey::decode(&bytes).is_none());
    }

    #[test]
    fn test_different_swarms_different_keys() {
        let k1 = MemoryCacheKey::new(SwarmId::now_v7(), "ns", b"k");
        let k2 = MemoryCacheKey::new(SwarmId::now_v7(), "ns", b"k");
        assert_ne!(k1.encode(), k2.encode());
    }

    #[test]
    fn test_same_swarm_different_namespaces_different_keys() {
        let swarm_id = SwarmId::now_v7();
        let k1 = MemoryCacheKey::new(swarm_id, "ns1", b"k");
        let k2 = MemoryCacheKey::new(swarm_id, "ns2", b"k");
        assert_ne!(k1.encode(), k2.encode());
    }

    #[test]
    fn test_swarm_prefix_is_prefix() {
        let swarm_id = SwarmId::now_v7();
        let key = MemoryCacheKey::new(swarm_id, "ns", b"k");
        let prefix = MemoryCacheKey::swarm_prefix(swarm_id);
        assert_eq!(&key.encode()[0..17], &prefix[..]);
    }

    #[test]
    fn test_swarm_namespace_prefix_is_prefix() {
        let swarm_id = SwarmId::now_v7();
        let key = MemoryCacheKey::new(swarm_id, "ns", b"k");
        let prefix = MemoryCacheKey::swarm_namespace_prefix(swarm_id, "ns");
        assert_eq!(&key.encode()[0..25], &prefix[..]);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn uuid_strategy() -> impl Strategy<Value = SwarmId> {
        any::<[u8; 16]>().prop_map(|b| SwarmId::new(uuid::Uuid::from_bytes(b)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_encode_decode_roundtrip(
            swarm_id in uuid_strategy(),
            namespace in "[a-z]{1,16}",
            key in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let cache_key = MemoryCacheKey::new(swarm_id, &namespace, &key);
            let decoded = MemoryCacheKey::decode(&cache_key.encode());
            prop_assert_eq!(Some(cache_key), decoded);
        }

        #[test]
        fn prop_encode_length_always_41(
            swarm_id in uuid_strategy(),
            namespace in "[a-z]{1,16}",
            key in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let cache_key = MemoryCacheKey::new(swarm_id, &namespace, &key);
            prop_assert_eq!(cache_key.encode().len(), 41);
        }

        #[test]
        fn prop_swarm_prefix_is_prefix(
            swarm_id in uuid_strategy(),
            namespace in "[a-z]{1,16}",
            key in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let cache_key = MemoryCacheKey::new(swarm_id, &namespace, &key);
            let encoded = cache_key.encode();
            let prefix = MemoryCacheKey::swarm_prefix(swarm_id);
            prop_assert_eq!(&encoded[0..17], &prefix[..]);
        }
    }
}

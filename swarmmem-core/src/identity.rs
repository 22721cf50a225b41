//! Identity types for swarm memory entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// This trait provides compile-time safety by ensuring entity IDs cannot be
/// accidentally mixed up. Each entity type has its own strongly-typed ID.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g., "swarm", "agent").
    const ENTITY_NAME: &'static str;

    /// Create a new ID from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new timestamp-sortable UUIDv7 ID.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Create a new random UUIDv4 ID.
    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to parse {} ID from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Macro to define a type-safe entity ID newtype around a UUID.
macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                // Serialize transparently as UUID string
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                // Deserialize transparently from UUID
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

// ============================================================================
// ENTITY ID TYPES
// ============================================================================

define_entity_id!(SwarmId, "swarm", "Type-safe ID for swarm entities.");
define_entity_id!(TeamId, "team", "Type-safe ID for team entities.");
define_entity_id!(ProjectId, "project", "Type-safe ID for project entities.");
define_entity_id!(AgentId, "agent", "Type-safe ID for agent entities.");
define_entity_id!(EntryId, "entry", "Type-safe ID for memory entry entities.");
define_entity_id!(
    KeyId,
    "encryption_key",
    "Type-safe ID for encryption key entities."
);
define_entity_id!(
    PermissionId,
    "permission",
    "Type-safe ID for permission grant entities."
);
define_entity_id!(
    AuditId,
    "audit_record",
    "Type-safe ID for audit log entities."
);

// ============================================================================
// OTHER IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for TTL and timeout values.
pub type DurationMs = i64;

/// SHA-256 checksum for integrity verification of stored values.
pub type ContentHash = [u8; 32];

/// Raw serialized bytes as persisted on disk (post-compression, post-encryption).
pub type RawContent = Vec<u8>;

/// The logical key a caller addresses an entry by: opaque bytes, bounded in
/// length by `SwarmMemConfig::max_key_len`. Unlike every other identifier in
/// this crate this is not a UUID — callers choose their own keys within a
/// namespace.
pub type LogicalKey = Vec<u8>;

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Compute a SHA-256 checksum of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_type_safety() {
        // Different ID types cannot be mixed
        let swarm_id = SwarmId::now_v7();
        let agent_id = AgentId::now_v7();

        // This would not compile if uncommented:
        // let _: SwarmId = agent_id;

        assert_ne!(swarm_id.as_uuid(), agent_id.as_uuid());
    }

    #[test]
    fn test_entity_id_display() {
        let id = SwarmId::new(Uuid::nil());
        assert_eq!(
            format!("{:?}", id),
            "SwarmId(00000000-0000-0000-0000-000000000000)"
        );
        assert_eq!(format!("{}", id), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_entity_id_from_str() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id: SwarmId = uuid_str.parse().expect("valid UUID should parse");
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_entity_id_parse_error() {
        let result: Result<SwarmId, _> = "invalid".parse();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.entity_name, "swarm");
        assert_eq!(err.input, "invalid");
    }

    #[test]
    fn test_entity_id_serde() {
        let id = EntryId::now_v7();
        let json = serde_json::to_string(&id).expect("serialization should succeed");
        // Should serialize as UUID string (not wrapped in object)
        assert!(json.starts_with('"'));
        assert!(json.ends_with('"'));

        let deserialized: EntryId =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_entity_id_default() {
        let id = AgentId::default();
        assert_eq!(id, AgentId::nil());
    }

    #[test]
    fn test_all_entity_types() {
        let _swarm = SwarmId::now_v7();
        let _team = TeamId::now_v7();
        let _project = ProjectId::now_v7();
        let _agent = AgentId::now_v7();
        let _entry = EntryId::now_v7();
        let _key = KeyId::now_v7();
        let _permission = PermissionId::now_v7();
        let _audit = AuditId::now_v7();
    }

    #[test]
    fn test_compute_content_hash_deterministic() {
        let a = compute_content_hash(b"swarm memory payload");
        let b = compute_content_hash(b"swarm memory payload");
        assert_eq!(a, b);
        let c = compute_content_hash(b"different payload");
        assert_ne!(a, c);
    }
}

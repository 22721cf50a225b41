//! Closed enumerations for swarm memory entities.
//!
//! Every variant set here is closed by design (see `DESIGN.md`): no
//! polymorphic hierarchy, no dynamic option bag. Each enum that crosses the
//! storage boundary gets an `as_db_str`/`from_db_str` pair plus `Display`/
//! `FromStr`, following the convention used throughout this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Generic parse error for the closed enums in this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: '{}'", self.type_name, self.input)
    }
}

impl std::error::Error for EnumParseError {}

// ============================================================================
// ACL LEVEL
// ============================================================================

/// A scope level in the six-step ACL ladder, 1 (most restrictive) through
/// 6 (system). Ordering is numeric: `ACLLevel::Team < ACLLevel::Swarm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ACLLevel {
    Private = 1,
    Team = 2,
    Swarm = 3,
    Project = 4,
    Public = 5,
    System = 6,
}

impl ACLLevel {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, EnumParseError> {
        match value {
            1 => Ok(ACLLevel::Private),
            2 => Ok(ACLLevel::Team),
            3 => Ok(ACLLevel::Swarm),
            4 => Ok(ACLLevel::Project),
            5 => Ok(ACLLevel::Public),
            6 => Ok(ACLLevel::System),
            other => Err(EnumParseError {
                type_name: "ACLLevel",
                input: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ACLLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ACLLevel::Private => "private",
            ACLLevel::Team => "team",
            ACLLevel::Swarm => "swarm",
            ACLLevel::Project => "project",
            ACLLevel::Public => "public",
            ACLLevel::System => "system",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ACLLevel {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "private" | "1" => Ok(ACLLevel::Private),
            "team" | "2" => Ok(ACLLevel::Team),
            "swarm" | "3" => Ok(ACLLevel::Swarm),
            "project" | "4" => Ok(ACLLevel::Project),
            "public" | "5" => Ok(ACLLevel::Public),
            "system" | "6" => Ok(ACLLevel::System),
            _ => Err(EnumParseError {
                type_name: "ACLLevel",
                input: s.to_string(),
            }),
        }
    }
}

/// An action an actor may request against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    Read,
    Write,
    Delete,
    Admin,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Admin => "admin",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for Action {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "delete" => Ok(Action::Delete),
            "admin" => Ok(Action::Admin),
            _ => Err(EnumParseError {
                type_name: "Action",
                input: s.to_string(),
            }),
        }
    }
}

/// A closed set of granted actions, e.g. `{read, write}`.
pub type ActionSet = BTreeSet<Action>;

/// Why an ACL evaluation denied a request. Carried on every deny outcome
/// instead of being modeled as an exception — see `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    ProjectMismatch,
    SwarmMismatch,
    TeamMismatch,
    NotOwner,
    InactiveActor,
    NoGrant,
    InsufficientLevel,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            DenyReason::ProjectMismatch => "project_mismatch",
            DenyReason::SwarmMismatch => "swarm_mismatch",
            DenyReason::TeamMismatch => "team_mismatch",
            DenyReason::NotOwner => "not_owner",
            DenyReason::InactiveActor => "inactive_actor",
            DenyReason::NoGrant => "no_grant",
            DenyReason::InsufficientLevel => "insufficient_level",
        };
        write!(f, "{}", value)
    }
}

// ============================================================================
// AGENT / CONTAINER STATUS
// ============================================================================

/// Status of an agent in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    Terminated,
}

impl AgentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Terminated => "terminated",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "suspended" => Ok(AgentStatus::Suspended),
            "terminated" => Ok(AgentStatus::Terminated),
            _ => Err(EnumParseError {
                type_name: "AgentStatus",
                input: s.to_string(),
            }),
        }
    }

    /// Whether an actor in this status may act at all. The level-6 system
    /// path is the sole exemption, checked separately by the ACL enforcer.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Active)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Role of an agent. Only `System` is exempt from the `status = active` gate
/// when evaluating a level-6 ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentRole {
    #[default]
    Worker,
    Coordinator,
    System,
}

impl AgentRole {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentRole::Worker => "worker",
            AgentRole::Coordinator => "coordinator",
            AgentRole::System => "system",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "worker" => Ok(AgentRole::Worker),
            "coordinator" => Ok(AgentRole::Coordinator),
            "system" => Ok(AgentRole::System),
            _ => Err(EnumParseError {
                type_name: "AgentRole",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentRole {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Status of a Project/Team/Swarm container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContainerStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ContainerStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContainerStatus::Active => "active",
            ContainerStatus::Archived => "archived",
            ContainerStatus::Deleted => "deleted",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "active" => Ok(ContainerStatus::Active),
            "archived" => Ok(ContainerStatus::Archived),
            "deleted" => Ok(ContainerStatus::Deleted),
            _ => Err(EnumParseError {
                type_name: "ContainerStatus",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// MEMORY ENTRY ENUMS
// ============================================================================

/// The closed set of entry kinds. `Cache`-kind entries are promotable
/// between cache tiers; `Session`-kind entries stay pinned to L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MemoryKind {
    #[default]
    State,
    Data,
    Cache,
    Session,
    Artifact,
}

impl MemoryKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryKind::State => "state",
            MemoryKind::Data => "data",
            MemoryKind::Cache => "cache",
            MemoryKind::Session => "session",
            MemoryKind::Artifact => "artifact",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "state" => Ok(MemoryKind::State),
            "data" => Ok(MemoryKind::Data),
            "cache" => Ok(MemoryKind::Cache),
            "session" => Ok(MemoryKind::Session),
            "artifact" => Ok(MemoryKind::Artifact),
            _ => Err(EnumParseError {
                type_name: "MemoryKind",
                input: s.to_string(),
            }),
        }
    }

    /// Whether an entry of this kind may be promoted above L1.
    pub fn is_promotable(&self) -> bool {
        !matches!(self, MemoryKind::Session)
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemoryKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Compression applied to a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Gzip,
}

impl Compression {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Gzip => "gzip",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "gzip" => Ok(Compression::Gzip),
            _ => Err(EnumParseError {
                type_name: "Compression",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Compression {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Encryption mode applied to a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EncryptionMode {
    #[default]
    None,
    Aead,
}

impl EncryptionMode {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "none",
            EncryptionMode::Aead => "aead",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "none" => Ok(EncryptionMode::None),
            "aead" => Ok(EncryptionMode::Aead),
            _ => Err(EnumParseError {
                type_name: "EncryptionMode",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// ENCRYPTION KEY ENUMS
// ============================================================================

/// Lifecycle status of an encryption key. At most one key is `Active`;
/// `Retired` keys decrypt but never encrypt; `Compromised` keys decrypt
/// only to allow forced re-encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyStatus {
    #[default]
    Active,
    Retired,
    Compromised,
}

impl KeyStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
            KeyStatus::Compromised => "compromised",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "active" => Ok(KeyStatus::Active),
            "retired" => Ok(KeyStatus::Retired),
            "compromised" => Ok(KeyStatus::Compromised),
            _ => Err(EnumParseError {
                type_name: "KeyStatus",
                input: s.to_string(),
            }),
        }
    }

    /// Whether the key may still be used to encrypt new payloads.
    pub fn can_encrypt(&self) -> bool {
        matches!(self, KeyStatus::Active)
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for KeyStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Why a key rotation occurred; recorded on the rotation's audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotationCause {
    Scheduled,
    Manual,
    Compromise,
}

impl fmt::Display for RotationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            RotationCause::Scheduled => "scheduled",
            RotationCause::Manual => "manual",
            RotationCause::Compromise => "compromise",
        };
        write!(f, "{}", value)
    }
}

// ============================================================================
// TTL
// ============================================================================

/// Time-to-live for a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ttl {
    /// Never expires.
    Persistent,
    /// Expires `seconds` after it was written.
    Seconds(u64),
}

impl Ttl {
    /// Duration in seconds, if bounded.
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            Ttl::Persistent => None,
            Ttl::Seconds(s) => Some(*s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acl_level_ordering() {
        assert!(ACLLevel::Private < ACLLevel::Team);
        assert!(ACLLevel::Team < ACLLevel::Swarm);
        assert!(ACLLevel::Project < ACLLevel::Public);
        assert!(ACLLevel::Public < ACLLevel::System);
    }

    #[test]
    fn test_acl_level_roundtrip() {
        for level in [
            ACLLevel::Private,
            ACLLevel::Team,
            ACLLevel::Swarm,
            ACLLevel::Project,
            ACLLevel::Public,
            ACLLevel::System,
        ] {
            let parsed = ACLLevel::from_u8(level.as_u8()).unwrap();
            assert_eq!(level, parsed);
            let from_display: ACLLevel = level.to_string().parse().unwrap();
            assert_eq!(level, from_display);
        }
    }

    #[test]
    fn test_agent_status_roundtrip() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Inactive,
            AgentStatus::Suspended,
            AgentStatus::Terminated,
        ] {
            let s = status.as_db_str();
            assert_eq!(AgentStatus::from_db_str(s).unwrap(), status);
        }
        assert!(AgentStatus::Active.is_active());
        assert!(!AgentStatus::Suspended.is_active());
    }

    #[test]
    fn test_memory_kind_promotability() {
        assert!(MemoryKind::Cache.is_promotable());
        assert!(!MemoryKind::Session.is_promotable());
    }

    #[test]
    fn test_key_status_can_encrypt() {
        assert!(KeyStatus::Active.can_encrypt());
        assert!(!KeyStatus::Retired.can_encrypt());
        assert!(!KeyStatus::Compromised.can_encrypt());
    }

    #[test]
    fn test_invalid_enum_rejected() {
        assert!(ACLLevel::from_str("nonsense").is_err());
        assert!(Compression::from_db_str("zstd").is_err());
    }
}

//! Error taxonomy for the swarm memory engine.
//!
//! One `thiserror` enum per concern (`StoreError`, `AclError`, `CacheError`,
//! `CryptoError`), composed into a single top-level `SwarmMemError` via
//! `#[from]`. `ErrorKind` is the closed classification callers switch on —
//! see `DESIGN.md` for why deny-reasons and error kinds are tagged variants
//! rather than exceptions.

use crate::{AgentId, DenyReason, EntryId, KeyId};
use thiserror::Error;

/// Persistent store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("entry not found: {entry_id:?}")]
    NotFound { entry_id: Option<EntryId> },

    #[error("unique-index contention on logical key after retry budget exhausted")]
    Conflict,

    #[error("checksum mismatch on stored entry {entry_id}; entry quarantined")]
    Corruption { entry_id: EntryId },

    #[error("storage backend error: {reason}")]
    Backend { reason: String },
}

/// ACL enforcer errors. Most deny outcomes are not errors at all —
/// they are `Decision::Deny(DenyReason)` values — this variant exists for
/// the enforcer's own internal failures (e.g. a malformed permission row).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("access denied for agent {agent_id}: {action} on {resource}, reason: {reason}")]
    Denied {
        agent_id: AgentId,
        action: String,
        resource: String,
        reason: DenyReason,
    },

    #[error("malformed permission grant: {reason}")]
    MalformedGrant { reason: String },
}

/// Multi-layer cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("cache entry for a lower tier failed its integrity check")]
    Corruption,
}

/// Encryption key manager errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("no active encryption key")]
    NoActiveKey,

    #[error("key {key_id} not found")]
    KeyNotFound { key_id: KeyId },

    #[error("encryption failed: {reason}")]
    EncryptFailed { reason: String },

    #[error("decryption or tag verification failed: {reason}")]
    DecryptFailed { reason: String },

    #[error("key wrapping/unwrapping failed: {reason}")]
    KeyWrapFailed { reason: String },
}

/// Master error type for all swarm memory operations.
#[derive(Debug, Clone, Error)]
pub enum SwarmMemError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("acl error: {0}")]
    Acl(#[from] AclError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

/// Closed classification of a `SwarmMemError`, used by callers that want to
/// branch on outcome shape without matching every inner variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    AccessDenied,
    NotFound,
    Conflict,
    Timeout,
    CryptoFailure,
    Corruption,
    Unavailable,
    Internal,
}

impl SwarmMemError {
    /// Classify this error into its `ErrorKind`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmMemError::Store(StoreError::InvalidInput { .. }) => ErrorKind::InvalidInput,
            SwarmMemError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            SwarmMemError::Store(StoreError::Conflict) => ErrorKind::Conflict,
            SwarmMemError::Store(StoreError::Corruption { .. }) => ErrorKind::Corruption,
            SwarmMemError::Store(StoreError::Backend { .. }) => ErrorKind::Internal,
            SwarmMemError::Acl(AclError::Denied { .. }) => ErrorKind::AccessDenied,
            SwarmMemError::Acl(AclError::MalformedGrant { .. }) => ErrorKind::Internal,
            SwarmMemError::Cache(CacheError::TierUnavailable { .. }) => ErrorKind::Unavailable,
            SwarmMemError::Cache(CacheError::Corruption) => ErrorKind::Corruption,
            SwarmMemError::Crypto(_) => ErrorKind::CryptoFailure,
            SwarmMemError::Timeout { .. } => ErrorKind::Timeout,
            SwarmMemError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error is an expected outcome (`NotFound`/`AccessDenied`)
    /// that should propagate as a value rather than be treated as failure.
    pub fn is_expected_outcome(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::AccessDenied)
    }

    /// Whether the caller may retry this operation at its own policy.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Timeout)
    }
}

/// Result type alias for swarm memory operations.
pub type SwarmMemResult<T> = Result<T, SwarmMemError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_not_found_is_expected_outcome() {
        let err: SwarmMemError = StoreError::NotFound { entry_id: None }.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_expected_outcome());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_access_denied_is_expected_outcome() {
        use crate::EntityIdType;
        let err: SwarmMemError = AclError::Denied {
            agent_id: AgentId::new(Uuid::nil()),
            action: "read".to_string(),
            resource: "entry:k".to_string(),
            reason: DenyReason::ProjectMismatch,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(err.is_expected_outcome());
    }

    #[test]
    fn test_conflict_is_retriable() {
        let err: SwarmMemError = StoreError::Conflict.into();
        assert!(err.is_retriable());
        assert!(!err.is_expected_outcome());
    }

    #[test]
    fn test_crypto_failure_classification() {
        let err: SwarmMemError = CryptoError::NoActiveKey.into();
        assert_eq!(err.kind(), ErrorKind::CryptoFailure);
    }

    #[test]
    fn test_cache_unavailable_classification() {
        let err: SwarmMemError = CacheError::TierUnavailable {
            tier: "L2".to_string(),
            reason: "lmdb env locked".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}

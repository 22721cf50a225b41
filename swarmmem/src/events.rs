//! Events broadcast to subscribers of a `SwarmMemory` instance.

use serde::{Deserialize, Serialize};
use swarmmem_core::{AgentId, DenyReason, EntryId, GrantedEntity, KeyId, PermissionId, RotationCause, SwarmId};

/// A notable mutation or access outcome, broadcast over an internal
/// channel so callers can drive dashboards, WS fan-out, or log shipping
/// without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SwarmEvent {
    EntrySet {
        entry_id: EntryId,
        swarm_id: SwarmId,
        namespace: String,
        key: Vec<u8>,
    },
    EntryDeleted {
        swarm_id: SwarmId,
        namespace: String,
        key: Vec<u8>,
    },
    NamespaceCleared {
        swarm_id: SwarmId,
        namespace: String,
        removed: u64,
    },
    SwarmCleared {
        swarm_id: SwarmId,
    },
    PermissionGranted {
        permission_id: PermissionId,
        entity: GrantedEntity,
    },
    PermissionRevoked {
        permission_id: PermissionId,
    },
    KeyRotated {
        key_id: KeyId,
        cause: RotationCause,
    },
    KeyCompromised {
        key_id: KeyId,
    },
    AccessDenied {
        agent_id: AgentId,
        resource: String,
        reason: DenyReason,
    },
}

impl SwarmEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SwarmEvent::EntrySet { .. } => "EntrySet",
            SwarmEvent::EntryDeleted { .. } => "EntryDeleted",
            SwarmEvent::NamespaceCleared { .. } => "NamespaceCleared",
            SwarmEvent::SwarmCleared { .. } => "SwarmCleared",
            SwarmEvent::PermissionGranted { .. } => "PermissionGranted",
            SwarmEvent::PermissionRevoked { .. } => "PermissionRevoked",
            SwarmEvent::KeyRotated { .. } => "KeyRotated",
            SwarmEvent::KeyCompromised { .. } => "KeyCompromised",
            SwarmEvent::AccessDenied { .. } => "AccessDenied",
        }
    }
}

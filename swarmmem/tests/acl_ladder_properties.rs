//! Property coverage for the ACL level ladder's deny-reason plumbing: a
//! fresh (non-cached) evaluation against a mismatched entry must report the
//! specific ladder reason, never the generic grant-fallback reason, and a
//! matched-ladder-but-ungranted write must still report the generic reason.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use swarmmem_acl::{AclEnforcer, Decision, RequestContext};
use swarmmem_core::{ACLLevel, Action, Agent, AgentId, AgentRole, AgentStatus, DenyReason, ProjectId, SwarmId, TeamId};
use swarmmem_storage::{MockStorage, StorageTrait};
use swarmmem_test_utils::fixtures::sample_entry;

fn agent(swarm_id: SwarmId, team_id: Option<TeamId>, project_id: Option<ProjectId>) -> Agent {
    let now = chrono::Utc::now();
    Agent {
        agent_id: AgentId::now_v7(),
        identifier: "probe".to_string(),
        display_name: "Probe".to_string(),
        role: AgentRole::Worker,
        status: AgentStatus::Active,
        swarm_id,
        team_id,
        project_id,
        default_acl_level: ACLLevel::Private,
        created_at: now,
        updated_at: now,
    }
}

fn enforcer() -> AclEnforcer {
    let storage: Arc<dyn StorageTrait> = Arc::new(MockStorage::new());
    AclEnforcer::new(storage, 1000, Duration::from_secs(60))
}

/// Builds an (owner, stranger, entry) triple where `stranger` mismatches
/// `entry`'s attributes at exactly the dimension `level` checks.
fn mismatched_case(level: ACLLevel) -> (Agent, Agent, swarmmem_core::MemoryEntry, DenyReason) {
    let swarm_id = SwarmId::now_v7();
    let owner = agent(swarm_id, None, None);
    let mut entry = sample_entry(swarm_id, "default", b"k", b"v");
    entry.agent_id = owner.agent_id;
    entry.acl_level = level;

    match level {
        ACLLevel::Private => {
            let stranger = agent(swarm_id, None, None);
            (owner, stranger, entry, DenyReason::NotOwner)
        }
        ACLLevel::Team => {
            let team_a = swarmmem_core::TeamId::now_v7();
            let team_b = swarmmem_core::TeamId::now_v7();
            entry.team_id = Some(team_a);
            let stranger = agent(swarm_id, Some(team_b), None);
            (owner, stranger, entry, DenyReason::TeamMismatch)
        }
        ACLLevel::Swarm => {
            let other_swarm = SwarmId::now_v7();
            let stranger = agent(other_swarm, None, None);
            (owner, stranger, entry, DenyReason::SwarmMismatch)
        }
        ACLLevel::Project => {
            let project_a = ProjectId::now_v7();
            let project_b = ProjectId::now_v7();
            entry.project_id = Some(project_a);
            let stranger = agent(swarm_id, None, Some(project_b));
            (owner, stranger, entry, DenyReason::ProjectMismatch)
        }
        _ => unreachable!("property only exercises the four attribute-matched ladder levels"),
    }
}

fn level_at(idx: u8) -> ACLLevel {
    match idx % 4 {
        0 => ACLLevel::Private,
        1 => ACLLevel::Team,
        2 => ACLLevel::Swarm,
        _ => ACLLevel::Project,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ladder_mismatch_reports_specific_reason(level_idx in 0u8..4) {
        let level = level_at(level_idx);
        let (_owner, stranger, entry, expected_reason) = mismatched_case(level);
        let acl = enforcer();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let decision = rt
            .block_on(acl.evaluate(&stranger, &entry, Action::Read, chrono::Utc::now(), RequestContext::default()))
            .unwrap();

        prop_assert_eq!(decision, Decision::Deny(expected_reason));
    }

    #[test]
    fn ladder_match_without_grant_still_reports_no_grant(level_idx in 0u8..4) {
        // Re-derive the matching (non-mismatched) counterpart: same swarm,
        // same team/project as the entry, peer distinct from the owner.
        let level = level_at(level_idx);
        let swarm_id = SwarmId::now_v7();
        let owner = agent(swarm_id, None, None);
        let mut entry = sample_entry(swarm_id, "default", b"k", b"v");
        entry.agent_id = owner.agent_id;
        entry.acl_level = level;

        let peer = match level {
            ACLLevel::Private => owner.clone(),
            ACLLevel::Team => {
                let team = swarmmem_core::TeamId::now_v7();
                entry.team_id = Some(team);
                agent(swarm_id, Some(team), None)
            }
            ACLLevel::Swarm => agent(swarm_id, None, None),
            ACLLevel::Project => {
                let project = ProjectId::now_v7();
                entry.project_id = Some(project);
                agent(swarm_id, None, Some(project))
            }
            _ => unreachable!(),
        };
        if level == ACLLevel::Private {
            // The owner always gets default write/delete; there's no
            // ungranted-write case to probe here.
            return Ok(());
        }

        let acl = enforcer();
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let decision = rt
            .block_on(acl.evaluate(&peer, &entry, Action::Write, chrono::Utc::now(), RequestContext::default()))
            .unwrap();

        prop_assert_eq!(decision, Decision::Deny(DenyReason::NoGrant));
    }
}

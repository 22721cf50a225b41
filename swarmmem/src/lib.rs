//! Namespaced, ACL-enforced, AEAD-encrypted, three-tier-cached key/value
//! memory store for multi-tenant agent swarms.
//!
//! [`SwarmMemory`] is the single entry point. Build one with
//! [`SwarmMemory::initialize`] (opens its own SQLite store) or
//! [`SwarmMemory::new`] (wire an existing [`StorageTrait`] implementation,
//! e.g. for tests), then call its methods under an [`ActorContext`].
//!
//! [`StorageTrait`]: swarmmem_storage::StorageTrait

mod actor;
mod background;
mod events;
mod facade;
mod l2;
mod metrics;
mod options;
mod seal;

pub use actor::ActorContext;
pub use events::SwarmEvent;
pub use facade::SwarmMemory;
pub use metrics::{AtomicCounters, MetricsSnapshot};
pub use options::{ClearScope, SetOptions};

pub use swarmmem_storage::cache::Freshness;

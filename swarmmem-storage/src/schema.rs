//! Embedded schema, applied once by `SqliteStorage::open`.
//!
//! Mirrors the entity set in `swarmmem_core::entities`: one table per
//! entity, plus `acl_carrier_rows` — a single table standing in for the
//! handful of auxiliary tables (events/tasks/consensus/dependencies/
//! conflicts/artifacts) that the upstream system ACL-checks but otherwise
//! attaches no invariants to (see `DESIGN.md`). They share one schema
//! because the core enforces nothing beyond `acl_level` on any of them.

pub const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS swarms (
    swarm_id        TEXT PRIMARY KEY,
    identifier      TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL,
    owner_agent_id  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    project_id      TEXT PRIMARY KEY,
    identifier      TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL,
    owner_agent_id  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teams (
    team_id         TEXT PRIMARY KEY,
    identifier      TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL,
    owner_agent_id  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id          TEXT PRIMARY KEY,
    identifier        TEXT NOT NULL UNIQUE,
    display_name      TEXT NOT NULL,
    role              TEXT NOT NULL,
    status            TEXT NOT NULL,
    swarm_id          TEXT NOT NULL REFERENCES swarms(swarm_id),
    team_id           TEXT REFERENCES teams(team_id),
    project_id        TEXT REFERENCES projects(project_id),
    default_acl_level INTEGER NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agents_swarm ON agents(swarm_id);

CREATE TABLE IF NOT EXISTS memory_entries (
    entry_id          TEXT PRIMARY KEY,
    key               BLOB NOT NULL,
    namespace         TEXT NOT NULL,
    value_blob        BLOB NOT NULL,
    kind              TEXT NOT NULL,

    agent_id          TEXT NOT NULL,
    team_id           TEXT,
    project_id        TEXT,
    swarm_id          TEXT NOT NULL,

    acl_level         INTEGER NOT NULL,
    compression       TEXT NOT NULL,
    encryption        TEXT NOT NULL,
    iv                BLOB,
    tag               BLOB,
    key_id            TEXT,

    version           INTEGER NOT NULL,
    parent_entry_id   TEXT,
    ttl_seconds       INTEGER,
    expires_at        TEXT,

    access_count      INTEGER NOT NULL DEFAULT 0,
    last_accessed_at  TEXT,
    size_bytes        INTEGER NOT NULL,
    checksum          BLOB NOT NULL,

    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,

    is_current        INTEGER NOT NULL DEFAULT 1
);

-- Only one "current" row may exist per logical key; superseded versions
-- keep is_current = 0 and fall out of this index.
CREATE UNIQUE INDEX IF NOT EXISTS idx_memory_entries_logical_key
    ON memory_entries(key, namespace, swarm_id, project_id)
    WHERE is_current = 1;

CREATE INDEX IF NOT EXISTS idx_memory_entries_expiry ON memory_entries(expires_at)
    WHERE expires_at IS NOT NULL AND is_current = 1;

CREATE INDEX IF NOT EXISTS idx_memory_entries_key_id ON memory_entries(key_id)
    WHERE key_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS permissions (
    permission_id    TEXT PRIMARY KEY,
    entity_kind      TEXT NOT NULL,
    entity_id        TEXT NOT NULL,
    resource_type    TEXT NOT NULL,
    resource_id      TEXT,
    project_id       TEXT,
    level            INTEGER NOT NULL,
    actions          TEXT NOT NULL,
    conditions_json  TEXT,
    granted_by       TEXT NOT NULL,
    expires_at       TEXT,
    active            INTEGER NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_permissions_entity ON permissions(entity_kind, entity_id);

CREATE TABLE IF NOT EXISTS audit_log (
    audit_id          TEXT PRIMARY KEY,
    actor_id          TEXT NOT NULL,
    resource          TEXT NOT NULL,
    action            TEXT NOT NULL,
    previous_excerpt  TEXT,
    next_excerpt      TEXT,
    acl_level         INTEGER NOT NULL,
    risk_tag          TEXT NOT NULL,
    timestamp         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor_id, timestamp);

CREATE TABLE IF NOT EXISTS encryption_keys (
    key_id                 TEXT PRIMARY KEY,
    generation             INTEGER NOT NULL UNIQUE,
    key_material_wrapped   BLOB NOT NULL,
    algorithm              TEXT NOT NULL,
    created_at             TEXT NOT NULL,
    activated_at           TEXT,
    retired_at             TEXT,
    status                 TEXT NOT NULL
);

-- Generic ACL-carrying rows for the auxiliary entity kinds the upstream
-- system enforces row-level access on but attaches no further semantics
-- to (events, tasks, consensus, dependencies, conflicts, artifacts).
CREATE TABLE IF NOT EXISTS acl_carrier_rows (
    row_id       TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    swarm_id     TEXT NOT NULL,
    project_id   TEXT,
    team_id      TEXT,
    agent_id     TEXT NOT NULL,
    acl_level    INTEGER NOT NULL,
    payload      BLOB NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_acl_carrier_rows_kind ON acl_carrier_rows(kind, swarm_id);
"#;

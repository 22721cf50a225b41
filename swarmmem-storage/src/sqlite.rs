//! `rusqlite`-backed `StorageTrait` implementation.
//!
//! A single writer connection serializes mutations; a pool of reader
//! connections serves concurrent reads under WAL mode. Every method
//! dispatches its synchronous `rusqlite` work onto the blocking pool via
//! `tokio::task::spawn_blocking`, matching the "single dedicated writer
//! task per underlying database connection" concurrency model.

use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use swarmmem_core::{
    ACLLevel, Action, ActionSet, AgentId, AuditId, AuditRecord, Compression, ContentHash,
    EncryptionKey, EncryptionMode, EntityIdType, EntryId, GrantedEntity, KeyId, KeyStatus,
    LogicalKey, MemoryEntry, MemoryKind, Permission, PermissionConditions, PermissionId,
    ProjectId, StoreError, SwarmId, SwarmMemError, SwarmMemResult, TeamId, Timestamp,
};
use tracing::{debug, warn};

use crate::{EntryKey, StorageStatistics, StorageTrait};

/// A small blocking pool of read-only connections, handed out via a
/// channel so acquiring one never contends on a single mutex.
struct ReaderPool {
    receiver: Mutex<mpsc::Receiver<Connection>>,
    sender: mpsc::Sender<Connection>,
}

impl ReaderPool {
    fn new(path: &str, size: u32, busy_timeout: Duration) -> rusqlite::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        for _ in 0..size.max(1) {
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "busy_timeout", busy_timeout.as_millis() as u64)?;
            conn.pragma_update(None, "journal_mode", "wal")?;
            sender.send(conn).expect("receiver held by the same struct");
        }
        Ok(Self {
            receiver: Mutex::new(receiver),
            sender,
        })
    }

    fn acquire(&self) -> Connection {
        self.receiver
            .lock()
            .unwrap()
            .recv()
            .expect("sender is never dropped while the pool is alive")
    }

    fn release(&self, conn: Connection) {
        let _ = self.sender.send(conn);
    }
}

/// Persistent store backed by an embedded SQLite database.
pub struct SqliteStorage {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<ReaderPool>,
}

fn backend_err(e: rusqlite::Error) -> SwarmMemError {
    StoreError::Backend {
        reason: e.to_string(),
    }
    .into()
}

async fn join_blocking<T: Send + 'static>(
    f: impl FnOnce() -> SwarmMemResult<T> + Send + 'static,
) -> SwarmMemResult<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Backend {
            reason: format!("blocking task panicked: {e}"),
        }
        .into()),
    }
}

impl SqliteStorage {
    /// Open (creating if absent) the database at `path`, apply the schema,
    /// and build a reader pool of `reader_pool_size` connections.
    pub fn open<P: AsRef<Path>>(
        path: P,
        busy_timeout: Duration,
        reader_pool_size: u32,
    ) -> SwarmMemResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let writer = Connection::open(&path_str).map_err(backend_err)?;
        writer
            .pragma_update(None, "journal_mode", "wal")
            .map_err(backend_err)?;
        writer
            .pragma_update(None, "busy_timeout", busy_timeout.as_millis() as u64)
            .map_err(backend_err)?;
        writer
            .execute_batch(crate::schema::SCHEMA_SQL)
            .map_err(backend_err)?;

        let readers =
            ReaderPool::new(&path_str, reader_pool_size, busy_timeout).map_err(backend_err)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
        })
    }

    /// Open an in-memory database, used by tests that want real SQL
    /// semantics without a file on disk.
    pub fn open_in_memory() -> SwarmMemResult<Self> {
        let writer = Connection::open_in_memory().map_err(backend_err)?;
        writer
            .execute_batch(crate::schema::SCHEMA_SQL)
            .map_err(backend_err)?;
        // A single shared in-memory connection also serves reads; the pool
        // contract still holds since everything routes through spawn_blocking.
        let conn2 = Connection::open_in_memory().map_err(backend_err)?;
        conn2
            .execute_batch(crate::schema::SCHEMA_SQL)
            .map_err(backend_err)?;
        let (sender, receiver) = mpsc::channel();
        sender.send(conn2).unwrap();
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(ReaderPool {
                receiver: Mutex::new(receiver),
                sender,
            }),
        })
    }
}

fn parse_enum<T, F>(col: &str, value: &str, parse: F) -> rusqlite::Result<T>
where
    F: Fn(&str) -> Result<T, swarmmem_core::EnumParseError>,
{
    parse(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("column {col}: {e}").into(),
        )
    })
}

fn parse_uuid_col<T: EntityIdType>(s: &str) -> rusqlite::Result<T> {
    uuid::Uuid::parse_str(s)
        .map(T::new)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_memory_entry(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let key_id_str: Option<String> = row.get("key_id")?;
    let team_id_str: Option<String> = row.get("team_id")?;
    let project_id_str: Option<String> = row.get("project_id")?;
    let parent_id_str: Option<String> = row.get("parent_entry_id")?;
    let iv_blob: Option<Vec<u8>> = row.get("iv")?;
    let tag_blob: Option<Vec<u8>> = row.get("tag")?;
    let checksum_blob: Vec<u8> = row.get("checksum")?;

    let mut checksum: ContentHash = [0u8; 32];
    checksum.copy_from_slice(&checksum_blob);

    let iv = iv_blob.map(|b| {
        let mut arr = [0u8; 12];
        arr.copy_from_slice(&b);
        arr
    });
    let tag = tag_blob.map(|b| {
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&b);
        arr
    });

    Ok(MemoryEntry {
        entry_id: parse_uuid_col(&row.get::<_, String>("entry_id")?)?,
        key: row.get::<_, Vec<u8>>("key")?,
        namespace: row.get("namespace")?,
        value_blob: row.get("value_blob")?,
        kind: parse_enum("kind", &row.get::<_, String>("kind")?, MemoryKind::from_db_str)?,
        agent_id: parse_uuid_col(&row.get::<_, String>("agent_id")?)?,
        team_id: team_id_str.map(|s| parse_uuid_col::<TeamId>(&s)).transpose()?,
        project_id: project_id_str
            .map(|s| parse_uuid_col::<ProjectId>(&s))
            .transpose()?,
        swarm_id: parse_uuid_col(&row.get::<_, String>("swarm_id")?)?,
        acl_level: {
            let v: i64 = row.get("acl_level")?;
            ACLLevel::from_u8(v as u8).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Integer,
                    e.to_string().into(),
                )
            })?
        },
        compression: parse_enum(
            "compression",
            &row.get::<_, String>("compression")?,
            Compression::from_db_str,
        )?,
        encryption: parse_enum(
            "encryption",
            &row.get::<_, String>("encryption")?,
            EncryptionMode::from_db_str,
        )?,
        iv,
        tag,
        key_id: key_id_str.map(|s| parse_uuid_col::<KeyId>(&s)).transpose()?,
        version: row.get::<_, i64>("version")? as u64,
        parent_entry_id: parent_id_str
            .map(|s| parse_uuid_col::<EntryId>(&s))
            .transpose()?,
        ttl_seconds: row.get::<_, Option<i64>>("ttl_seconds")?.map(|v| v as u64),
        expires_at: row.get("expires_at")?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        last_accessed_at: row.get("last_accessed_at")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        checksum,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_permission(row: &Row<'_>) -> rusqlite::Result<Permission> {
    let entity_kind: String = row.get("entity_kind")?;
    let entity_id: String = row.get("entity_id")?;
    let entity = match entity_kind.as_str() {
        "agent" => GrantedEntity::Agent(parse_uuid_col(&entity_id)?),
        "team" => GrantedEntity::Team(parse_uuid_col(&entity_id)?),
        "swarm" => GrantedEntity::Swarm(parse_uuid_col(&entity_id)?),
        "project" => GrantedEntity::Project(parse_uuid_col(&entity_id)?),
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown entity_kind {other}").into(),
            ))
        }
    };
    let actions_json: String = row.get("actions")?;
    let actions: ActionSet = serde_json::from_str(&actions_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conditions_json: Option<String> = row.get("conditions_json")?;
    let conditions = conditions_json
        .map(|s| serde_json::from_str::<PermissionConditions>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let project_id_str: Option<String> = row.get("project_id")?;

    Ok(Permission {
        permission_id: parse_uuid_col(&row.get::<_, String>("permission_id")?)?,
        entity,
        resource_type: row.get("resource_type")?,
        resource_id: row.get("resource_id")?,
        project_id: project_id_str.map(|s| parse_uuid_col::<ProjectId>(&s)).transpose()?,
        level: {
            let v: i64 = row.get("level")?;
            ACLLevel::from_u8(v as u8).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Integer,
                    e.to_string().into(),
                )
            })?
        },
        actions,
        conditions,
        granted_by: parse_uuid_col(&row.get::<_, String>("granted_by")?)?,
        expires_at: row.get("expires_at")?,
        active: row.get::<_, i64>("active")? != 0,
        created_at: row.get("created_at")?,
    })
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    Ok(AuditRecord {
        audit_id: parse_uuid_col(&row.get::<_, String>("audit_id")?)?,
        actor_id: parse_uuid_col(&row.get::<_, String>("actor_id")?)?,
        resource: row.get("resource")?,
        action: row.get("action")?,
        previous_excerpt: row.get("previous_excerpt")?,
        next_excerpt: row.get("next_excerpt")?,
        acl_level: {
            let v: i64 = row.get("acl_level")?;
            ACLLevel::from_u8(v as u8).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Integer,
                    e.to_string().into(),
                )
            })?
        },
        risk_tag: row.get("risk_tag")?,
        timestamp: row.get("timestamp")?,
    })
}

fn row_to_key(row: &Row<'_>) -> rusqlite::Result<EncryptionKey> {
    Ok(EncryptionKey {
        key_id: parse_uuid_col(&row.get::<_, String>("key_id")?)?,
        generation: row.get::<_, i64>("generation")? as u64,
        key_material_wrapped: row.get("key_material_wrapped")?,
        algorithm: row.get("algorithm")?,
        created_at: row.get("created_at")?,
        activated_at: row.get("activated_at")?,
        retired_at: row.get("retired_at")?,
        status: parse_enum("status", &row.get::<_, String>("status")?, KeyStatus::from_db_str)?,
    })
}

fn entity_kind_and_id(entity: GrantedEntity) -> (&'static str, String) {
    match entity {
        GrantedEntity::Agent(id) => ("agent", id.as_uuid().to_string()),
        GrantedEntity::Team(id) => ("team", id.as_uuid().to_string()),
        GrantedEntity::Swarm(id) => ("swarm", id.as_uuid().to_string()),
        GrantedEntity::Project(id) => ("project", id.as_uuid().to_string()),
    }
}

#[async_trait]
impl StorageTrait for SqliteStorage {
    async fn entry_put(&self, entry: MemoryEntry) -> SwarmMemResult<MemoryEntry> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let mut conn = writer.lock().unwrap();
            let tx = conn.transaction().map_err(backend_err)?;

            let existing_version: Option<i64> = tx
                .query_row(
                    "SELECT version FROM memory_entries
                     WHERE key = ?1 AND namespace = ?2 AND swarm_id = ?3
                       AND project_id IS ?4 AND is_current = 1",
                    params![
                        entry.key,
                        entry.namespace,
                        entry.swarm_id.as_uuid().to_string(),
                        entry.project_id.map(|p| p.as_uuid().to_string()),
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend_err)?;

            if let Some(existing_version) = existing_version {
                if entry.version as i64 <= existing_version {
                    return Err(StoreError::Conflict.into());
                }
                tx.execute(
                    "UPDATE memory_entries SET is_current = 0
                     WHERE key = ?1 AND namespace = ?2 AND swarm_id = ?3
                       AND project_id IS ?4 AND is_current = 1",
                    params![
                        entry.key,
                        entry.namespace,
                        entry.swarm_id.as_uuid().to_string(),
                        entry.project_id.map(|p| p.as_uuid().to_string()),
                    ],
                )
                .map_err(backend_err)?;
            }

            tx.execute(
                "INSERT INTO memory_entries (
                    entry_id, key, namespace, value_blob, kind,
                    agent_id, team_id, project_id, swarm_id,
                    acl_level, compression, encryption, iv, tag, key_id,
                    version, parent_entry_id, ttl_seconds, expires_at,
                    access_count, last_accessed_at, size_bytes, checksum,
                    created_at, updated_at, is_current
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5,
                    ?6, ?7, ?8, ?9,
                    ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19,
                    ?20, ?21, ?22, ?23,
                    ?24, ?25, 1
                )",
                params![
                    entry.entry_id.as_uuid().to_string(),
                    entry.key,
                    entry.namespace,
                    entry.value_blob,
                    entry.kind.as_db_str(),
                    entry.agent_id.as_uuid().to_string(),
                    entry.team_id.map(|t| t.as_uuid().to_string()),
                    entry.project_id.map(|p| p.as_uuid().to_string()),
                    entry.swarm_id.as_uuid().to_string(),
                    entry.acl_level.as_u8() as i64,
                    entry.compression.as_db_str(),
                    entry.encryption.as_db_str(),
                    entry.iv.map(|b| b.to_vec()),
                    entry.tag.map(|b| b.to_vec()),
                    entry.key_id.map(|k| k.as_uuid().to_string()),
                    entry.version as i64,
                    entry.parent_entry_id.map(|p| p.as_uuid().to_string()),
                    entry.ttl_seconds.map(|t| t as i64),
                    entry.expires_at,
                    entry.access_count as i64,
                    entry.last_accessed_at,
                    entry.size_bytes as i64,
                    entry.checksum.to_vec(),
                    entry.created_at,
                    entry.updated_at,
                ],
            )
            .map_err(backend_err)?;

            tx.commit().map_err(backend_err)?;
            Ok(entry)
        })
        .await
    }

    async fn entry_get_current(&self, key: &EntryKey) -> SwarmMemResult<Option<MemoryEntry>> {
        let readers = self.readers.clone();
        let (logical_key, namespace, swarm_id, project_id) = key.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = conn
                .query_row(
                    "SELECT * FROM memory_entries
                     WHERE key = ?1 AND namespace = ?2 AND swarm_id = ?3
                       AND project_id IS ?4 AND is_current = 1",
                    params![
                        logical_key,
                        namespace,
                        swarm_id.as_uuid().to_string(),
                        project_id.map(|p| p.as_uuid().to_string()),
                    ],
                    row_to_memory_entry,
                )
                .optional()
                .map_err(backend_err);
            readers.release(conn);
            result
        })
        .await
    }

    async fn entry_get_by_id(&self, entry_id: EntryId) -> SwarmMemResult<Option<MemoryEntry>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = conn
                .query_row(
                    "SELECT * FROM memory_entries WHERE entry_id = ?1",
                    params![entry_id.as_uuid().to_string()],
                    row_to_memory_entry,
                )
                .optional()
                .map_err(backend_err);
            readers.release(conn);
            result
        })
        .await
    }

    async fn entry_delete(&self, key: &EntryKey) -> SwarmMemResult<bool> {
        let writer = self.writer.clone();
        let (logical_key, namespace, swarm_id, project_id) = key.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let affected = conn
                .execute(
                    "DELETE FROM memory_entries
                     WHERE key = ?1 AND namespace = ?2 AND swarm_id = ?3
                       AND project_id IS ?4 AND is_current = 1",
                    params![
                        logical_key,
                        namespace,
                        swarm_id.as_uuid().to_string(),
                        project_id.map(|p| p.as_uuid().to_string()),
                    ],
                )
                .map_err(backend_err)?;
            Ok(affected > 0)
        })
        .await
    }

    async fn entry_clear_namespace(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
    ) -> SwarmMemResult<u64> {
        let writer = self.writer.clone();
        let namespace = namespace.to_string();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let affected = conn
                .execute(
                    "DELETE FROM memory_entries
                     WHERE namespace = ?1 AND swarm_id = ?2 AND project_id IS ?3 AND is_current = 1",
                    params![
                        namespace,
                        swarm_id.as_uuid().to_string(),
                        project_id.map(|p| p.as_uuid().to_string()),
                    ],
                )
                .map_err(backend_err)?;
            Ok(affected as u64)
        })
        .await
    }

    async fn entry_list_keys(
        &self,
        namespace: &str,
        swarm_id: SwarmId,
        project_id: Option<ProjectId>,
        prefix: Option<&[u8]>,
    ) -> SwarmMemResult<Vec<LogicalKey>> {
        let readers = self.readers.clone();
        let namespace = namespace.to_string();
        let prefix = prefix.map(|p| p.to_vec());
        join_blocking(move || {
            let conn = readers.acquire();
            let result = (|| -> SwarmMemResult<Vec<LogicalKey>> {
                let mut stmt = conn
                    .prepare(
                        "SELECT key FROM memory_entries
                         WHERE namespace = ?1 AND swarm_id = ?2 AND project_id IS ?3 AND is_current = 1",
                    )
                    .map_err(backend_err)?;
                let rows = stmt
                    .query_map(
                        params![
                            namespace,
                            swarm_id.as_uuid().to_string(),
                            project_id.map(|p| p.as_uuid().to_string()),
                        ],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .map_err(backend_err)?;
                let mut keys = Vec::new();
                for row in rows {
                    let k = row.map_err(backend_err)?;
                    if prefix.as_ref().map(|p| k.starts_with(p)).unwrap_or(true) {
                        keys.push(k);
                    }
                }
                Ok(keys)
            })();
            readers.release(conn);
            result
        })
        .await
    }

    async fn entry_touch_access(&self, entry_id: EntryId, at: Timestamp) -> SwarmMemResult<()> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            conn.execute(
                "UPDATE memory_entries SET access_count = access_count + 1, last_accessed_at = ?1
                 WHERE entry_id = ?2",
                params![at, entry_id.as_uuid().to_string()],
            )
            .map_err(backend_err)?;
            Ok(())
        })
        .await
    }

    async fn entry_sweep_expired(&self, now: Timestamp, batch_size: usize) -> SwarmMemResult<u64> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let affected = conn
                .execute(
                    "DELETE FROM memory_entries WHERE entry_id IN (
                        SELECT entry_id FROM memory_entries
                        WHERE is_current = 1 AND expires_at IS NOT NULL AND expires_at < ?1
                        LIMIT ?2
                    )",
                    params![now, batch_size as i64],
                )
                .map_err(backend_err)?;
            Ok(affected as u64)
        })
        .await
    }

    async fn entry_list_by_key_id(
        &self,
        key_id: KeyId,
        limit: usize,
    ) -> SwarmMemResult<Vec<EntryKey>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = (|| -> SwarmMemResult<Vec<EntryKey>> {
                let mut stmt = conn
                    .prepare(
                        "SELECT key, namespace, swarm_id, project_id FROM memory_entries
                         WHERE key_id = ?1 AND is_current = 1 LIMIT ?2",
                    )
                    .map_err(backend_err)?;
                let rows = stmt
                    .query_map(params![key_id.as_uuid().to_string(), limit as i64], |row| {
                        let key: Vec<u8> = row.get(0)?;
                        let namespace: String = row.get(1)?;
                        let swarm_id: String = row.get(2)?;
                        let project_id: Option<String> = row.get(3)?;
                        Ok((key, namespace, swarm_id, project_id))
                    })
                    .map_err(backend_err)?;
                let mut out = Vec::new();
                for row in rows {
                    let (key, namespace, swarm_id, project_id) = row.map_err(backend_err)?;
                    let swarm_id = parse_uuid_col::<SwarmId>(&swarm_id).map_err(backend_err)?;
                    let project_id = project_id
                        .map(|p| parse_uuid_col::<ProjectId>(&p))
                        .transpose()
                        .map_err(backend_err)?;
                    out.push((key, namespace, swarm_id, project_id));
                }
                Ok(out)
            })();
            readers.release(conn);
            result
        })
        .await
    }

    async fn stats(&self) -> SwarmMemResult<StorageStatistics> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = (|| -> SwarmMemResult<StorageStatistics> {
                let entry_count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM memory_entries WHERE is_current = 1",
                        [],
                        |r| r.get(0),
                    )
                    .map_err(backend_err)?;
                let total_bytes: i64 = conn
                    .query_row(
                        "SELECT COALESCE(SUM(size_bytes), 0) FROM memory_entries WHERE is_current = 1",
                        [],
                        |r| r.get(0),
                    )
                    .map_err(backend_err)?;
                let expired_pending_sweep: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM memory_entries
                         WHERE is_current = 1 AND expires_at IS NOT NULL AND expires_at < ?1",
                        params![Utc::now()],
                        |r| r.get(0),
                    )
                    .map_err(backend_err)?;
                Ok(StorageStatistics {
                    entry_count: entry_count as u64,
                    total_bytes: total_bytes as u64,
                    expired_pending_sweep: expired_pending_sweep as u64,
                })
            })();
            readers.release(conn);
            result
        })
        .await
    }

    async fn permission_insert(&self, permission: Permission) -> SwarmMemResult<Permission> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let (entity_kind, entity_id) = entity_kind_and_id(permission.entity);
            let actions_json = serde_json::to_string(&permission.actions).map_err(|e| {
                SwarmMemError::Internal {
                    reason: format!("serializing actions: {e}"),
                }
            })?;
            let conditions_json = permission
                .conditions
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| SwarmMemError::Internal {
                    reason: format!("serializing conditions: {e}"),
                })?;

            conn.execute(
                "INSERT INTO permissions (
                    permission_id, entity_kind, entity_id, resource_type, resource_id,
                    project_id, level, actions, conditions_json, granted_by,
                    expires_at, active, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    permission.permission_id.as_uuid().to_string(),
                    entity_kind,
                    entity_id,
                    permission.resource_type,
                    permission.resource_id,
                    permission.project_id.map(|p| p.as_uuid().to_string()),
                    permission.level.as_u8() as i64,
                    actions_json,
                    conditions_json,
                    permission.granted_by.as_uuid().to_string(),
                    permission.expires_at,
                    permission.active as i64,
                    permission.created_at,
                ],
            )
            .map_err(backend_err)?;
            Ok(permission)
        })
        .await
    }

    async fn permission_list_for_entity(
        &self,
        entity: GrantedEntity,
    ) -> SwarmMemResult<Vec<Permission>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let (entity_kind, entity_id) = entity_kind_and_id(entity);
            let result = (|| -> SwarmMemResult<Vec<Permission>> {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM permissions WHERE entity_kind = ?1 AND entity_id = ?2",
                    )
                    .map_err(backend_err)?;
                let rows = stmt
                    .query_map(params![entity_kind, entity_id], row_to_permission)
                    .map_err(backend_err)?;
                rows.map(|r| r.map_err(backend_err)).collect()
            })();
            readers.release(conn);
            result
        })
        .await
    }

    async fn permission_revoke(&self, permission_id: PermissionId) -> SwarmMemResult<bool> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let affected = conn
                .execute(
                    "UPDATE permissions SET active = 0 WHERE permission_id = ?1",
                    params![permission_id.as_uuid().to_string()],
                )
                .map_err(backend_err)?;
            Ok(affected > 0)
        })
        .await
    }

    async fn audit_append(&self, record: AuditRecord) -> SwarmMemResult<AuditId> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            conn.execute(
                "INSERT INTO audit_log (
                    audit_id, actor_id, resource, action, previous_excerpt,
                    next_excerpt, acl_level, risk_tag, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.audit_id.as_uuid().to_string(),
                    record.actor_id.as_uuid().to_string(),
                    record.resource,
                    record.action,
                    record.previous_excerpt,
                    record.next_excerpt,
                    record.acl_level.as_u8() as i64,
                    record.risk_tag,
                    record.timestamp,
                ],
            )
            .map_err(backend_err)?;
            Ok(record.audit_id)
        })
        .await
    }

    async fn audit_list_for_actor(
        &self,
        actor_id: AgentId,
        limit: usize,
    ) -> SwarmMemResult<Vec<AuditRecord>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = (|| -> SwarmMemResult<Vec<AuditRecord>> {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM audit_log WHERE actor_id = ?1
                         ORDER BY timestamp DESC LIMIT ?2",
                    )
                    .map_err(backend_err)?;
                let rows = stmt
                    .query_map(
                        params![actor_id.as_uuid().to_string(), limit as i64],
                        row_to_audit,
                    )
                    .map_err(backend_err)?;
                rows.map(|r| r.map_err(backend_err)).collect()
            })();
            readers.release(conn);
            result
        })
        .await
    }

    async fn key_insert(&self, key: EncryptionKey) -> SwarmMemResult<EncryptionKey> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            conn.execute(
                "INSERT INTO encryption_keys (
                    key_id, generation, key_material_wrapped, algorithm,
                    created_at, activated_at, retired_at, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key.key_id.as_uuid().to_string(),
                    key.generation as i64,
                    key.key_material_wrapped,
                    key.algorithm,
                    key.created_at,
                    key.activated_at,
                    key.retired_at,
                    key.status.as_db_str(),
                ],
            )
            .map_err(backend_err)?;
            Ok(key)
        })
        .await
    }

    async fn key_get(&self, key_id: KeyId) -> SwarmMemResult<Option<EncryptionKey>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = conn
                .query_row(
                    "SELECT * FROM encryption_keys WHERE key_id = ?1",
                    params![key_id.as_uuid().to_string()],
                    row_to_key,
                )
                .optional()
                .map_err(backend_err);
            readers.release(conn);
            result
        })
        .await
    }

    async fn key_get_active(&self) -> SwarmMemResult<Option<EncryptionKey>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = conn
                .query_row(
                    "SELECT * FROM encryption_keys WHERE status = 'active' LIMIT 1",
                    [],
                    row_to_key,
                )
                .optional()
                .map_err(backend_err);
            readers.release(conn);
            result
        })
        .await
    }

    async fn key_set_status(&self, key_id: KeyId, status: KeyStatus) -> SwarmMemResult<()> {
        let writer = self.writer.clone();
        join_blocking(move || {
            let conn = writer.lock().unwrap();
            let now: DateTime<Utc> = Utc::now();
            let affected = match status {
                KeyStatus::Active => conn
                    .execute(
                        "UPDATE encryption_keys SET status = ?1, activated_at = ?2 WHERE key_id = ?3",
                        params![status.as_db_str(), now, key_id.as_uuid().to_string()],
                    )
                    .map_err(backend_err)?,
                KeyStatus::Retired | KeyStatus::Compromised => conn
                    .execute(
                        "UPDATE encryption_keys SET status = ?1, retired_at = ?2 WHERE key_id = ?3",
                        params![status.as_db_str(), now, key_id.as_uuid().to_string()],
                    )
                    .map_err(backend_err)?,
            };
            if affected == 0 {
                warn!(key_id = %key_id, "key_set_status on unknown key");
                return Err(StoreError::NotFound { entry_id: None }.into());
            }
            debug!(key_id = %key_id, status = %status, "encryption key status updated");
            Ok(())
        })
        .await
    }

    async fn key_list(&self) -> SwarmMemResult<Vec<EncryptionKey>> {
        let readers = self.readers.clone();
        join_blocking(move || {
            let conn = readers.acquire();
            let result = (|| -> SwarmMemResult<Vec<EncryptionKey>> {
                let mut stmt = conn.prepare("SELECT * FROM encryption_keys").map_err(backend_err)?;
                let rows = stmt.query_map([], row_to_key).map_err(backend_err)?;
                rows.map(|r| r.map_err(backend_err)).collect()
            })();
            readers.release(conn);
            result
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmmem_core::{compute_content_hash, ACLLevel, Compression, EncryptionMode, MemoryKind};

    fn sample_entry(key: &[u8], namespace: &str, swarm_id: SwarmId, version: u64) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            entry_id: EntryId::now_v7(),
            key: key.to_vec(),
            namespace: namespace.to_string(),
            value_blob: b"payload".to_vec(),
            kind: MemoryKind::State,
            agent_id: AgentId::now_v7(),
            team_id: None,
            project_id: None,
            swarm_id,
            acl_level: ACLLevel::Private,
            compression: Compression::None,
            encryption: EncryptionMode::None,
            iv: None,
            tag: None,
            key_id: None,
            version,
            parent_entry_id: None,
            ttl_seconds: None,
            expires_at: None,
            access_count: 0,
            last_accessed_at: None,
            size_bytes: 7,
            checksum: compute_content_hash(b"payload"),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_current_roundtrip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        let entry = sample_entry(b"k1", "ns", swarm_id, 1);
        storage.entry_put(entry.clone()).await.unwrap();

        let key: EntryKey = (b"k1".to_vec(), "ns".to_string(), swarm_id, None);
        let fetched = storage.entry_get_current(&key).await.unwrap().unwrap();
        assert_eq!(fetched.entry_id, entry.entry_id);
        assert_eq!(fetched.value_blob, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_version_bump_supersedes_prior_row() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        let key: EntryKey = (b"k1".to_vec(), "ns".to_string(), swarm_id, None);

        storage
            .entry_put(sample_entry(b"k1", "ns", swarm_id, 1))
            .await
            .unwrap();
        let v2 = sample_entry(b"k1", "ns", swarm_id, 2);
        storage.entry_put(v2.clone()).await.unwrap();

        let fetched = storage.entry_get_current(&key).await.unwrap().unwrap();
        assert_eq!(fetched.entry_id, v2.entry_id);
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        storage
            .entry_put(sample_entry(b"k1", "ns", swarm_id, 5))
            .await
            .unwrap();
        let result = storage.entry_put(sample_entry(b"k1", "ns", swarm_id, 5)).await;
        assert!(matches!(
            result,
            Err(SwarmMemError::Store(StoreError::Conflict))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        let key: EntryKey = (b"k1".to_vec(), "ns".to_string(), swarm_id, None);
        storage
            .entry_put(sample_entry(b"k1", "ns", swarm_id, 1))
            .await
            .unwrap();

        assert!(storage.entry_delete(&key).await.unwrap());
        assert!(!storage.entry_delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        storage
            .entry_put(sample_entry(b"k1", "ns-a", swarm_id, 1))
            .await
            .unwrap();
        storage
            .entry_put(sample_entry(b"k1", "ns-b", swarm_id, 1))
            .await
            .unwrap();

        let keys_a = storage
            .entry_list_keys("ns-a", swarm_id, None, None)
            .await
            .unwrap();
        let keys_b = storage
            .entry_list_keys("ns-b", swarm_id, None, None)
            .await
            .unwrap();
        assert_eq!(keys_a.len(), 1);
        assert_eq!(keys_b.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_expired() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let swarm_id = SwarmId::now_v7();
        let now = Utc::now();

        let mut expired = sample_entry(b"expired", "ns", swarm_id, 1);
        expired.expires_at = Some(now - chrono::Duration::seconds(10));
        storage.entry_put(expired).await.unwrap();

        let mut live = sample_entry(b"live", "ns", swarm_id, 1);
        live.expires_at = Some(now + chrono::Duration::seconds(3600));
        storage.entry_put(live).await.unwrap();

        let swept = storage.entry_sweep_expired(now, 100).await.unwrap();
        assert_eq!(swept, 1);

        let remaining = storage.entry_list_keys("ns", swarm_id, None, None).await.unwrap();
        assert_eq!(remaining, vec![b"live".to_vec()]);
    }

    #[tokio::test]
    async fn test_key_lifecycle() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let key = EncryptionKey {
            key_id: KeyId::now_v7(),
            generation: 1,
            key_material_wrapped: vec![1, 2, 3],
            algorithm: "aes-256-gcm".to_string(),
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            status: KeyStatus::Active,
        };
        storage.key_insert(key.clone()).await.unwrap();

        let active = storage.key_get_active().await.unwrap().unwrap();
        assert_eq!(active.key_id, key.key_id);

        storage.key_set_status(key.key_id, KeyStatus::Retired).await.unwrap();
        assert!(storage.key_get_active().await.unwrap().is_none());

        let fetched = storage.key_get(key.key_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, KeyStatus::Retired);
        assert!(fetched.retired_at.is_some());
    }

    #[tokio::test]
    async fn test_permission_grant_revoke() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let agent_id = AgentId::now_v7();
        let now = Utc::now();
        let permission = Permission {
            permission_id: PermissionId::now_v7(),
            entity: GrantedEntity::Agent(agent_id),
            resource_type: "namespace".to_string(),
            resource_id: Some("ns".to_string()),
            project_id: None,
            level: ACLLevel::Team,
            actions: [Action::Read, Action::Write].into_iter().collect(),
            conditions: None,
            granted_by: AgentId::now_v7(),
            expires_at: None,
            active: true,
            created_at: now,
        };
        storage.permission_insert(permission.clone()).await.unwrap();

        let grants = storage
            .permission_list_for_entity(GrantedEntity::Agent(agent_id))
            .await
            .unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants[0].active);

        assert!(storage.permission_revoke(permission.permission_id).await.unwrap());
        let grants = storage
            .permission_list_for_entity(GrantedEntity::Agent(agent_id))
            .await
            .unwrap();
        assert!(!grants[0].active);
    }
}

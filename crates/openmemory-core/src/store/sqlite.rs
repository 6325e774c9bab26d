//! Embedded metadata store (SQLite)
//!
//! Separate reader/writer connections behind mutexes give interior
//! mutability, so the store is `Send + Sync` and the engine can hold it as
//! `Arc<dyn MetadataStore>` without an outer lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    metadata_from_json, metadata_to_json, query_terms, sectors_from_json, sectors_to_json,
    strings_from_json, strings_to_json, token_count, CorpusStats, MemoryFlags, MetadataStore,
    Result, StorageError, VectorMeta,
};
use crate::memory::{
    Memory, NamespaceRecord, Sector, StatRow, TemporalFact, UserSummary, Waypoint,
};

const MEMORY_COLUMNS: &str = "id, content, summary, namespaces, tags, metadata, primary_sector, \
     sectors, salience, decay_lambda, created_at, updated_at, last_seen_at, \
     fingerprinted, pending_vector, needs_reembed";

/// SQLite-backed metadata store.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("reader lock poisoned".to_string()))
    }

    fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
        Ok(Memory {
            id: row.get(0)?,
            content: row.get(1)?,
            summary: row.get(2)?,
            namespaces: strings_from_json(&row.get::<_, String>(3)?),
            tags: strings_from_json(&row.get::<_, String>(4)?),
            metadata: metadata_from_json(&row.get::<_, String>(5)?),
            primary_sector: Sector::parse_name(&row.get::<_, String>(6)?).unwrap_or_default(),
            sectors: sectors_from_json(&row.get::<_, String>(7)?),
            salience: row.get(8)?,
            decay_lambda: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            last_seen_at: row.get(12)?,
            fingerprinted: row.get::<_, i64>(13)? != 0,
            pending_vector: row.get::<_, i64>(14)? != 0,
            needs_reembed: row.get::<_, i64>(15)? != 0,
        })
    }

    fn fact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemporalFact> {
        Ok(TemporalFact {
            id: row.get(0)?,
            subject: row.get(1)?,
            predicate: row.get(2)?,
            object: row.get(3)?,
            namespace: row.get(4)?,
            valid_from: row.get(5)?,
            valid_to: row.get(6)?,
            confidence: row.get(7)?,
        })
    }

    fn insert_memory_tx(tx: &rusqlite::Transaction<'_>, memory: &Memory) -> Result<()> {
        tx.execute(
            "INSERT INTO memories (
                id, content, summary, namespaces, tags, metadata, primary_sector,
                sectors, salience, decay_lambda, created_at, updated_at,
                last_seen_at, token_count, fingerprinted, pending_vector, needs_reembed
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17
            )",
            params![
                memory.id,
                memory.content,
                memory.summary,
                strings_to_json(&memory.namespaces),
                strings_to_json(&memory.tags),
                metadata_to_json(&memory.metadata),
                memory.primary_sector.as_str(),
                sectors_to_json(&memory.sectors),
                memory.salience,
                memory.decay_lambda,
                memory.created_at,
                memory.updated_at,
                memory.last_seen_at,
                token_count(&memory.content),
                memory.fingerprinted as i64,
                memory.pending_vector as i64,
                memory.needs_reembed as i64,
            ],
        )?;
        for namespace in &memory.namespaces {
            tx.execute(
                "INSERT OR IGNORE INTO memory_namespaces (memory_id, namespace) VALUES (?1, ?2)",
                params![memory.id, namespace],
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert_memory(&self, memory: &Memory, vectors: &[VectorMeta]) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        Self::insert_memory_tx(&tx, memory)?;
        for v in vectors {
            tx.execute(
                "INSERT OR REPLACE INTO vector_meta (memory_id, sector, namespace, dim, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![v.memory_id, v.sector.as_str(), v.namespace, v.dim as i64, v.created_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        let changed = tx.execute(
            "UPDATE memories SET
                content = ?2, summary = ?3, namespaces = ?4, tags = ?5, metadata = ?6,
                primary_sector = ?7, sectors = ?8, salience = ?9, decay_lambda = ?10,
                updated_at = ?11, last_seen_at = ?12, token_count = ?13,
                fingerprinted = ?14, pending_vector = ?15, needs_reembed = ?16
             WHERE id = ?1",
            params![
                memory.id,
                memory.content,
                memory.summary,
                strings_to_json(&memory.namespaces),
                strings_to_json(&memory.tags),
                metadata_to_json(&memory.metadata),
                memory.primary_sector.as_str(),
                sectors_to_json(&memory.sectors),
                memory.salience,
                memory.decay_lambda,
                memory.updated_at,
                memory.last_seen_at,
                token_count(&memory.content),
                memory.fingerprinted as i64,
                memory.pending_vector as i64,
                memory.needs_reembed as i64,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(memory.id.clone()));
        }
        tx.execute(
            "DELETE FROM memory_namespaces WHERE memory_id = ?1",
            params![memory.id],
        )?;
        for namespace in &memory.namespaces {
            tx.execute(
                "INSERT OR IGNORE INTO memory_namespaces (memory_id, namespace) VALUES (?1, ?2)",
                params![memory.id, namespace],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_memory(&self, id: &str) -> Result<bool> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        tx.execute(
            "DELETE FROM waypoints WHERE src_id = ?1 OR dst_id = ?1",
            params![id],
        )?;
        let changed = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    async fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
        let memory = reader
            .query_row(&sql, params![id], Self::memory_from_row)
            .optional()?;
        Ok(memory)
    }

    async fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let reader = self.reader()?;
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM memories WHERE id IN ({})",
            MEMORY_COLUMNS, placeholders
        );
        let mut stmt = reader.prepare(&sql)?;
        let params_vec: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_vec.as_slice(), Self::memory_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn list_memories(
        &self,
        namespace: Option<&str>,
        sector: Option<Sector>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut sql = format!("SELECT {} FROM memories m", MEMORY_COLUMNS);
        let mut clauses: Vec<String> = Vec::new();
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = Vec::new();

        if let Some(ns) = &namespace {
            sql.push_str(" JOIN memory_namespaces mn ON mn.memory_id = m.id");
            clauses.push("mn.namespace = ?1".to_string());
            params_vec.push(ns as &dyn rusqlite::ToSql);
        }
        let sector_str = sector.map(|s| s.as_str().to_string());
        if let Some(s) = &sector_str {
            clauses.push(format!("m.primary_sector = ?{}", params_vec.len() + 1));
            params_vec.push(s as &dyn rusqlite::ToSql);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY m.created_at DESC LIMIT {} OFFSET {}",
            limit.max(0),
            offset.max(0)
        ));

        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_vec.as_slice(), Self::memory_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn count_memories(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?)
    }

    async fn count_by_namespace(&self) -> Result<HashMap<String, i64>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT namespace, COUNT(*) FROM memory_namespaces GROUP BY namespace")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn count_by_sector(&self) -> Result<HashMap<String, i64>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT primary_sector, COUNT(*) FROM memories GROUP BY primary_sector")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn count_fingerprinted(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE fingerprinted = 1",
            [],
            |r| r.get(0),
        )?)
    }

    async fn set_flags(&self, id: &str, flags: MemoryFlags) -> Result<()> {
        let writer = self.writer()?;
        let mut sets: Vec<String> = Vec::new();
        if let Some(v) = flags.fingerprinted {
            sets.push(format!("fingerprinted = {}", v as i64));
        }
        if let Some(v) = flags.pending_vector {
            sets.push(format!("pending_vector = {}", v as i64));
        }
        if let Some(v) = flags.needs_reembed {
            sets.push(format!("needs_reembed = {}", v as i64));
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE memories SET {} WHERE id = ?1", sets.join(", "));
        let changed = writer.execute(&sql, params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn apply_reinforcement(&self, id: &str, salience: f64, last_seen_at: i64) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET salience = ?2, last_seen_at = MAX(last_seen_at, ?3), updated_at = ?3
             WHERE id = ?1",
            params![id, salience.clamp(0.0, 1.0), last_seen_at],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn apply_fingerprint(&self, id: &str, summary: &str, updated_at: i64) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE memories SET content = ?2, summary = ?2, fingerprinted = 1,
                    token_count = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, summary, token_count(summary), updated_at],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn replace_vector_meta(&self, memory_id: &str, vectors: &[VectorMeta]) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        tx.execute(
            "DELETE FROM vector_meta WHERE memory_id = ?1",
            params![memory_id],
        )?;
        for v in vectors {
            tx.execute(
                "INSERT INTO vector_meta (memory_id, sector, namespace, dim, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![v.memory_id, v.sector.as_str(), v.namespace, v.dim as i64, v.created_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn vector_meta_for(&self, memory_id: &str) -> Result<Vec<VectorMeta>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT memory_id, sector, namespace, dim, created_at
             FROM vector_meta WHERE memory_id = ?1",
        )?;
        let rows = stmt.query_map(params![memory_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(memory_id, sector, namespace, dim, created_at)| {
                Sector::parse_name(&sector).map(|sector| VectorMeta {
                    memory_id,
                    sector,
                    namespace,
                    dim: dim as usize,
                    created_at,
                })
            })
            .collect())
    }

    async fn upsert_waypoint(&self, waypoint: &Waypoint) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO waypoints (src_id, namespace, dst_id, weight, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(src_id, namespace) DO UPDATE SET
                dst_id = excluded.dst_id,
                weight = excluded.weight,
                updated_at = excluded.updated_at",
            params![
                waypoint.src_id,
                waypoint.namespace,
                waypoint.dst_id,
                waypoint.weight,
                waypoint.created_at,
                waypoint.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn get_waypoint(&self, src_id: &str, namespace: &str) -> Result<Option<Waypoint>> {
        let reader = self.reader()?;
        let waypoint = reader
            .query_row(
                "SELECT src_id, dst_id, namespace, weight, created_at, updated_at
                 FROM waypoints WHERE src_id = ?1 AND namespace = ?2",
                params![src_id, namespace],
                |row| {
                    Ok(Waypoint {
                        src_id: row.get(0)?,
                        dst_id: row.get(1)?,
                        namespace: row.get(2)?,
                        weight: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(waypoint)
    }

    async fn delete_waypoint(&self, src_id: &str, namespace: &str) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "DELETE FROM waypoints WHERE src_id = ?1 AND namespace = ?2",
            params![src_id, namespace],
        )?;
        Ok(changed > 0)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let writer = self.writer()?;
        let changed = writer.execute(
            "INSERT OR IGNORE INTO namespaces (namespace, created_at, updated_at, active)
             VALUES (?1, ?2, ?2, 1)",
            params![namespace, now],
        )?;
        Ok(changed > 0)
    }

    async fn upsert_namespace(&self, record: &NamespaceRecord) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO namespaces (namespace, description, ontology_profile, metadata_json,
                                     created_at, updated_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(namespace) DO UPDATE SET
                description = excluded.description,
                ontology_profile = excluded.ontology_profile,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at,
                active = excluded.active",
            params![
                record.namespace,
                record.description,
                record.ontology_profile,
                record.metadata_json,
                record.created_at,
                record.updated_at,
                record.active as i64,
            ],
        )?;
        Ok(())
    }

    async fn get_namespace(&self, namespace: &str) -> Result<Option<NamespaceRecord>> {
        let reader = self.reader()?;
        let record = reader
            .query_row(
                "SELECT namespace, description, ontology_profile, metadata_json,
                        created_at, updated_at, active
                 FROM namespaces WHERE namespace = ?1",
                params![namespace],
                |row| {
                    Ok(NamespaceRecord {
                        namespace: row.get(0)?,
                        description: row.get(1)?,
                        ontology_profile: row.get(2)?,
                        metadata_json: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                        active: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT namespace, description, ontology_profile, metadata_json,
                    created_at, updated_at, active
             FROM namespaces ORDER BY namespace",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NamespaceRecord {
                namespace: row.get(0)?,
                description: row.get(1)?,
                ontology_profile: row.get(2)?,
                metadata_json: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                active: row.get::<_, i64>(6)? != 0,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn list_namespace_labels(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT namespace FROM namespaces WHERE active = 1 ORDER BY namespace")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE namespaces SET active = 0, updated_at = ?2 WHERE namespace = ?1",
            params![namespace, chrono::Utc::now().timestamp()],
        )?;
        Ok(changed > 0)
    }

    async fn append_stat(&self, stat_type: &str, count: i64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO stats (stat_type, count, ts) VALUES (?1, ?2, ?3)",
            params![stat_type, count, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn read_stats(&self, stat_type: Option<&str>, limit: i64) -> Result<Vec<StatRow>> {
        let reader = self.reader()?;
        let rows: Vec<StatRow> = match stat_type {
            Some(t) => {
                let mut stmt = reader.prepare(
                    "SELECT stat_type, count, ts FROM stats WHERE stat_type = ?1
                     ORDER BY ts DESC LIMIT ?2",
                )?;
                let mapped = stmt.query_map(params![t, limit.max(0)], |row| {
                    Ok(StatRow {
                        stat_type: row.get(0)?,
                        count: row.get(1)?,
                        ts: row.get(2)?,
                    })
                })?;
                mapped.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = reader.prepare(
                    "SELECT stat_type, count, ts FROM stats ORDER BY ts DESC LIMIT ?1",
                )?;
                let mapped = stmt.query_map(params![limit.max(0)], |row| {
                    Ok(StatRow {
                        stat_type: row.get(0)?,
                        count: row.get(1)?,
                        ts: row.get(2)?,
                    })
                })?;
                mapped.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    async fn stat_total(&self, stat_type: &str) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COALESCE(SUM(count), 0) FROM stats WHERE stat_type = ?1",
            params![stat_type],
            |r| r.get(0),
        )?)
    }

    async fn upsert_user_summary(&self, summary: &UserSummary) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO user_summaries (namespace, summary, reflection_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace) DO UPDATE SET
                summary = excluded.summary,
                reflection_count = excluded.reflection_count,
                updated_at = excluded.updated_at",
            params![
                summary.namespace,
                summary.summary,
                summary.reflection_count,
                summary.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn get_user_summary(&self, namespace: &str) -> Result<Option<UserSummary>> {
        let reader = self.reader()?;
        let summary = reader
            .query_row(
                "SELECT namespace, summary, reflection_count, updated_at
                 FROM user_summaries WHERE namespace = ?1",
                params![namespace],
                |row| {
                    Ok(UserSummary {
                        namespace: row.get(0)?,
                        summary: row.get(1)?,
                        reflection_count: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    async fn insert_fact(&self, fact: &TemporalFact) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO temporal_facts (id, subject, predicate, object, namespace,
                                         valid_from, valid_to, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fact.id,
                fact.subject,
                fact.predicate,
                fact.object,
                fact.namespace,
                fact.valid_from,
                fact.valid_to,
                fact.confidence,
            ],
        )?;
        Ok(())
    }

    async fn current_fact(
        &self,
        subject: &str,
        predicate: &str,
        namespace: &str,
    ) -> Result<Option<TemporalFact>> {
        let reader = self.reader()?;
        let fact = reader
            .query_row(
                "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
                 FROM temporal_facts
                 WHERE subject = ?1 AND predicate = ?2 AND namespace = ?3 AND valid_to IS NULL
                 ORDER BY valid_from DESC LIMIT 1",
                params![subject, predicate, namespace],
                Self::fact_from_row,
            )
            .optional()?;
        Ok(fact)
    }

    async fn close_fact(&self, id: &str, valid_to: i64) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE temporal_facts SET valid_to = ?2 WHERE id = ?1",
            params![id, valid_to],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn facts_at(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        at: i64,
        namespace: &str,
    ) -> Result<Vec<TemporalFact>> {
        let reader = self.reader()?;
        let mut sql = String::from(
            "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
             FROM temporal_facts
             WHERE namespace = ?1 AND valid_from <= ?2 AND (valid_to IS NULL OR valid_to > ?2)",
        );
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&namespace, &at];
        if let Some(s) = &subject {
            sql.push_str(&format!(" AND subject = ?{}", params_vec.len() + 1));
            params_vec.push(s as &dyn rusqlite::ToSql);
        }
        if let Some(p) = &predicate {
            sql.push_str(&format!(" AND predicate = ?{}", params_vec.len() + 1));
            params_vec.push(p as &dyn rusqlite::ToSql);
        }
        sql.push_str(" ORDER BY confidence DESC, valid_from DESC");

        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_vec.as_slice(), Self::fact_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn fact_timeline(
        &self,
        subject: &str,
        namespace: &str,
        limit: i64,
    ) -> Result<Vec<TemporalFact>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
             FROM temporal_facts WHERE subject = ?1 AND namespace = ?2
             ORDER BY valid_from ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![subject, namespace, limit.max(0)], Self::fact_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn delete_fact(&self, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute("DELETE FROM temporal_facts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    async fn keyword_candidates(
        &self,
        namespaces: &[String],
        query: &str,
        limit: i64,
    ) -> Result<Vec<String>> {
        let terms = query_terms(query, 2);
        if terms.is_empty() || namespaces.is_empty() {
            return Ok(vec![]);
        }
        let match_expr = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let reader = self.reader()?;
        let placeholders = (0..namespaces.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT memories_fts.id FROM memories_fts
             JOIN memory_namespaces mn ON mn.memory_id = memories_fts.id
             WHERE memories_fts MATCH ?1 AND mn.namespace IN ({})
             LIMIT {}",
            placeholders,
            limit.max(1)
        );
        let mut stmt = reader.prepare(&sql)?;
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&match_expr];
        for ns in namespaces {
            params_vec.push(ns as &dyn rusqlite::ToSql);
        }
        let rows = stmt.query_map(params_vec.as_slice(), |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn corpus_stats(&self) -> Result<CorpusStats> {
        let reader = self.reader()?;
        let (doc_count, avg_doc_tokens) = reader.query_row(
            "SELECT COUNT(*), COALESCE(AVG(token_count), 0.0) FROM memories",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
        )?;
        Ok(CorpusStats {
            doc_count,
            avg_doc_tokens,
        })
    }

    async fn memories_needing_reembed(&self, limit: i64) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let sql = format!(
            "SELECT {} FROM memories WHERE needs_reembed = 1 ORDER BY updated_at ASC LIMIT {}",
            MEMORY_COLUMNS,
            limit.max(0)
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], Self::memory_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn sample_memory(id: &str, namespace: &str) -> Memory {
        Memory {
            id: id.to_string(),
            content: format!("content for {}", id),
            summary: None,
            namespaces: vec![namespace.to_string()],
            tags: vec!["test".to_string()],
            metadata: HashMap::new(),
            primary_sector: Sector::Semantic,
            sectors: vec![Sector::Semantic],
            salience: 0.5,
            decay_lambda: 0.02,
            created_at: 1_000,
            updated_at: 1_000,
            last_seen_at: 1_000,
            fingerprinted: false,
            pending_vector: false,
            needs_reembed: false,
        }
    }

    fn sample_vector_meta(id: &str, namespace: &str) -> VectorMeta {
        VectorMeta {
            memory_id: id.to_string(),
            sector: Sector::Semantic,
            namespace: namespace.to_string(),
            dim: 8,
            created_at: 1_000,
        }
    }

    // ========================================================================
    // MEMORY ROUND-TRIPS
    // ========================================================================

    #[tokio::test]
    async fn test_insert_and_get_memory() {
        let (store, _dir) = test_store();
        let memory = sample_memory("m1", "global");
        store
            .insert_memory(&memory, &[sample_vector_meta("m1", "global")])
            .await
            .unwrap();

        let loaded = store.get_memory("m1").await.unwrap().unwrap();
        assert_eq!(loaded.content, memory.content);
        assert_eq!(loaded.namespaces, vec!["global"]);
        assert_eq!(loaded.primary_sector, Sector::Semantic);

        let meta = store.vector_meta_for("m1").await.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].dim, 8);
    }

    #[tokio::test]
    async fn test_get_missing_memory_is_none() {
        let (store, _dir) = test_store();
        assert!(store.get_memory("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_vector_meta() {
        let (store, _dir) = test_store();
        let memory = sample_memory("m1", "global");
        store
            .insert_memory(&memory, &[sample_vector_meta("m1", "global")])
            .await
            .unwrap();

        assert!(store.delete_memory("m1").await.unwrap());
        assert!(store.get_memory("m1").await.unwrap().is_none());
        assert!(store.vector_meta_for("m1").await.unwrap().is_empty());
        assert!(!store.delete_memory("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_memories_by_namespace() {
        let (store, _dir) = test_store();
        for (id, ns) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
            store
                .insert_memory(&sample_memory(id, ns), &[sample_vector_meta(id, ns)])
                .await
                .unwrap();
        }
        let alice = store.list_memories(Some("alice"), None, 0, 10).await.unwrap();
        assert_eq!(alice.len(), 2);
        let all = store.list_memories(None, None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        let none = store.list_memories(Some("carol"), None, 0, 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_reinforcement_is_monotonic_on_last_seen() {
        let (store, _dir) = test_store();
        store
            .insert_memory(&sample_memory("m1", "global"), &[])
            .await
            .unwrap();

        store.apply_reinforcement("m1", 0.7, 2_000).await.unwrap();
        // An older reinforcement cannot roll last_seen_at back
        store.apply_reinforcement("m1", 0.8, 1_500).await.unwrap();

        let m = store.get_memory("m1").await.unwrap().unwrap();
        assert_eq!(m.last_seen_at, 2_000);
        assert!((m.salience - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_apply_fingerprint_rewrites_content() {
        let (store, _dir) = test_store();
        store
            .insert_memory(&sample_memory("m1", "global"), &[])
            .await
            .unwrap();
        store.apply_fingerprint("m1", "the summary", 3_000).await.unwrap();
        let m = store.get_memory("m1").await.unwrap().unwrap();
        assert!(m.fingerprinted);
        assert_eq!(m.content, "the summary");
        assert_eq!(m.summary.as_deref(), Some("the summary"));
    }

    // ========================================================================
    // WAYPOINTS
    // ========================================================================

    #[tokio::test]
    async fn test_waypoint_upsert_replaces_destination() {
        let (store, _dir) = test_store();
        let mut wp = Waypoint {
            src_id: "a".to_string(),
            dst_id: "b".to_string(),
            namespace: "global".to_string(),
            weight: 0.5,
            created_at: 100,
            updated_at: 100,
        };
        store.upsert_waypoint(&wp).await.unwrap();
        wp.dst_id = "c".to_string();
        wp.weight = 0.9;
        wp.updated_at = 200;
        store.upsert_waypoint(&wp).await.unwrap();

        let loaded = store.get_waypoint("a", "global").await.unwrap().unwrap();
        assert_eq!(loaded.dst_id, "c");
        assert!((loaded.weight - 0.9).abs() < 1e-9);
        // One outbound waypoint per (src, namespace)
        assert!(store.delete_waypoint("a", "global").await.unwrap());
        assert!(store.get_waypoint("a", "global").await.unwrap().is_none());
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    #[tokio::test]
    async fn test_ensure_namespace_is_idempotent() {
        let (store, _dir) = test_store();
        assert!(store.ensure_namespace("alice").await.unwrap());
        assert!(!store.ensure_namespace("alice").await.unwrap());
        let labels = store.list_namespace_labels().await.unwrap();
        assert_eq!(labels, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_delete_namespace_is_soft() {
        let (store, _dir) = test_store();
        store.ensure_namespace("alice").await.unwrap();
        assert!(store.delete_namespace("alice").await.unwrap());
        assert!(store.list_namespace_labels().await.unwrap().is_empty());
        let record = store.get_namespace("alice").await.unwrap().unwrap();
        assert!(!record.active);
    }

    // ========================================================================
    // TEMPORAL FACTS
    // ========================================================================

    #[tokio::test]
    async fn test_facts_at_half_open_interval() {
        let (store, _dir) = test_store();
        let fact = TemporalFact {
            id: "f1".to_string(),
            subject: "OpenAI".to_string(),
            predicate: "has_CEO".to_string(),
            object: "Sam".to_string(),
            namespace: "global".to_string(),
            valid_from: 100,
            valid_to: Some(200),
            confidence: 1.0,
        };
        store.insert_fact(&fact).await.unwrap();

        // at == valid_from is included, at == valid_to is excluded
        assert_eq!(
            store.facts_at(Some("OpenAI"), None, 100, "global").await.unwrap().len(),
            1
        );
        assert_eq!(
            store.facts_at(Some("OpenAI"), None, 199, "global").await.unwrap().len(),
            1
        );
        assert!(store
            .facts_at(Some("OpenAI"), None, 200, "global")
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .facts_at(Some("OpenAI"), None, 99, "global")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_current_fact_and_close() {
        let (store, _dir) = test_store();
        let fact = TemporalFact {
            id: "f1".to_string(),
            subject: "s".to_string(),
            predicate: "p".to_string(),
            object: "o".to_string(),
            namespace: "global".to_string(),
            valid_from: 100,
            valid_to: None,
            confidence: 0.9,
        };
        store.insert_fact(&fact).await.unwrap();
        let current = store.current_fact("s", "p", "global").await.unwrap().unwrap();
        assert_eq!(current.id, "f1");

        store.close_fact("f1", 500).await.unwrap();
        assert!(store.current_fact("s", "p", "global").await.unwrap().is_none());
    }

    // ========================================================================
    // KEYWORD CANDIDATES + CORPUS STATS
    // ========================================================================

    #[tokio::test]
    async fn test_keyword_candidates_respect_namespaces() {
        let (store, _dir) = test_store();
        let mut alice = sample_memory("a", "alice");
        alice.content = "Paris is the capital of France".to_string();
        let mut bob = sample_memory("b", "bob");
        bob.content = "Paris is the capital of France".to_string();
        store.insert_memory(&alice, &[]).await.unwrap();
        store.insert_memory(&bob, &[]).await.unwrap();

        let hits = store
            .keyword_candidates(&["alice".to_string()], "capital of France", 10)
            .await
            .unwrap();
        assert_eq!(hits, vec!["a"]);
    }

    #[tokio::test]
    async fn test_corpus_stats() {
        let (store, _dir) = test_store();
        let mut m = sample_memory("m1", "global");
        m.content = "one two three four".to_string();
        store.insert_memory(&m, &[]).await.unwrap();
        let stats = store.corpus_stats().await.unwrap();
        assert_eq!(stats.doc_count, 1);
        assert!((stats.avg_doc_tokens - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_needs_reembed_queue() {
        let (store, _dir) = test_store();
        store.insert_memory(&sample_memory("m1", "global"), &[]).await.unwrap();
        assert!(store.memories_needing_reembed(10).await.unwrap().is_empty());

        store
            .set_flags(
                "m1",
                MemoryFlags {
                    needs_reembed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let queued = store.memories_needing_reembed(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, "m1");
    }
}

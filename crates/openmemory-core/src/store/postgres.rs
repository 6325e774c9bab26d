//! Client/server metadata store (Postgres via sqlx)
//!
//! Same logical schema as the embedded backend, in Postgres dialect.
//! Migrations are check-before-alter idempotent and recorded in
//! `schema_version`; keyword candidates use ILIKE patterns instead of FTS.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

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

/// Versioned Postgres migrations. Every statement is idempotent so a crashed
/// apply can simply re-run.
const PG_MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "Initial schema: memories, vectors, waypoints, namespaces, facts",
        r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    summary TEXT,
    namespaces TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    primary_sector TEXT NOT NULL DEFAULT 'semantic',
    sectors TEXT NOT NULL DEFAULT '[]',
    salience DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    decay_lambda DOUBLE PRECISION NOT NULL DEFAULT 0.02,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    last_seen_at BIGINT NOT NULL,
    token_count BIGINT NOT NULL DEFAULT 0,
    fingerprinted BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_memories_primary_sector ON memories(primary_sector);
CREATE INDEX IF NOT EXISTS idx_memories_last_seen ON memories(last_seen_at);

CREATE TABLE IF NOT EXISTS memory_namespaces (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    namespace TEXT NOT NULL,
    PRIMARY KEY (memory_id, namespace)
);

CREATE INDEX IF NOT EXISTS idx_memory_namespaces_ns ON memory_namespaces(namespace);

CREATE TABLE IF NOT EXISTS vector_meta (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    sector TEXT NOT NULL,
    namespace TEXT NOT NULL,
    dim BIGINT NOT NULL,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (memory_id, sector, namespace)
);

CREATE TABLE IF NOT EXISTS waypoints (
    src_id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    dst_id TEXT NOT NULL,
    weight DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (src_id, namespace)
);

CREATE INDEX IF NOT EXISTS idx_waypoints_dst ON waypoints(dst_id);

CREATE TABLE IF NOT EXISTS namespaces (
    namespace TEXT PRIMARY KEY,
    description TEXT,
    ontology_profile TEXT,
    metadata_json TEXT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS stats (
    id BIGSERIAL PRIMARY KEY,
    stat_type TEXT NOT NULL,
    count BIGINT NOT NULL,
    ts BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_summaries (
    namespace TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    reflection_count BIGINT NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS temporal_facts (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    namespace TEXT NOT NULL,
    valid_from BIGINT NOT NULL,
    valid_to BIGINT,
    confidence DOUBLE PRECISION NOT NULL DEFAULT 1.0
);

CREATE INDEX IF NOT EXISTS idx_facts_lookup
    ON temporal_facts(subject, predicate, namespace, valid_from);

CREATE TABLE IF NOT EXISTS schema_version (
    version BIGINT PRIMARY KEY,
    applied_at BIGINT NOT NULL
);
"#,
    ),
    (
        2,
        "Two-step write repair flags and stats index",
        r#"
ALTER TABLE memories ADD COLUMN IF NOT EXISTS pending_vector BOOLEAN NOT NULL DEFAULT FALSE;
ALTER TABLE memories ADD COLUMN IF NOT EXISTS needs_reembed BOOLEAN NOT NULL DEFAULT FALSE;

CREATE INDEX IF NOT EXISTS idx_memories_needs_reembed ON memories(needs_reembed);
CREATE INDEX IF NOT EXISTS idx_stats_type ON stats(stat_type);
"#,
    ),
];

/// Postgres-backed metadata store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(dsn)
            .await?;
        let store = Self { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    async fn apply_migrations(&self) -> Result<()> {
        // The version table must exist before we can read it
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                 version BIGINT PRIMARY KEY,
                 applied_at BIGINT NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        for (version, description, sql) in PG_MIGRATIONS {
            if i64::from(*version) <= current {
                continue;
            }
            tracing::info!("Applying migration v{}: {}", version, description);
            let mut tx = self.pool.begin().await?;
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(i64::from(*version))
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    fn memory_from_row(row: &PgRow) -> std::result::Result<Memory, sqlx::Error> {
        Ok(Memory {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            summary: row.try_get("summary")?,
            namespaces: strings_from_json(&row.try_get::<String, _>("namespaces")?),
            tags: strings_from_json(&row.try_get::<String, _>("tags")?),
            metadata: metadata_from_json(&row.try_get::<String, _>("metadata")?),
            primary_sector: Sector::parse_name(&row.try_get::<String, _>("primary_sector")?)
                .unwrap_or_default(),
            sectors: sectors_from_json(&row.try_get::<String, _>("sectors")?),
            salience: row.try_get("salience")?,
            decay_lambda: row.try_get("decay_lambda")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            fingerprinted: row.try_get("fingerprinted")?,
            pending_vector: row.try_get("pending_vector")?,
            needs_reembed: row.try_get("needs_reembed")?,
        })
    }

    fn fact_from_row(row: &PgRow) -> std::result::Result<TemporalFact, sqlx::Error> {
        Ok(TemporalFact {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            predicate: row.try_get("predicate")?,
            object: row.try_get("object")?,
            namespace: row.try_get("namespace")?,
            valid_from: row.try_get("valid_from")?,
            valid_to: row.try_get("valid_to")?,
            confidence: row.try_get("confidence")?,
        })
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn insert_memory(&self, memory: &Memory, vectors: &[VectorMeta]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO memories (
                id, content, summary, namespaces, tags, metadata, primary_sector,
                sectors, salience, decay_lambda, created_at, updated_at,
                last_seen_at, token_count, fingerprinted, pending_vector, needs_reembed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(&memory.id)
        .bind(&memory.content)
        .bind(&memory.summary)
        .bind(strings_to_json(&memory.namespaces))
        .bind(strings_to_json(&memory.tags))
        .bind(metadata_to_json(&memory.metadata))
        .bind(memory.primary_sector.as_str())
        .bind(sectors_to_json(&memory.sectors))
        .bind(memory.salience)
        .bind(memory.decay_lambda)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .bind(memory.last_seen_at)
        .bind(token_count(&memory.content))
        .bind(memory.fingerprinted)
        .bind(memory.pending_vector)
        .bind(memory.needs_reembed)
        .execute(&mut *tx)
        .await?;

        for namespace in &memory.namespaces {
            sqlx::query(
                "INSERT INTO memory_namespaces (memory_id, namespace) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&memory.id)
            .bind(namespace)
            .execute(&mut *tx)
            .await?;
        }
        for v in vectors {
            sqlx::query(
                "INSERT INTO vector_meta (memory_id, sector, namespace, dim, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (memory_id, sector, namespace) DO UPDATE SET
                    dim = EXCLUDED.dim, created_at = EXCLUDED.created_at",
            )
            .bind(&v.memory_id)
            .bind(v.sector.as_str())
            .bind(&v.namespace)
            .bind(v.dim as i64)
            .bind(v.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE memories SET
                content = $2, summary = $3, namespaces = $4, tags = $5, metadata = $6,
                primary_sector = $7, sectors = $8, salience = $9, decay_lambda = $10,
                updated_at = $11, last_seen_at = $12, token_count = $13,
                fingerprinted = $14, pending_vector = $15, needs_reembed = $16
             WHERE id = $1",
        )
        .bind(&memory.id)
        .bind(&memory.content)
        .bind(&memory.summary)
        .bind(strings_to_json(&memory.namespaces))
        .bind(strings_to_json(&memory.tags))
        .bind(metadata_to_json(&memory.metadata))
        .bind(memory.primary_sector.as_str())
        .bind(sectors_to_json(&memory.sectors))
        .bind(memory.salience)
        .bind(memory.decay_lambda)
        .bind(memory.updated_at)
        .bind(memory.last_seen_at)
        .bind(token_count(&memory.content))
        .bind(memory.fingerprinted)
        .bind(memory.pending_vector)
        .bind(memory.needs_reembed)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(memory.id.clone()));
        }

        sqlx::query("DELETE FROM memory_namespaces WHERE memory_id = $1")
            .bind(&memory.id)
            .execute(&mut *tx)
            .await?;
        for namespace in &memory.namespaces {
            sqlx::query(
                "INSERT INTO memory_namespaces (memory_id, namespace) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&memory.id)
            .bind(namespace)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_memory(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM waypoints WHERE src_id = $1 OR dst_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM memories WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE id = $1",
            MEMORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::memory_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE id = ANY($1)",
            MEMORY_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Self::memory_from_row(r).ok())
            .collect())
    }

    async fn list_memories(
        &self,
        namespace: Option<&str>,
        sector: Option<Sector>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Memory>> {
        let rows = match (namespace, sector) {
            (Some(ns), Some(sec)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories m
                     JOIN memory_namespaces mn ON mn.memory_id = m.id
                     WHERE mn.namespace = $1 AND m.primary_sector = $2
                     ORDER BY m.created_at DESC LIMIT $3 OFFSET $4",
                    MEMORY_COLUMNS
                ))
                .bind(ns)
                .bind(sec.as_str())
                .bind(limit.max(0))
                .bind(offset.max(0))
                .fetch_all(&self.pool)
                .await?
            }
            (Some(ns), None) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories m
                     JOIN memory_namespaces mn ON mn.memory_id = m.id
                     WHERE mn.namespace = $1
                     ORDER BY m.created_at DESC LIMIT $2 OFFSET $3",
                    MEMORY_COLUMNS
                ))
                .bind(ns)
                .bind(limit.max(0))
                .bind(offset.max(0))
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(sec)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories WHERE primary_sector = $1
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                    MEMORY_COLUMNS
                ))
                .bind(sec.as_str())
                .bind(limit.max(0))
                .bind(offset.max(0))
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memories ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                    MEMORY_COLUMNS
                ))
                .bind(limit.max(0))
                .bind(offset.max(0))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .iter()
            .filter_map(|r| Self::memory_from_row(r).ok())
            .collect())
    }

    async fn count_memories(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM memories")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn count_by_namespace(&self) -> Result<HashMap<String, i64>> {
        let rows =
            sqlx::query("SELECT namespace, COUNT(*) AS n FROM memory_namespaces GROUP BY namespace")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some((r.try_get::<String, _>("namespace").ok()?, r.try_get::<i64, _>("n").ok()?))
            })
            .collect())
    }

    async fn count_by_sector(&self) -> Result<HashMap<String, i64>> {
        let rows =
            sqlx::query("SELECT primary_sector, COUNT(*) AS n FROM memories GROUP BY primary_sector")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some((
                    r.try_get::<String, _>("primary_sector").ok()?,
                    r.try_get::<i64, _>("n").ok()?,
                ))
            })
            .collect())
    }

    async fn count_fingerprinted(&self) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE fingerprinted")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn set_flags(&self, id: &str, flags: MemoryFlags) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        if let Some(v) = flags.fingerprinted {
            sets.push(format!("fingerprinted = {}", v));
        }
        if let Some(v) = flags.pending_vector {
            sets.push(format!("pending_vector = {}", v));
        }
        if let Some(v) = flags.needs_reembed {
            sets.push(format!("needs_reembed = {}", v));
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE memories SET {} WHERE id = $1", sets.join(", "));
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn apply_reinforcement(&self, id: &str, salience: f64, last_seen_at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE memories SET salience = $2,
                    last_seen_at = GREATEST(last_seen_at, $3), updated_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(salience.clamp(0.0, 1.0))
        .bind(last_seen_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn apply_fingerprint(&self, id: &str, summary: &str, updated_at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE memories SET content = $2, summary = $2, fingerprinted = TRUE,
                    token_count = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(summary)
        .bind(token_count(summary))
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn replace_vector_meta(&self, memory_id: &str, vectors: &[VectorMeta]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_meta WHERE memory_id = $1")
            .bind(memory_id)
            .execute(&mut *tx)
            .await?;
        for v in vectors {
            sqlx::query(
                "INSERT INTO vector_meta (memory_id, sector, namespace, dim, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&v.memory_id)
            .bind(v.sector.as_str())
            .bind(&v.namespace)
            .bind(v.dim as i64)
            .bind(v.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn vector_meta_for(&self, memory_id: &str) -> Result<Vec<VectorMeta>> {
        let rows = sqlx::query(
            "SELECT memory_id, sector, namespace, dim, created_at
             FROM vector_meta WHERE memory_id = $1",
        )
        .bind(memory_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let sector = Sector::parse_name(&r.try_get::<String, _>("sector").ok()?)?;
                Some(VectorMeta {
                    memory_id: r.try_get("memory_id").ok()?,
                    sector,
                    namespace: r.try_get("namespace").ok()?,
                    dim: r.try_get::<i64, _>("dim").ok()? as usize,
                    created_at: r.try_get("created_at").ok()?,
                })
            })
            .collect())
    }

    async fn upsert_waypoint(&self, waypoint: &Waypoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO waypoints (src_id, namespace, dst_id, weight, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (src_id, namespace) DO UPDATE SET
                dst_id = EXCLUDED.dst_id,
                weight = EXCLUDED.weight,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&waypoint.src_id)
        .bind(&waypoint.namespace)
        .bind(&waypoint.dst_id)
        .bind(waypoint.weight)
        .bind(waypoint.created_at)
        .bind(waypoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_waypoint(&self, src_id: &str, namespace: &str) -> Result<Option<Waypoint>> {
        let row = sqlx::query(
            "SELECT src_id, dst_id, namespace, weight, created_at, updated_at
             FROM waypoints WHERE src_id = $1 AND namespace = $2",
        )
        .bind(src_id)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| {
            Some(Waypoint {
                src_id: r.try_get("src_id").ok()?,
                dst_id: r.try_get("dst_id").ok()?,
                namespace: r.try_get("namespace").ok()?,
                weight: r.try_get("weight").ok()?,
                created_at: r.try_get("created_at").ok()?,
                updated_at: r.try_get("updated_at").ok()?,
            })
        }))
    }

    async fn delete_waypoint(&self, src_id: &str, namespace: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM waypoints WHERE src_id = $1 AND namespace = $2")
            .bind(src_id)
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO namespaces (namespace, created_at, updated_at, active)
             VALUES ($1, $2, $2, TRUE)
             ON CONFLICT DO NOTHING",
        )
        .bind(namespace)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_namespace(&self, record: &NamespaceRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO namespaces (namespace, description, ontology_profile, metadata_json,
                                     created_at, updated_at, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (namespace) DO UPDATE SET
                description = EXCLUDED.description,
                ontology_profile = EXCLUDED.ontology_profile,
                metadata_json = EXCLUDED.metadata_json,
                updated_at = EXCLUDED.updated_at,
                active = EXCLUDED.active",
        )
        .bind(&record.namespace)
        .bind(&record.description)
        .bind(&record.ontology_profile)
        .bind(&record.metadata_json)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_namespace(&self, namespace: &str) -> Result<Option<NamespaceRecord>> {
        let row = sqlx::query(
            "SELECT namespace, description, ontology_profile, metadata_json,
                    created_at, updated_at, active
             FROM namespaces WHERE namespace = $1",
        )
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| {
            Some(NamespaceRecord {
                namespace: r.try_get("namespace").ok()?,
                description: r.try_get("description").ok()?,
                ontology_profile: r.try_get("ontology_profile").ok()?,
                metadata_json: r.try_get("metadata_json").ok()?,
                created_at: r.try_get("created_at").ok()?,
                updated_at: r.try_get("updated_at").ok()?,
                active: r.try_get("active").ok()?,
            })
        }))
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>> {
        let rows = sqlx::query(
            "SELECT namespace, description, ontology_profile, metadata_json,
                    created_at, updated_at, active
             FROM namespaces ORDER BY namespace",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(NamespaceRecord {
                    namespace: r.try_get("namespace").ok()?,
                    description: r.try_get("description").ok()?,
                    ontology_profile: r.try_get("ontology_profile").ok()?,
                    metadata_json: r.try_get("metadata_json").ok()?,
                    created_at: r.try_get("created_at").ok()?,
                    updated_at: r.try_get("updated_at").ok()?,
                    active: r.try_get("active").ok()?,
                })
            })
            .collect())
    }

    async fn list_namespace_labels(&self) -> Result<Vec<String>> {
        let rows =
            sqlx::query_scalar("SELECT namespace FROM namespaces WHERE active ORDER BY namespace")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE namespaces SET active = FALSE, updated_at = $2 WHERE namespace = $1",
        )
        .bind(namespace)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_stat(&self, stat_type: &str, count: i64) -> Result<()> {
        sqlx::query("INSERT INTO stats (stat_type, count, ts) VALUES ($1, $2, $3)")
            .bind(stat_type)
            .bind(count)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_stats(&self, stat_type: Option<&str>, limit: i64) -> Result<Vec<StatRow>> {
        let rows = match stat_type {
            Some(t) => {
                sqlx::query(
                    "SELECT stat_type, count, ts FROM stats WHERE stat_type = $1
                     ORDER BY ts DESC LIMIT $2",
                )
                .bind(t)
                .bind(limit.max(0))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT stat_type, count, ts FROM stats ORDER BY ts DESC LIMIT $1")
                    .bind(limit.max(0))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(StatRow {
                    stat_type: r.try_get("stat_type").ok()?,
                    count: r.try_get("count").ok()?,
                    ts: r.try_get("ts").ok()?,
                })
            })
            .collect())
    }

    async fn stat_total(&self, stat_type: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COALESCE(SUM(count), 0)::BIGINT FROM stats WHERE stat_type = $1")
                .bind(stat_type)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn upsert_user_summary(&self, summary: &UserSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_summaries (namespace, summary, reflection_count, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (namespace) DO UPDATE SET
                summary = EXCLUDED.summary,
                reflection_count = EXCLUDED.reflection_count,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&summary.namespace)
        .bind(&summary.summary)
        .bind(summary.reflection_count)
        .bind(summary.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_summary(&self, namespace: &str) -> Result<Option<UserSummary>> {
        let row = sqlx::query(
            "SELECT namespace, summary, reflection_count, updated_at
             FROM user_summaries WHERE namespace = $1",
        )
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| {
            Some(UserSummary {
                namespace: r.try_get("namespace").ok()?,
                summary: r.try_get("summary").ok()?,
                reflection_count: r.try_get("reflection_count").ok()?,
                updated_at: r.try_get("updated_at").ok()?,
            })
        }))
    }

    async fn insert_fact(&self, fact: &TemporalFact) -> Result<()> {
        sqlx::query(
            "INSERT INTO temporal_facts (id, subject, predicate, object, namespace,
                                         valid_from, valid_to, confidence)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&fact.id)
        .bind(&fact.subject)
        .bind(&fact.predicate)
        .bind(&fact.object)
        .bind(&fact.namespace)
        .bind(fact.valid_from)
        .bind(fact.valid_to)
        .bind(fact.confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_fact(
        &self,
        subject: &str,
        predicate: &str,
        namespace: &str,
    ) -> Result<Option<TemporalFact>> {
        let row = sqlx::query(
            "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
             FROM temporal_facts
             WHERE subject = $1 AND predicate = $2 AND namespace = $3 AND valid_to IS NULL
             ORDER BY valid_from DESC LIMIT 1",
        )
        .bind(subject)
        .bind(predicate)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::fact_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn close_fact(&self, id: &str, valid_to: i64) -> Result<()> {
        let result = sqlx::query("UPDATE temporal_facts SET valid_to = $2 WHERE id = $1")
            .bind(id)
            .bind(valid_to)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
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
        // NULL parameters disable their clause
        let rows = sqlx::query(
            "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
             FROM temporal_facts
             WHERE namespace = $1 AND valid_from <= $2
               AND (valid_to IS NULL OR valid_to > $2)
               AND ($3::TEXT IS NULL OR subject = $3)
               AND ($4::TEXT IS NULL OR predicate = $4)
             ORDER BY confidence DESC, valid_from DESC",
        )
        .bind(namespace)
        .bind(at)
        .bind(subject)
        .bind(predicate)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Self::fact_from_row(r).ok())
            .collect())
    }

    async fn fact_timeline(
        &self,
        subject: &str,
        namespace: &str,
        limit: i64,
    ) -> Result<Vec<TemporalFact>> {
        let rows = sqlx::query(
            "SELECT id, subject, predicate, object, namespace, valid_from, valid_to, confidence
             FROM temporal_facts WHERE subject = $1 AND namespace = $2
             ORDER BY valid_from ASC LIMIT $3",
        )
        .bind(subject)
        .bind(namespace)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Self::fact_from_row(r).ok())
            .collect())
    }

    async fn delete_fact(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM temporal_facts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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
        let patterns: Vec<String> = terms.iter().map(|t| format!("%{}%", t)).collect();
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT m.id FROM memories m
             JOIN memory_namespaces mn ON mn.memory_id = m.id
             WHERE mn.namespace = ANY($1) AND m.content ILIKE ANY($2)
             LIMIT $3",
        )
        .bind(namespaces)
        .bind(&patterns)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn corpus_stats(&self) -> Result<CorpusStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS doc_count,
                    COALESCE(AVG(token_count), 0)::DOUBLE PRECISION AS avg_tokens
             FROM memories",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CorpusStats {
            doc_count: row.try_get("doc_count")?,
            avg_doc_tokens: row.try_get("avg_tokens")?,
        })
    }

    async fn memories_needing_reembed(&self, limit: i64) -> Result<Vec<Memory>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM memories WHERE needs_reembed ORDER BY updated_at ASC LIMIT $1",
            MEMORY_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Self::memory_from_row(r).ok())
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_migrations_are_ordered() {
        let mut last = 0;
        for (version, _, _) in PG_MIGRATIONS {
            assert!(*version > last);
            last = *version;
        }
    }

    #[test]
    fn test_pg_migration_statements_are_idempotent() {
        // Every DDL statement must be guarded so a crashed apply can re-run
        for (_, _, sql) in PG_MIGRATIONS {
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                let upper = statement.to_uppercase();
                assert!(
                    upper.contains("IF NOT EXISTS") || upper.starts_with("CREATE INDEX IF"),
                    "non-idempotent migration statement: {}",
                    statement
                );
            }
        }
    }
}

//! Database migrations (embedded backend)
//!
//! Versioned, idempotent schema definitions applied before any normal query.
//! The Postgres backend carries the same logical schema in its own dialect
//! (see `postgres.rs`).

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, vectors, waypoints, namespaces, facts",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Two-step write repair flags and stats index",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "FTS porter tokenizer for keyword candidates",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    summary TEXT,
    namespaces TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    primary_sector TEXT NOT NULL DEFAULT 'semantic',
    sectors TEXT NOT NULL DEFAULT '[]',

    -- Salience lifecycle
    salience REAL NOT NULL DEFAULT 0.5,
    decay_lambda REAL NOT NULL DEFAULT 0.02,

    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,

    -- Corpus statistics for BM25
    token_count INTEGER NOT NULL DEFAULT 0,

    fingerprinted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_primary_sector ON memories(primary_sector);
CREATE INDEX IF NOT EXISTS idx_memories_last_seen ON memories(last_seen_at);

-- Namespace membership join table (a memory can live in several)
CREATE TABLE IF NOT EXISTS memory_namespaces (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    namespace TEXT NOT NULL,
    PRIMARY KEY (memory_id, namespace)
);

CREATE INDEX IF NOT EXISTS idx_memory_namespaces_ns ON memory_namespaces(namespace);

-- One row per (memory, sector) within its namespace collection
CREATE TABLE IF NOT EXISTS vector_meta (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    sector TEXT NOT NULL,
    namespace TEXT NOT NULL,
    dim INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (memory_id, sector, namespace)
);

-- At most one outbound waypoint per (src_id, namespace)
CREATE TABLE IF NOT EXISTS waypoints (
    src_id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    dst_id TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (src_id, namespace)
);

CREATE INDEX IF NOT EXISTS idx_waypoints_dst ON waypoints(dst_id);

-- Namespace groups, auto-created on first reference
CREATE TABLE IF NOT EXISTS namespaces (
    namespace TEXT PRIMARY KEY,
    description TEXT,
    ontology_profile TEXT,
    metadata_json TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

-- Maintenance counters
CREATE TABLE IF NOT EXISTS stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stat_type TEXT NOT NULL,
    count INTEGER NOT NULL,
    ts INTEGER NOT NULL
);

-- Per-namespace digest rebuilt by reflection
CREATE TABLE IF NOT EXISTS user_summaries (
    namespace TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    reflection_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

-- Temporal facts with validity intervals
CREATE TABLE IF NOT EXISTS temporal_facts (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    namespace TEXT NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    confidence REAL NOT NULL DEFAULT 1.0
);

CREATE INDEX IF NOT EXISTS idx_facts_lookup
    ON temporal_facts(subject, predicate, namespace, valid_from);

-- FTS virtual table for keyword candidate generation
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id,
    content,
    tags,
    content='memories',
    content_rowid='rowid'
);

-- Triggers keep FTS in sync
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());
"#;

/// V2: flags for the two-step write protocol and regeneration queue
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE memories ADD COLUMN pending_vector INTEGER NOT NULL DEFAULT 0;
ALTER TABLE memories ADD COLUMN needs_reembed INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_memories_needs_reembed ON memories(needs_reembed);
CREATE INDEX IF NOT EXISTS idx_stats_type ON stats(stat_type);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, unixepoch());
"#;

/// V3: porter tokenizer for better keyword recall (stemming)
const MIGRATION_V3_UP: &str = r#"
DROP TRIGGER IF EXISTS memories_ai;
DROP TRIGGER IF EXISTS memories_ad;
DROP TRIGGER IF EXISTS memories_au;
DROP TABLE IF EXISTS memories_fts;

CREATE VIRTUAL TABLE memories_fts USING fts5(
    id, content, tags,
    content='memories',
    content_rowid='rowid',
    tokenize='porter ascii'
);

INSERT INTO memories_fts(memories_fts) VALUES('rebuild');

CREATE TRIGGER memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

CREATE TRIGGER memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
END;

CREATE TRIGGER memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
    INSERT INTO memories_fts(rowid, id, content, tags)
    VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, unixepoch());
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================

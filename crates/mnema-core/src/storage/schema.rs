//! Cube schema migrations

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: data, documents, chunks, typed vector rows, chunk FTS",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Property graph: nodes, edges, per-group metabolism config",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Sweep indexes for metabolism paging",
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

/// V1: ingested rows and vector retrieval
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS data_records (
    id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    raw_location TEXT NOT NULL DEFAULT '',
    original_location TEXT NOT NULL DEFAULT '',
    extension TEXT NOT NULL DEFAULT '',
    mime_type TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL,
    owner_id TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    PRIMARY KEY (id, memory_group),
    UNIQUE (content_hash, memory_group)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    data_id TEXT NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    PRIMARY KEY (id, memory_group)
);

CREATE INDEX IF NOT EXISTS idx_documents_data ON documents(memory_group, data_id);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    document_id TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB,
    nouns TEXT NOT NULL DEFAULT '',
    nouns_verbs TEXT NOT NULL DEFAULT '',
    keywords_all TEXT NOT NULL DEFAULT '',
    token_count INTEGER NOT NULL DEFAULT 0,
    chunk_index INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (id, memory_group)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(memory_group, document_id, chunk_index);

-- one row per typed vector view (entity, summary, rule, unknown, capability)
CREATE TABLE IF NOT EXISTS vector_rows (
    tbl TEXT NOT NULL,
    id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    nouns TEXT NOT NULL DEFAULT '',
    nouns_verbs TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    PRIMARY KEY (tbl, id, memory_group)
);

CREATE INDEX IF NOT EXISTS idx_vector_rows_scan ON vector_rows(tbl, memory_group);

-- BM25 index over the three keyword layers of each chunk
CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
    nouns,
    nouns_verbs,
    keywords_all,
    chunk_id UNINDEXED,
    memory_group UNINDEXED
);

-- cube-level metadata (embedding model identity)
CREATE TABLE IF NOT EXISTS cube_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: property graph
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    node_type TEXT NOT NULL DEFAULT 'Entity',
    properties TEXT NOT NULL DEFAULT '{}',
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (id, memory_group)
);

CREATE INDEX IF NOT EXISTS idx_nodes_type ON graph_nodes(memory_group, node_type);

CREATE TABLE IF NOT EXISTS graph_edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    weight REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 0.5,
    unix_ms INTEGER NOT NULL,
    PRIMARY KEY (source_id, edge_type, target_id, memory_group)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(memory_group, target_id);

CREATE TABLE IF NOT EXISTS memory_group_configs (
    memory_group TEXT PRIMARY KEY,
    half_life_days REAL NOT NULL,
    prune_threshold REAL NOT NULL,
    min_survival_protection_hours REAL NOT NULL,
    mdl_k_neighbors INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, datetime('now'));
"#;

/// V3: paging indexes for the metabolism sweeps
const MIGRATION_V3_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(memory_group, source_id);
CREATE INDEX IF NOT EXISTS idx_edges_unix ON graph_edges(memory_group, unix_ms);
CREATE INDEX IF NOT EXISTS idx_nodes_created ON graph_nodes(memory_group, created_at_ms);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, datetime('now'));
"#;

fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());

        // idempotent
        let again = apply_migrations(&conn).unwrap();
        assert_eq!(again, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_versions_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }
}

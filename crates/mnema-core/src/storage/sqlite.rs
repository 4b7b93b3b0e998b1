//! SQLite Cube Backend
//!
//! One self-contained database file per cube (rows + vectors + FTS + graph).
//! Separate reader/writer connections behind mutexes give interior
//! mutability: all methods take `&self`, so the lifecycle manager can hand
//! out `Arc<CubeStorage>` without an outer lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::decay::now_ms;
use crate::error::{EngineError, Result};
use crate::memory::{
    Chunk, DataRecord, Document, DocumentChunk, EmbeddingModelConfig, GraphEdge, GraphNode,
    MemoryGroupConfig, MetabolismConfig, Triple,
};
use crate::model::{cosine_similarity, embedding_from_bytes, embedding_to_bytes};
use crate::text::{keyword_layers, query_terms, FtsLayer, Lang};

use super::{tables, EmbeddingRow, GraphStorage, SearchHit, VectorStorage};

/// Page size for chunk streaming
const STREAM_PAGE: usize = 256;

/// One cube: a single SQLite file holding every memory group stored in it
pub struct CubeStorage {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// Reinforcement steps applied on edge re-observation
    metabolism: MetabolismConfig,
    open: AtomicBool,
}

impl CubeStorage {
    /// Apply PRAGMAs to a connection
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

    /// Open (or create) the cube at `path` and apply the schema.
    pub fn open(
        path: impl AsRef<Path>,
        embedding: &EmbeddingModelConfig,
        metabolism: MetabolismConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        let storage = Self {
            path,
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            metabolism,
            open: AtomicBool::new(true),
        };
        storage.ensure_schema(embedding)?;
        Ok(storage)
    }

    /// Apply migrations and pin the cube to one embedding model.
    ///
    /// Reopening with a different embedding dimension is a schema mismatch:
    /// stored vectors would be incomparable with fresh ones.
    pub fn ensure_schema(&self, embedding: &EmbeddingModelConfig) -> Result<()> {
        let conn = self.writer()?;
        super::schema::apply_migrations(&conn)?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM cube_meta WHERE key = 'embedding_dimension'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(dim) if dim != embedding.dimension.to_string() => {
                return Err(EngineError::SchemaMismatch(format!(
                    "cube {} was built with embedding dimension {dim}, model {} produces {}",
                    self.path.display(),
                    embedding.model_name,
                    embedding.dimension,
                )));
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO cube_meta (key, value) VALUES
                     ('embedding_model', ?1), ('embedding_dimension', ?2)",
                    params![embedding.model_name, embedding.dimension.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// The cube's database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Internal("writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Internal("reader lock poisoned".into()))
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Internal(format!(
                "cube {} is closed",
                self.path.display()
            )))
        }
    }

    fn row_to_data(row: &Row<'_>) -> rusqlite::Result<DataRecord> {
        Ok(DataRecord {
            id: row.get(0)?,
            memory_group: row.get(1)?,
            name: row.get(2)?,
            raw_location: row.get(3)?,
            original_location: row.get(4)?,
            extension: row.get(5)?,
            mime_type: row.get(6)?,
            content_hash: row.get(7)?,
            owner_id: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn row_to_node(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
        let properties: String = row.get(3)?;
        Ok(GraphNode {
            id: row.get(0)?,
            memory_group: row.get(1)?,
            node_type: row.get(2)?,
            properties: serde_json::from_str(&properties).unwrap_or_default(),
            created_at_ms: row.get(4)?,
        })
    }

    fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
        let properties: String = row.get(4)?;
        Ok(GraphEdge {
            source_id: row.get(0)?,
            target_id: row.get(1)?,
            memory_group: row.get(2)?,
            edge_type: row.get(3)?,
            properties: serde_json::from_str(&properties).unwrap_or_default(),
            weight: row.get(5)?,
            confidence: row.get(6)?,
            unix: row.get(7)?,
        })
    }

    const EDGE_COLUMNS: &'static str =
        "source_id, target_id, memory_group, edge_type, properties, weight, confidence, unix_ms";
    const NODE_COLUMNS: &'static str = "id, memory_group, node_type, properties, created_at_ms";

    /// `?n, ?n+1, ...` placeholder list for dynamic IN clauses
    fn placeholders(start: usize, count: usize) -> String {
        (start..start + count)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Materialise triples for a set of edges, synthesising endpoint nodes
    /// the graph no longer carries.
    fn edges_to_triples(
        &self,
        conn: &Connection,
        edges: Vec<GraphEdge>,
        memory_group: &str,
    ) -> Result<Vec<Triple>> {
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let mut node_ids: Vec<String> = Vec::new();
        for edge in &edges {
            if !node_ids.contains(&edge.source_id) {
                node_ids.push(edge.source_id.clone());
            }
            if !node_ids.contains(&edge.target_id) {
                node_ids.push(edge.target_id.clone());
            }
        }

        let sql = format!(
            "SELECT {} FROM graph_nodes WHERE memory_group = ?1 AND id IN ({})",
            Self::NODE_COLUMNS,
            Self::placeholders(2, node_ids.len()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut node_params: Vec<String> = Vec::with_capacity(node_ids.len() + 1);
        node_params.push(memory_group.to_string());
        node_params.extend(node_ids.iter().cloned());

        let mut nodes = std::collections::HashMap::new();
        let rows = stmt.query_map(params_from_iter(node_params.iter()), Self::row_to_node)?;
        for node in rows {
            let node = node?;
            nodes.insert(node.id.clone(), node);
        }

        let lookup = |id: &str| -> GraphNode {
            nodes.get(id).cloned().unwrap_or_else(|| GraphNode {
                id: id.to_string(),
                memory_group: memory_group.to_string(),
                node_type: "Entity".to_string(),
                properties: serde_json::Map::new(),
                created_at_ms: 0,
            })
        };

        Ok(edges
            .into_iter()
            .map(|edge| Triple {
                source: lookup(&edge.source_id),
                target: lookup(&edge.target_id),
                edge,
            })
            .collect())
    }

    fn vector_scan(
        &self,
        conn: &Connection,
        table: &str,
        memory_group: &str,
    ) -> Result<Vec<(String, String, Vec<u8>, String, String)>> {
        let mut rows = Vec::new();
        if table == tables::CHUNK {
            let mut stmt = conn.prepare(
                "SELECT id, text, embedding, nouns, nouns_verbs FROM chunks
                 WHERE memory_group = ?1 AND embedding IS NOT NULL",
            )?;
            let mapped = stmt.query_map(params![memory_group], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, text, embedding, nouns, nouns_verbs FROM vector_rows
                 WHERE tbl = ?1 AND memory_group = ?2",
            )?;
            let mapped = stmt.query_map(params![table, memory_group], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        }
        Ok(rows)
    }

    /// FTS5 match expression for quoted terms on one layer column.
    fn fts_match_expr(column: &str, terms: &[String]) -> Option<String> {
        let quoted: Vec<String> = terms
            .iter()
            .map(|t| t.replace('"', ""))
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();
        if quoted.is_empty() {
            None
        } else {
            Some(format!("{column}: ({})", quoted.join(" OR ")))
        }
    }
}

impl VectorStorage for CubeStorage {
    fn save_data(&self, data: &DataRecord) -> Result<String> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO data_records (
                id, memory_group, name, raw_location, original_location,
                extension, mime_type, content_hash, owner_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (content_hash, memory_group) DO UPDATE SET
                name = excluded.name,
                raw_location = excluded.raw_location,
                original_location = excluded.original_location,
                extension = excluded.extension,
                mime_type = excluded.mime_type,
                owner_id = excluded.owner_id",
            params![
                data.id,
                data.memory_group,
                data.name,
                data.raw_location,
                data.original_location,
                data.extension,
                data.mime_type,
                data.content_hash,
                data.owner_id,
                data.created_at,
            ],
        )?;

        // the row keeps its original id on a dedup hit
        let id = conn.query_row(
            "SELECT id FROM data_records WHERE content_hash = ?1 AND memory_group = ?2",
            params![data.content_hash, data.memory_group],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn exists(&self, content_hash: &str, memory_group: &str) -> Result<bool> {
        self.check_open()?;
        let conn = self.reader()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM data_records WHERE content_hash = ?1 AND memory_group = ?2",
                params![content_hash, memory_group],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_data_by_id(&self, id: &str, memory_group: &str) -> Result<Option<DataRecord>> {
        self.check_open()?;
        let conn = self.reader()?;
        let data = conn
            .query_row(
                "SELECT id, memory_group, name, raw_location, original_location,
                        extension, mime_type, content_hash, owner_id, created_at
                 FROM data_records WHERE id = ?1 AND memory_group = ?2",
                params![id, memory_group],
                Self::row_to_data,
            )
            .optional()?;
        Ok(data)
    }

    fn get_data_list(&self, memory_group: &str) -> Result<Vec<DataRecord>> {
        self.check_open()?;
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, memory_group, name, raw_location, original_location,
                    extension, mime_type, content_hash, owner_id, created_at
             FROM data_records WHERE memory_group = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![memory_group], Self::row_to_data)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn save_document(&self, document: &Document) -> Result<()> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, memory_group, data_id, text, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.id,
                document.memory_group,
                document.data_id,
                document.text,
                serde_json::to_string(&document.metadata)?,
                document.created_at,
            ],
        )?;
        Ok(())
    }

    fn save_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.check_open()?;
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO chunks (
                id, memory_group, document_id, text, embedding,
                nouns, nouns_verbs, keywords_all, token_count, chunk_index, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                chunk.id,
                chunk.memory_group,
                chunk.document_id,
                chunk.text,
                chunk.embedding.as_deref().map(embedding_to_bytes),
                chunk.nouns,
                chunk.nouns_verbs,
                chunk.keywords_all,
                chunk.token_count,
                chunk.chunk_index,
                chunk.created_at,
            ],
        )?;
        tx.execute(
            "DELETE FROM chunk_fts WHERE chunk_id = ?1 AND memory_group = ?2",
            params![chunk.id, chunk.memory_group],
        )?;
        tx.execute(
            "INSERT INTO chunk_fts (nouns, nouns_verbs, keywords_all, chunk_id, memory_group)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chunk.nouns,
                chunk.nouns_verbs,
                chunk.keywords_all,
                chunk.id,
                chunk.memory_group,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save_embedding(
        &self,
        table: &str,
        id: &str,
        text: &str,
        vector: &[f32],
        memory_group: &str,
    ) -> Result<()> {
        self.check_open()?;
        let layers = keyword_layers(text, Lang::detect(text));
        let conn = self.writer()?;
        conn.execute(
            "INSERT OR REPLACE INTO vector_rows
                (tbl, id, memory_group, text, embedding, nouns, nouns_verbs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                table,
                id,
                memory_group,
                text,
                embedding_to_bytes(vector),
                layers.nouns,
                layers.nouns_verbs,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn query(
        &self,
        table: &str,
        vector: &[f32],
        topk: usize,
        memory_group: &str,
    ) -> Result<Vec<SearchHit>> {
        self.check_open()?;
        if topk == 0 || vector.is_empty() {
            return Ok(Vec::new());
        }

        let rows = {
            let conn = self.reader()?;
            self.vector_scan(&conn, table, memory_group)?
        };

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter_map(|(id, text, blob, nouns, nouns_verbs)| {
                let stored = embedding_from_bytes(&blob)?;
                Some(SearchHit {
                    id,
                    text,
                    distance: cosine_similarity(vector, &stored),
                    nouns,
                    nouns_verbs,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.distance
                .partial_cmp(&a.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(topk);
        Ok(hits)
    }

    fn full_text_search(
        &self,
        table: &str,
        query: &str,
        topk: usize,
        memory_group: &str,
        is_en: bool,
        layer: FtsLayer,
    ) -> Result<Vec<SearchHit>> {
        self.check_open()?;
        if table != tables::CHUNK {
            return Err(EngineError::InvalidConfig(format!(
                "full-text search is indexed for the chunk table only, got {table}"
            )));
        }
        if topk == 0 {
            return Ok(Vec::new());
        }

        let terms = query_terms(query, Lang::from_is_en(is_en), layer);
        let Some(match_expr) = Self::fts_match_expr(layer.column(), &terms) else {
            return Ok(Vec::new());
        };

        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.text, c.nouns, c.nouns_verbs, -bm25(chunk_fts) AS score
             FROM chunk_fts
             JOIN chunks c
               ON c.id = chunk_fts.chunk_id AND c.memory_group = chunk_fts.memory_group
             WHERE chunk_fts MATCH ?1 AND chunk_fts.memory_group = ?2
             ORDER BY bm25(chunk_fts)
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![match_expr, memory_group, topk as i64], |row| {
            Ok(SearchHit {
                id: row.get(0)?,
                text: row.get(1)?,
                nouns: row.get(2)?,
                nouns_verbs: row.get(3)?,
                distance: row.get::<_, f64>(4)? as f32,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_embedding_by_id(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<EmbeddingRow>> {
        self.check_open()?;
        let conn = self.reader()?;
        let row = conn
            .query_row(
                "SELECT id, text, embedding FROM vector_rows
                 WHERE tbl = ?1 AND id = ?2 AND memory_group = ?3",
                params![table, id, memory_group],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(id, text, blob)| {
            embedding_from_bytes(&blob).map(|embedding| EmbeddingRow {
                id,
                text,
                embedding,
            })
        }))
    }

    fn get_embeddings_by_ids(
        &self,
        table: &str,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<EmbeddingRow>> {
        self.check_open()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT id, text, embedding FROM vector_rows
             WHERE tbl = ?1 AND memory_group = ?2 AND id IN ({})",
            Self::placeholders(3, ids.len()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut query_params = vec![table.to_string(), memory_group.to_string()];
        query_params.extend(ids.iter().cloned());

        let rows = stmt.query_map(params_from_iter(query_params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, text, blob) = row?;
            if let Some(embedding) = embedding_from_bytes(&blob) {
                out.push(EmbeddingRow {
                    id,
                    text,
                    embedding,
                });
            }
        }
        Ok(out)
    }
}

impl GraphStorage for CubeStorage {
    fn add_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        self.check_open()?;
        if nodes.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_nodes (id, memory_group, node_type, properties, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id, memory_group) DO UPDATE SET
                    node_type = excluded.node_type,
                    properties = excluded.properties",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.memory_group,
                    node.node_type,
                    serde_json::to_string(&node.properties)?,
                    node.created_at_ms,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add_edges(&self, edges: &[GraphEdge]) -> Result<()> {
        self.check_open()?;
        if edges.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_edges
                    (source_id, target_id, memory_group, edge_type, properties,
                     weight, confidence, unix_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (source_id, edge_type, target_id, memory_group) DO UPDATE SET
                    weight = min(1.0, weight + ?9 * (1.0 - weight)),
                    confidence = min(1.0, confidence + ?10 * (1.0 - confidence)),
                    unix_ms = excluded.unix_ms,
                    properties = excluded.properties",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.source_id,
                    edge.target_id,
                    edge.memory_group,
                    edge.edge_type,
                    serde_json::to_string(&edge.properties)?,
                    edge.weight.clamp(0.0, 1.0),
                    edge.confidence.clamp(0.0, 1.0),
                    edge.unix,
                    self.metabolism.alpha,
                    self.metabolism.delta,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_triples(&self, ids: &[String], memory_group: &str) -> Result<Vec<Triple>> {
        self.check_open()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM graph_edges
             WHERE memory_group = ?1
               AND (source_id IN ({}) OR target_id IN ({}))",
            Self::EDGE_COLUMNS,
            Self::placeholders(2, ids.len()),
            Self::placeholders(2 + ids.len(), ids.len()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut query_params = vec![memory_group.to_string()];
        query_params.extend(ids.iter().cloned());
        query_params.extend(ids.iter().cloned());

        let rows = stmt.query_map(params_from_iter(query_params.iter()), Self::row_to_edge)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        self.edges_to_triples(&conn, edges, memory_group)
    }

    fn get_source_node_ids(
        &self,
        memory_group: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.check_open()?;
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_id FROM graph_edges
             WHERE memory_group = ?1 ORDER BY source_id LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![memory_group, limit as i64, offset as i64], |row| {
            row.get(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_triples_by_source_ids(
        &self,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Triple>> {
        self.check_open()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM graph_edges
             WHERE memory_group = ?1 AND source_id IN ({})",
            Self::EDGE_COLUMNS,
            Self::placeholders(2, ids.len()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut query_params = vec![memory_group.to_string()];
        query_params.extend(ids.iter().cloned());

        let rows = stmt.query_map(params_from_iter(query_params.iter()), Self::row_to_edge)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        self.edges_to_triples(&conn, edges, memory_group)
    }

    fn stream_document_chunks(
        self: Arc<Self>,
        ctx: CancellationToken,
        memory_group: String,
    ) -> (mpsc::Receiver<DocumentChunk>, oneshot::Receiver<Result<()>>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_PAGE);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let result = (|| -> Result<()> {
                let mut offset = 0usize;
                loop {
                    if ctx.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let page: Vec<DocumentChunk> = {
                        let conn = self.reader()?;
                        let mut stmt = conn.prepare(
                            "SELECT id, document_id, memory_group, text, chunk_index
                             FROM chunks WHERE memory_group = ?1
                             ORDER BY document_id, chunk_index
                             LIMIT ?2 OFFSET ?3",
                        )?;
                        let rows = stmt.query_map(
                            params![memory_group, STREAM_PAGE as i64, offset as i64],
                            |row| {
                                Ok(DocumentChunk {
                                    id: row.get(0)?,
                                    document_id: row.get(1)?,
                                    memory_group: row.get(2)?,
                                    text: row.get(3)?,
                                    chunk_index: row.get(4)?,
                                })
                            },
                        )?;
                        let mut page = Vec::new();
                        for row in rows {
                            page.push(row?);
                        }
                        page
                    };

                    if page.is_empty() {
                        return Ok(());
                    }
                    offset += page.len();
                    for chunk in page {
                        if chunk_tx.blocking_send(chunk).is_err() {
                            // receiver hung up; not an error
                            return Ok(());
                        }
                    }
                }
            })();
            let _ = done_tx.send(result);
        });

        (chunk_rx, done_rx)
    }

    fn get_document_chunk_count(&self, memory_group: &str) -> Result<u64> {
        self.check_open()?;
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE memory_group = ?1",
            params![memory_group],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_nodes_by_type(&self, node_type: &str, memory_group: &str) -> Result<Vec<GraphNode>> {
        self.check_open()?;
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM graph_nodes WHERE memory_group = ?1 AND node_type = ?2 ORDER BY id",
            Self::NODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![memory_group, node_type], Self::row_to_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_nodes_by_edge(
        &self,
        node_id: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>> {
        self.check_open()?;
        let conn = self.reader()?;
        let sql = "SELECT n.id, n.memory_group, n.node_type, n.properties, n.created_at_ms
             FROM graph_nodes n
             JOIN graph_edges e
               ON e.target_id = n.id AND e.memory_group = n.memory_group
             WHERE e.memory_group = ?1 AND e.source_id = ?2 AND e.edge_type = ?3
             ORDER BY n.id";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![memory_group, node_id, edge_type], Self::row_to_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn update_edge_weight(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
        weight: f64,
    ) -> Result<()> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "UPDATE graph_edges SET weight = ?1
             WHERE source_id = ?2 AND edge_type = ?3 AND target_id = ?4 AND memory_group = ?5",
            params![
                weight.clamp(0.0, 1.0),
                source_id,
                edge_type,
                target_id,
                memory_group
            ],
        )?;
        Ok(())
    }

    fn update_edge_metrics(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
        weight: f64,
        confidence: f64,
        unix: i64,
    ) -> Result<()> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "UPDATE graph_edges SET weight = ?1, confidence = ?2, unix_ms = ?3
             WHERE source_id = ?4 AND edge_type = ?5 AND target_id = ?6 AND memory_group = ?7",
            params![
                weight.clamp(0.0, 1.0),
                confidence.clamp(0.0, 1.0),
                unix,
                source_id,
                edge_type,
                target_id,
                memory_group
            ],
        )?;
        Ok(())
    }

    fn delete_edge(
        &self,
        source_id: &str,
        edge_type: &str,
        target_id: &str,
        memory_group: &str,
    ) -> Result<()> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "DELETE FROM graph_edges
             WHERE source_id = ?1 AND edge_type = ?2 AND target_id = ?3 AND memory_group = ?4",
            params![source_id, edge_type, target_id, memory_group],
        )?;
        Ok(())
    }

    fn delete_node(&self, id: &str, memory_group: &str) -> Result<()> {
        self.check_open()?;
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM graph_edges
             WHERE memory_group = ?1 AND (source_id = ?2 OR target_id = ?2)",
            params![memory_group, id],
        )?;
        tx.execute(
            "DELETE FROM vector_rows WHERE memory_group = ?1 AND id = ?2",
            params![memory_group, id],
        )?;
        tx.execute(
            "DELETE FROM graph_nodes WHERE memory_group = ?1 AND id = ?2",
            params![memory_group, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_edges_by_node(&self, id: &str, memory_group: &str) -> Result<Vec<GraphEdge>> {
        self.check_open()?;
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM graph_edges
             WHERE memory_group = ?1 AND (source_id = ?2 OR target_id = ?2)",
            Self::EDGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![memory_group, id], Self::row_to_edge)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_orphan_nodes(&self, memory_group: &str, grace: Duration) -> Result<Vec<GraphNode>> {
        self.check_open()?;
        let cutoff = now_ms() - grace.as_millis() as i64;
        let conn = self.reader()?;
        let sql = "SELECT n.id, n.memory_group, n.node_type, n.properties, n.created_at_ms
             FROM graph_nodes n
             WHERE n.memory_group = ?1 AND n.created_at_ms <= ?2
               AND NOT EXISTS (
                   SELECT 1 FROM graph_edges e
                   WHERE e.memory_group = n.memory_group
                     AND (e.source_id = n.id OR e.target_id = n.id))";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![memory_group, cutoff], Self::row_to_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_weakly_connected_nodes(
        &self,
        memory_group: &str,
        threshold: f64,
        grace: Duration,
    ) -> Result<Vec<GraphNode>> {
        self.check_open()?;
        let cutoff = now_ms() - grace.as_millis() as i64;
        let conn = self.reader()?;
        let sql = "SELECT n.id, n.memory_group, n.node_type, n.properties, n.created_at_ms
             FROM graph_nodes n
             WHERE n.memory_group = ?1 AND n.created_at_ms <= ?2
               AND EXISTS (
                   SELECT 1 FROM graph_edges e
                   WHERE e.memory_group = n.memory_group
                     AND (e.source_id = n.id OR e.target_id = n.id))
               AND NOT EXISTS (
                   SELECT 1 FROM graph_edges e
                   WHERE e.memory_group = n.memory_group
                     AND (e.source_id = n.id OR e.target_id = n.id)
                     AND e.weight * e.confidence > ?3)";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![memory_group, cutoff, threshold], Self::row_to_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_max_unix(&self, memory_group: &str) -> Result<i64> {
        self.check_open()?;
        let conn = self.reader()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(unix_ms), 0) FROM graph_edges WHERE memory_group = ?1",
            params![memory_group],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn get_memory_group_config(&self, memory_group: &str) -> Result<MemoryGroupConfig> {
        self.check_open()?;
        let conn = self.reader()?;
        let config = conn
            .query_row(
                "SELECT half_life_days, prune_threshold, min_survival_protection_hours,
                        mdl_k_neighbors
                 FROM memory_group_configs WHERE memory_group = ?1",
                params![memory_group],
                |row| {
                    Ok(MemoryGroupConfig {
                        half_life_days: row.get(0)?,
                        prune_threshold: row.get(1)?,
                        min_survival_protection_hours: row.get(2)?,
                        mdl_k_neighbors: row.get::<_, i64>(3)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(config.unwrap_or_default())
    }

    fn upsert_memory_group(&self, memory_group: &str, config: &MemoryGroupConfig) -> Result<()> {
        self.check_open()?;
        let conn = self.writer()?;
        conn.execute(
            "INSERT OR REPLACE INTO memory_group_configs
                (memory_group, half_life_days, prune_threshold,
                 min_survival_protection_hours, mdl_k_neighbors, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                memory_group,
                config.half_life_days,
                config.prune_threshold,
                config.min_survival_protection_hours,
                config.mdl_k_neighbors as i64,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn transaction(&self, f: &mut dyn FnMut(&Connection) -> Result<()>) -> Result<()> {
        self.check_open()?;
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        // flush WAL so the main file alone is a complete cube
        let conn = self.writer()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        tracing::debug!("closed cube {}", self.path.display());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

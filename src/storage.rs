//! SQLite storage layer for Dagram.

use crate::config::StoreConfig;
use crate::repository::{Mutation, Repository};
use crate::types::{Edge, EdgeId, Graph, GraphId, Node, NodeId};
use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage directory name.
pub const DAGRAM_DIR: &str = ".dagram";

/// SQLite database file.
pub const DB_FILE: &str = "dagram.db";

/// Schema version recorded in the meta table.
const SCHEMA_VERSION: &str = "1";

const GRAPH_COLUMNS: &str = "id, owner, title, created_at";
const NODE_COLUMNS: &str = "id, parent, title, enrichment, created_at, updated_at";
const EDGE_COLUMNS: &str = "e.id, e.source, e.target, e.enrichment, e.created_at";

/// SQLite-backed repository. A commit is one transaction.
pub struct SqliteRepository {
    root: Option<PathBuf>,
    db: Mutex<Connection>,
}

impl SqliteRepository {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path, config: &StoreConfig) -> Result<Self> {
        let dagram_dir = root.join(DAGRAM_DIR);
        fs::create_dir_all(&dagram_dir).context("Failed to create .dagram directory")?;

        let db = Connection::open(dagram_dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let storage = Self::from_connection(db, Some(root.to_path_buf()), config)?;
        log::info!("Initialized dagram storage in {}", dagram_dir.display());
        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path, config: &StoreConfig) -> Result<Self> {
        let dagram_dir = root.join(DAGRAM_DIR);
        if !dagram_dir.exists() {
            eyre::bail!("No .dagram directory found in {}. Initialize a store first.", root.display());
        }

        let db = Connection::open(dagram_dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let storage = Self::from_connection(db, Some(root.to_path_buf()), config)?;
        log::info!("Opened dagram storage in {}", dagram_dir.display());
        Ok(storage)
    }

    /// Storage that lives only as long as this value.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(db, None, config)
    }

    /// Directory the store was opened in, if it is file-backed.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn from_connection(db: Connection, root: Option<PathBuf>, config: &StoreConfig) -> Result<Self> {
        db.busy_timeout(config.busy_timeout)
            .context("Failed to set busy timeout")?;
        init_schema(&db)?;
        Ok(Self {
            root,
            db: Mutex::new(db),
        })
    }

    fn rollback(&self) {
        if let Err(err) = self.db.lock().execute_batch("ROLLBACK") {
            log::warn!("Failed to roll back write transaction: {}", err);
        }
    }

    fn query_graphs(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Graph>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(sql)?;
        let graphs = stmt
            .query_map(params, row_to_graph)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read graphs")?;
        Ok(graphs)
    }

    fn query_nodes(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Node>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(sql)?;
        let nodes = stmt
            .query_map(params, row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read nodes")?;
        Ok(nodes)
    }

    fn query_edges(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Edge>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(sql)?;
        let edges = stmt
            .query_map(params, row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read edges")?;
        Ok(edges)
    }
}

/// Initialize SQLite schema.
fn init_schema(db: &Connection) -> Result<()> {
    db.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS graphs (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (owner, title)
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            parent TEXT NOT NULL REFERENCES graphs(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            enrichment TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (parent, title)
        );

        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            target TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            enrichment TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (source, target),
            CHECK (source <> target)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#,
    )
    .context("Failed to initialize schema")?;

    let version: Option<String> = db
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .context("Failed to read schema version")?;

    match version {
        None => {
            db.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => eyre::bail!("Unsupported schema version {} (expected {})", v, SCHEMA_VERSION),
    }

    Ok(())
}

/// Apply one mutation inside an open savepoint.
fn apply(conn: &Connection, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::InsertGraph(graph) => {
            conn.execute(
                "INSERT INTO graphs (id, owner, title, created_at) VALUES (?, ?, ?, ?)",
                params![
                    graph.id.as_str(),
                    graph.owner,
                    graph.title,
                    format_timestamp(&graph.created_at)
                ],
            )
            .with_context(|| format!("Failed to insert graph {}", graph.id))?;
        }
        Mutation::InsertNode(node) => {
            conn.execute(
                r#"
                INSERT INTO nodes (id, parent, title, enrichment, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    node.id.as_str(),
                    node.parent.as_str(),
                    node.title,
                    serde_json::to_string(&node.enrichment).context("Failed to serialize enrichment")?,
                    format_timestamp(&node.created_at),
                    format_timestamp(&node.updated_at),
                ],
            )
            .with_context(|| format!("Failed to insert node {}", node.id))?;
        }
        Mutation::UpdateNode(node) => {
            let changed = conn
                .execute(
                    "UPDATE nodes SET title = ?, enrichment = ?, updated_at = ? WHERE id = ?",
                    params![
                        node.title,
                        serde_json::to_string(&node.enrichment).context("Failed to serialize enrichment")?,
                        format_timestamp(&node.updated_at),
                        node.id.as_str(),
                    ],
                )
                .with_context(|| format!("Failed to update node {}", node.id))?;
            if changed == 0 {
                eyre::bail!("cannot update missing node {}", node.id);
            }
        }
        Mutation::InsertEdge(edge) => {
            conn.execute(
                r#"
                INSERT INTO edges (id, source, target, enrichment, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    edge.id.as_str(),
                    edge.source.as_str(),
                    edge.target.as_str(),
                    serde_json::to_string(&edge.enrichment).context("Failed to serialize enrichment")?,
                    format_timestamp(&edge.created_at),
                ],
            )
            .with_context(|| format!("Failed to insert edge {}", edge.id))?;
        }
        Mutation::UpdateEdge(edge) => {
            let changed = conn
                .execute(
                    "UPDATE edges SET enrichment = ? WHERE id = ?",
                    params![
                        serde_json::to_string(&edge.enrichment).context("Failed to serialize enrichment")?,
                        edge.id.as_str(),
                    ],
                )
                .with_context(|| format!("Failed to update edge {}", edge.id))?;
            if changed == 0 {
                eyre::bail!("cannot update missing edge {}", edge.id);
            }
        }
        Mutation::DeleteEdge(id) => {
            conn.execute("DELETE FROM edges WHERE id = ?", params![id.as_str()])
                .with_context(|| format!("Failed to delete edge {}", id))?;
        }
        Mutation::DeleteNode(id) => {
            conn.execute("DELETE FROM nodes WHERE id = ?", params![id.as_str()])
                .with_context(|| format!("Failed to delete node {}", id))?;
        }
        Mutation::DeleteGraph(id) => {
            conn.execute("DELETE FROM graphs WHERE id = ?", params![id.as_str()])
                .with_context(|| format!("Failed to delete graph {}", id))?;
        }
    }
    Ok(())
}

impl Repository for SqliteRepository {
    fn graph(&self, id: &GraphId) -> Result<Option<Graph>> {
        let db = self.db.lock();
        let graph = db
            .query_row(
                &format!("SELECT {GRAPH_COLUMNS} FROM graphs WHERE id = ?"),
                params![id.as_str()],
                row_to_graph,
            )
            .optional()
            .context("Failed to read graph")?;
        Ok(graph)
    }

    fn graph_by_title(&self, owner: &str, title: &str) -> Result<Option<Graph>> {
        let db = self.db.lock();
        let graph = db
            .query_row(
                &format!("SELECT {GRAPH_COLUMNS} FROM graphs WHERE owner = ? AND title = ?"),
                params![owner, title],
                row_to_graph,
            )
            .optional()
            .context("Failed to read graph")?;
        Ok(graph)
    }

    fn graphs_of(&self, owner: &str) -> Result<Vec<Graph>> {
        self.query_graphs(
            &format!("SELECT {GRAPH_COLUMNS} FROM graphs WHERE owner = ? ORDER BY title ASC"),
            params![owner],
        )
    }

    fn node(&self, id: &NodeId) -> Result<Option<Node>> {
        let db = self.db.lock();
        let node = db
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                params![id.as_str()],
                row_to_node,
            )
            .optional()
            .context("Failed to read node")?;
        Ok(node)
    }

    fn node_by_title(&self, graph: &GraphId, title: &str) -> Result<Option<Node>> {
        let db = self.db.lock();
        let node = db
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE parent = ? AND title = ?"),
                params![graph.as_str(), title],
                row_to_node,
            )
            .optional()
            .context("Failed to read node")?;
        Ok(node)
    }

    fn nodes_of(&self, graph: &GraphId) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE parent = ? ORDER BY created_at ASC, title ASC"),
            params![graph.as_str()],
        )
    }

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        let db = self.db.lock();
        let edge = db
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM edges e WHERE e.id = ?"),
                params![id.as_str()],
                row_to_edge,
            )
            .optional()
            .context("Failed to read edge")?;
        Ok(edge)
    }

    fn edge_between(&self, source: &NodeId, target: &NodeId) -> Result<Option<Edge>> {
        let db = self.db.lock();
        let edge = db
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM edges e WHERE e.source = ? AND e.target = ?"),
                params![source.as_str(), target.as_str()],
                row_to_edge,
            )
            .optional()
            .context("Failed to read edge")?;
        Ok(edge)
    }

    fn edges_from(&self, node: &NodeId) -> Result<Vec<Edge>> {
        self.query_edges(
            &format!("SELECT {EDGE_COLUMNS} FROM edges e WHERE e.source = ? ORDER BY e.created_at ASC, e.id ASC"),
            params![node.as_str()],
        )
    }

    fn edges_to(&self, node: &NodeId) -> Result<Vec<Edge>> {
        self.query_edges(
            &format!("SELECT {EDGE_COLUMNS} FROM edges e WHERE e.target = ? ORDER BY e.created_at ASC, e.id ASC"),
            params![node.as_str()],
        )
    }

    fn edges_of(&self, graph: &GraphId) -> Result<Vec<Edge>> {
        self.query_edges(
            &format!(
                r#"
                SELECT {EDGE_COLUMNS}
                FROM edges e
                JOIN nodes s ON e.source = s.id
                JOIN nodes t ON e.target = t.id
                WHERE s.parent = ?1 AND t.parent = ?1
                ORDER BY e.created_at ASC, e.id ASC
                "#
            ),
            params![graph.as_str()],
        )
    }

    fn successors(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT target FROM edges WHERE source = ?")?;
        let targets = stmt
            .query_map(params![node.as_str()], |row| row.get::<_, String>(0).map(NodeId::from))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read successors")?;
        Ok(targets)
    }

    fn commit(&mut self, batch: Vec<Mutation>) -> Result<()> {
        let mut db = self.db.lock();
        // A savepoint nests inside an exclusive section and acts as its own
        // transaction outside one
        let sp = db.savepoint().context("Failed to begin savepoint")?;
        for mutation in &batch {
            apply(&sp, mutation)?;
        }
        sp.commit().context("Failed to release savepoint")?;
        Ok(())
    }

    fn exclusive<T, E>(&mut self, work: impl FnOnce(&mut Self) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        Self: Sized,
        E: From<eyre::Report>,
    {
        // IMMEDIATE takes the write lock up front, so another connection
        // waits here instead of checking against stale records
        self.db
            .lock()
            .execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin write transaction")?;

        match work(self) {
            Ok(value) => {
                let committed = self.db.lock().execute_batch("COMMIT");
                if let Err(err) = committed {
                    self.rollback();
                    return Err(eyre::Report::new(err)
                        .wrap_err("Failed to commit write transaction")
                        .into());
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_enrichment(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Convert a database row to a Graph.
fn row_to_graph(row: &Row) -> rusqlite::Result<Graph> {
    Ok(Graph {
        id: GraphId::from(row.get::<_, String>(0)?),
        owner: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_timestamp(row, 3)?,
    })
}

/// Convert a database row to a Node.
fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    Ok(Node {
        id: NodeId::from(row.get::<_, String>(0)?),
        parent: GraphId::from(row.get::<_, String>(1)?),
        title: row.get(2)?,
        enrichment: parse_enrichment(row, 3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

/// Convert a database row to an Edge.
fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: EdgeId::from(row.get::<_, String>(0)?),
        source: NodeId::from(row.get::<_, String>(1)?),
        target: NodeId::from(row.get::<_, String>(2)?),
        enrichment: parse_enrichment(row, 3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup_test_storage() -> (TempDir, SqliteRepository) {
        let temp_dir = TempDir::new().unwrap();
        let storage = SqliteRepository::init(temp_dir.path(), &StoreConfig::default()).unwrap();
        (temp_dir, storage)
    }

    fn graph(id: &str) -> Graph {
        Graph {
            id: GraphId::from(id),
            owner: "alice".to_string(),
            title: format!("Graph {}", id),
            created_at: Utc::now(),
        }
    }

    fn node(id: &str, parent: &str, enrichment: serde_json::Value) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId::from(id),
            parent: GraphId::from(parent),
            title: format!("Node {}", id),
            enrichment,
            created_at: now,
            updated_at: now,
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: EdgeId::from(id),
            source: NodeId::from(source),
            target: NodeId::from(target),
            enrichment: json!(null),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_init_creates_files() {
        let temp_dir = TempDir::new().unwrap();
        let storage = SqliteRepository::init(temp_dir.path(), &StoreConfig::default()).unwrap();

        assert!(temp_dir.path().join(DAGRAM_DIR).exists());
        assert!(temp_dir.path().join(DAGRAM_DIR).join(DB_FILE).exists());
        assert_eq!(storage.root(), Some(temp_dir.path()));
    }

    #[test]
    fn test_open_without_init_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(SqliteRepository::open(temp_dir.path(), &StoreConfig::default()).is_err());
    }

    #[test]
    fn test_node_roundtrip_preserves_fields() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let original = node("nd-1", "gr-1", json!({"weight": 2.5, "tags": ["x"], "nested": {"ok": true}}));

        storage
            .commit(vec![Mutation::InsertGraph(graph("gr-1")), Mutation::InsertNode(original.clone())])
            .unwrap();

        let loaded = storage.node(&NodeId::from("nd-1")).unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_string_enrichment_roundtrip() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage
            .commit(vec![
                Mutation::InsertGraph(graph("gr-1")),
                Mutation::InsertNode(node("nd-1", "gr-1", json!("just text"))),
            ])
            .unwrap();

        let loaded = storage.node(&NodeId::from("nd-1")).unwrap().unwrap();
        assert_eq!(loaded.enrichment, json!("just text"));
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage.commit(vec![Mutation::InsertGraph(graph("gr-1"))]).unwrap();

        // The second insert violates the primary key
        let result = storage.commit(vec![
            Mutation::InsertNode(node("nd-1", "gr-1", json!(null))),
            Mutation::InsertGraph(graph("gr-1")),
        ]);

        assert!(result.is_err());
        assert!(storage.node(&NodeId::from("nd-1")).unwrap().is_none());
    }

    #[test]
    fn test_exclusive_undoes_commits_on_error() {
        let mut storage = SqliteRepository::open_in_memory(&StoreConfig::default()).unwrap();
        assert!(storage.root().is_none());

        let result: Result<()> = storage.exclusive(|repo| {
            repo.commit(vec![Mutation::InsertGraph(graph("gr-1"))])?;
            eyre::bail!("abandoned after commit")
        });
        assert!(result.is_err());
        assert!(storage.graph(&GraphId::from("gr-1")).unwrap().is_none());

        let result: Result<()> = storage.exclusive(|repo| repo.commit(vec![Mutation::InsertGraph(graph("gr-2"))]));
        result.unwrap();
        assert!(storage.graph(&GraphId::from("gr-2")).unwrap().is_some());
    }

    #[test]
    fn test_exclusive_blocks_other_connections() {
        let (temp_dir, mut first) = setup_test_storage();
        let quick = StoreConfig::new().busy_timeout(Duration::from_millis(50));
        let mut second = SqliteRepository::open(temp_dir.path(), &quick).unwrap();

        let result: Result<()> = first.exclusive(|repo| {
            repo.commit(vec![Mutation::InsertGraph(graph("gr-1"))])?;
            // The file is write-locked until this section ends
            assert!(second.commit(vec![Mutation::InsertGraph(graph("gr-2"))]).is_err());
            Ok(())
        });
        result.unwrap();

        second.commit(vec![Mutation::InsertGraph(graph("gr-2"))]).unwrap();
        assert!(first.graph(&GraphId::from("gr-1")).unwrap().is_some());
        assert!(first.graph(&GraphId::from("gr-2")).unwrap().is_some());
    }

    #[test]
    fn test_self_loop_rejected_by_schema() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage
            .commit(vec![
                Mutation::InsertGraph(graph("gr-1")),
                Mutation::InsertNode(node("nd-1", "gr-1", json!(null))),
            ])
            .unwrap();

        assert!(storage.commit(vec![Mutation::InsertEdge(edge("ed-1", "nd-1", "nd-1"))]).is_err());
    }

    #[test]
    fn test_edges_of_and_successors() {
        let (_temp_dir, mut storage) = setup_test_storage();
        storage
            .commit(vec![
                Mutation::InsertGraph(graph("gr-1")),
                Mutation::InsertNode(node("nd-1", "gr-1", json!(null))),
                Mutation::InsertNode(node("nd-2", "gr-1", json!(null))),
                Mutation::InsertNode(node("nd-3", "gr-1", json!(null))),
                Mutation::InsertEdge(edge("ed-1", "nd-1", "nd-2")),
                Mutation::InsertEdge(edge("ed-2", "nd-1", "nd-3")),
            ])
            .unwrap();

        assert_eq!(storage.edges_of(&GraphId::from("gr-1")).unwrap().len(), 2);
        let mut successors = storage.successors(&NodeId::from("nd-1")).unwrap();
        successors.sort();
        assert_eq!(successors, vec![NodeId::from("nd-2"), NodeId::from("nd-3")]);
        assert_eq!(storage.edges_to(&NodeId::from("nd-3")).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut storage = SqliteRepository::init(temp_dir.path(), &StoreConfig::default()).unwrap();
            storage.commit(vec![Mutation::InsertGraph(graph("gr-1"))]).unwrap();
        }

        let storage = SqliteRepository::open(temp_dir.path(), &StoreConfig::default()).unwrap();
        assert_eq!(storage.graphs_of("alice").unwrap().len(), 1);
    }
}

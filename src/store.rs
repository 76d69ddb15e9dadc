//! High-level store API for Dagram.

use crate::config::StoreConfig;
use crate::id::{EDGE_PREFIX, GRAPH_PREFIX, NODE_PREFIX, generate_id};
use crate::memory::MemoryRepository;
use crate::repository::{Mutation, Repository};
use crate::storage::SqliteRepository;
use crate::traverse;
use crate::types::{
    Edge, EdgeId, Entity, Graph, GraphId, Node, NodeId, ValidationError, validate_owner, validate_title,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist, or a node is not in the asserted graph.
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    #[error("graph '{title}' already exists for owner '{owner}'")]
    DuplicateGraph { owner: String, title: String },

    #[error("graph {graph} already has a node titled '{title}'")]
    DuplicateTitle { graph: GraphId, title: String },

    #[error("edge {from} -> {to} already exists")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("nodes {from} and {to} belong to different graphs")]
    CrossGraphEdge { from: NodeId, to: NodeId },

    /// Adding this edge would create a cycle (self-loops included).
    #[error("adding edge {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The underlying repository failed.
    #[error(transparent)]
    Storage(#[from] eyre::Report),
}

impl StoreError {
    pub fn not_found(entity: Entity, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// The main Dagram store.
///
/// Every mutation runs under one write lock from its first check to its
/// commit, and inside the repository's exclusive section, so the acyclicity
/// check always sees the edge set it is about to extend. For SQLite that
/// section is an IMMEDIATE transaction, which also holds off other handles
/// on the same file. Queries share a read lock.
pub struct Store<R = SqliteRepository> {
    repo: RwLock<R>,
    config: StoreConfig,
}

impl Store<SqliteRepository> {
    /// Initialize a new store in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with_config(root, StoreConfig::default())
    }

    /// Initialize a new store with explicit settings.
    pub fn init_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        let repo = SqliteRepository::init(root, &config)?;
        Ok(Self::with_repository(repo, config))
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_config(root, StoreConfig::default())
    }

    /// Open an existing store with explicit settings.
    pub fn open_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        let repo = SqliteRepository::open(root, &config)?;
        Ok(Self::with_repository(repo, config))
    }
}

impl Store<MemoryRepository> {
    /// A store that keeps everything in process memory.
    pub fn in_memory() -> Self {
        Self::with_repository(MemoryRepository::new(), StoreConfig::default())
    }
}

impl<R: Repository> Store<R> {
    /// Build a store over any repository.
    pub fn with_repository(repo: R, config: StoreConfig) -> Self {
        Self {
            repo: RwLock::new(repo),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run one mutation under the write lock as an exclusive unit of the
    /// repository, so its checks and its commit see the same records.
    fn write<T>(&self, work: impl FnOnce(&mut R) -> Result<T>) -> Result<T> {
        self.repo.write().exclusive(work)
    }

    // ---------------------------------------------------------------------
    // Graphs
    // ---------------------------------------------------------------------

    /// Create a graph with no nodes.
    pub fn create_empty_graph(&self, owner: &str, title: &str) -> Result<Graph> {
        validate_owner(owner)?;
        validate_title(title, self.config.max_title_len)?;

        self.write(|repo| {
            if repo.graph_by_title(owner, title)?.is_some() {
                return Err(StoreError::DuplicateGraph {
                    owner: owner.to_string(),
                    title: title.to_string(),
                });
            }

            let now = Utc::now();
            let id = mint(GRAPH_PREFIX, title, now, |id: &GraphId| Ok(repo.graph(id)?.is_some()))?;
            let graph = Graph {
                id,
                owner: owner.to_string(),
                title: title.to_string(),
                created_at: now,
            };

            repo.commit(vec![Mutation::InsertGraph(graph.clone())])?;
            log::debug!("Created graph {} '{}' for {}", graph.id, graph.title, graph.owner);
            Ok(graph)
        })
    }

    /// Find a graph by owner and title.
    pub fn access_graph(&self, owner: &str, title: &str) -> Result<Graph> {
        self.repo
            .read()
            .graph_by_title(owner, title)?
            .ok_or_else(|| StoreError::not_found(Entity::Graph, format!("{}/{}", owner, title)))
    }

    /// Get a graph by id.
    pub fn get_graph(&self, id: &GraphId) -> Result<Option<Graph>> {
        Ok(self.repo.read().graph(id)?)
    }

    /// All graphs of an owner, by title.
    pub fn list_graphs(&self, owner: &str) -> Result<Vec<Graph>> {
        Ok(self.repo.read().graphs_of(owner)?)
    }

    /// Delete a graph together with its nodes and their edges.
    pub fn delete_graph(&self, graph: &GraphId) -> Result<()> {
        self.write(|repo| {
            require_graph(&*repo, graph)?;

            let nodes = repo.nodes_of(graph)?;
            let mut doomed = HashSet::new();
            let mut batch = Vec::new();
            for node in &nodes {
                for edge in incident_edges(&*repo, &node.id)? {
                    // An edge inside the graph is seen from both endpoints
                    if doomed.insert(edge.id.clone()) {
                        batch.push(Mutation::DeleteEdge(edge.id));
                    }
                }
            }
            let edge_count = doomed.len();
            batch.extend(nodes.iter().map(|n| Mutation::DeleteNode(n.id.clone())));
            batch.push(Mutation::DeleteGraph(graph.clone()));

            repo.commit(batch)?;
            log::debug!(
                "Deleted graph {} ({} nodes, {} edges)",
                graph,
                nodes.len(),
                edge_count
            );
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Add a node to a graph.
    pub fn add_node(&self, graph: &GraphId, title: &str, enrichment: Value) -> Result<Node> {
        validate_title(title, self.config.max_title_len)?;

        self.write(|repo| {
            require_graph(&*repo, graph)?;
            if repo.node_by_title(graph, title)?.is_some() {
                return Err(StoreError::DuplicateTitle {
                    graph: graph.clone(),
                    title: title.to_string(),
                });
            }

            let now = Utc::now();
            let id = mint(NODE_PREFIX, title, now, |id: &NodeId| Ok(repo.node(id)?.is_some()))?;
            let node = Node {
                id,
                parent: graph.clone(),
                title: title.to_string(),
                enrichment,
                created_at: now,
                updated_at: now,
            };

            repo.commit(vec![Mutation::InsertNode(node.clone())])?;
            log::debug!("Added node {} '{}' to graph {}", node.id, node.title, graph);
            Ok(node)
        })
    }

    /// Find a node by graph and title.
    pub fn access_node(&self, graph: &GraphId, title: &str) -> Result<Node> {
        let repo = self.repo.read();
        require_graph(&*repo, graph)?;
        repo.node_by_title(graph, title)?
            .ok_or_else(|| StoreError::not_found(Entity::Node, format!("{}/{}", graph, title)))
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        Ok(self.repo.read().node(id)?)
    }

    /// Rename a node. Renaming a node to its current title is a no-op.
    pub fn change_node_title(&self, graph: &GraphId, node: &NodeId, new_title: &str) -> Result<()> {
        validate_title(new_title, self.config.max_title_len)?;

        self.write(|repo| {
            let existing = require_node_in(&*repo, graph, node)?;
            if existing.title == new_title {
                return Ok(());
            }
            if repo.node_by_title(graph, new_title)?.is_some() {
                return Err(StoreError::DuplicateTitle {
                    graph: graph.clone(),
                    title: new_title.to_string(),
                });
            }

            let old_title = existing.title.clone();
            let updated = Node {
                title: new_title.to_string(),
                updated_at: Utc::now(),
                ..existing
            };
            repo.commit(vec![Mutation::UpdateNode(updated)])?;
            log::debug!("Renamed node {} '{}' -> '{}'", node, old_title, new_title);
            Ok(())
        })
    }

    /// Replace a node's enrichment payload.
    pub fn set_node_enrichment(&self, node: &NodeId, enrichment: Value) -> Result<Node> {
        self.write(|repo| {
            let existing = require_node(&*repo, node)?;
            let updated = Node {
                enrichment,
                updated_at: Utc::now(),
                ..existing
            };
            repo.commit(vec![Mutation::UpdateNode(updated.clone())])?;
            log::debug!("Replaced enrichment of node {}", node);
            Ok(updated)
        })
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&self, node: &NodeId) -> Result<()> {
        self.write(|repo| {
            require_node(&*repo, node)?;

            let mut batch: Vec<Mutation> = incident_edges(&*repo, node)?
                .into_iter()
                .map(|edge| Mutation::DeleteEdge(edge.id))
                .collect();
            let edge_count = batch.len();
            batch.push(Mutation::DeleteNode(node.clone()));

            repo.commit(batch)?;
            log::debug!("Removed node {} and {} incident edges", node, edge_count);
            Ok(())
        })
    }

    /// Nodes of a graph, oldest first.
    pub fn list_nodes(&self, graph: &GraphId) -> Result<Vec<Node>> {
        let repo = self.repo.read();
        require_graph(&*repo, graph)?;
        Ok(repo.nodes_of(graph)?)
    }

    // ---------------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------------

    /// Add an edge `source -> target` inside `graph`, rejecting anything that
    /// would close a cycle.
    pub fn add_edge(&self, graph: &GraphId, source: &NodeId, target: &NodeId, enrichment: Value) -> Result<Edge> {
        self.write(|repo| {
            require_graph(&*repo, graph)?;
            let from = require_node(&*repo, source)?;
            let to = require_node(&*repo, target)?;

            if from.parent != to.parent {
                return Err(StoreError::CrossGraphEdge {
                    from: source.clone(),
                    to: target.clone(),
                });
            }
            if from.parent != *graph {
                return Err(StoreError::not_found(Entity::Node, format!("{}/{}", graph, source)));
            }
            if repo.edge_between(source, target)?.is_some() {
                return Err(StoreError::DuplicateEdge {
                    from: source.clone(),
                    to: target.clone(),
                });
            }

            // source -> target closes a cycle iff target already reaches source
            if traverse::reaches(&*repo, target, source)? {
                log::warn!("Rejected edge {} -> {} in graph {}: cycle", source, target, graph);
                return Err(StoreError::CycleDetected {
                    from: source.clone(),
                    to: target.clone(),
                });
            }

            let now = Utc::now();
            let title = format!("{}->{}", source, target);
            let id = mint(EDGE_PREFIX, &title, now, |id: &EdgeId| Ok(repo.edge(id)?.is_some()))?;
            let edge = Edge {
                id,
                source: source.clone(),
                target: target.clone(),
                enrichment,
                created_at: now,
            };

            repo.commit(vec![Mutation::InsertEdge(edge.clone())])?;
            log::debug!("Added edge {} {} -> {} in graph {}", edge.id, source, target, graph);
            Ok(edge)
        })
    }

    /// Find the edge `source -> target` inside `graph`.
    pub fn access_edge(&self, graph: &GraphId, source: &NodeId, target: &NodeId) -> Result<Edge> {
        let repo = self.repo.read();
        require_graph(&*repo, graph)?;

        let missing = || StoreError::not_found(Entity::Edge, format!("{} -> {}", source, target));
        let edge = repo.edge_between(source, target)?.ok_or_else(missing)?;
        // Endpoints share a parent, so checking one is enough
        match repo.node(&edge.source)? {
            Some(node) if node.parent == *graph => Ok(edge),
            _ => Err(missing()),
        }
    }

    /// Get an edge by id.
    pub fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        Ok(self.repo.read().edge(id)?)
    }

    /// Replace an edge's enrichment payload.
    pub fn set_edge_enrichment(&self, edge: &EdgeId, enrichment: Value) -> Result<Edge> {
        self.write(|repo| {
            let existing = repo
                .edge(edge)?
                .ok_or_else(|| StoreError::not_found(Entity::Edge, edge))?;
            let updated = Edge { enrichment, ..existing };
            repo.commit(vec![Mutation::UpdateEdge(updated.clone())])?;
            log::debug!("Replaced enrichment of edge {}", edge);
            Ok(updated)
        })
    }

    /// Remove a single edge.
    pub fn remove_edge(&self, edge: &EdgeId) -> Result<()> {
        self.write(|repo| {
            if repo.edge(edge)?.is_none() {
                return Err(StoreError::not_found(Entity::Edge, edge));
            }
            repo.commit(vec![Mutation::DeleteEdge(edge.clone())])?;
            log::debug!("Removed edge {}", edge);
            Ok(())
        })
    }

    /// Edges whose endpoints both belong to `graph`.
    pub fn list_edges(&self, graph: &GraphId) -> Result<Vec<Edge>> {
        let repo = self.repo.read();
        require_graph(&*repo, graph)?;
        Ok(repo.edges_of(graph)?)
    }

    /// Edges leaving `node`.
    pub fn outgoing_edges(&self, node: &NodeId) -> Result<Vec<Edge>> {
        let repo = self.repo.read();
        require_node(&*repo, node)?;
        Ok(repo.edges_from(node)?)
    }

    /// Edges arriving at `node`.
    pub fn incoming_edges(&self, node: &NodeId) -> Result<Vec<Edge>> {
        let repo = self.repo.read();
        require_node(&*repo, node)?;
        Ok(repo.edges_to(node)?)
    }

    /// Whether `target` can be reached from `source` over zero or more edges.
    pub fn is_reachable(&self, source: &NodeId, target: &NodeId) -> Result<bool> {
        let repo = self.repo.read();
        require_node(&*repo, source)?;
        require_node(&*repo, target)?;
        Ok(traverse::reaches(&*repo, source, target)?)
    }

    /// Nodes and edges of a graph read under a single lock.
    pub(crate) fn graph_snapshot(&self, graph: &GraphId) -> Result<(Vec<Node>, Vec<Edge>)> {
        let repo = self.repo.read();
        require_graph(&*repo, graph)?;
        Ok((repo.nodes_of(graph)?, repo.edges_of(graph)?))
    }
}

/// Mint identifiers until one is free.
///
/// `taken` only sees live records, so the id of a deleted record could in
/// principle come back. Ids carry 40 random-looking bits, which makes that
/// negligible.
fn mint<I>(
    prefix: &str,
    title: &str,
    at: DateTime<Utc>,
    mut taken: impl FnMut(&I) -> eyre::Result<bool>,
) -> Result<I>
where
    I: From<String> + std::fmt::Display,
{
    loop {
        let id = I::from(generate_id(prefix, title, at));
        if !taken(&id)? {
            return Ok(id);
        }
        log::debug!("Identifier {} already taken, minting another", id);
    }
}

fn require_graph<R: Repository + ?Sized>(repo: &R, graph: &GraphId) -> Result<Graph> {
    repo.graph(graph)?
        .ok_or_else(|| StoreError::not_found(Entity::Graph, graph))
}

fn require_node<R: Repository + ?Sized>(repo: &R, node: &NodeId) -> Result<Node> {
    repo.node(node)?
        .ok_or_else(|| StoreError::not_found(Entity::Node, node))
}

/// A node that must exist and belong to `graph`.
fn require_node_in<R: Repository + ?Sized>(repo: &R, graph: &GraphId, node: &NodeId) -> Result<Node> {
    match repo.node(node)? {
        Some(found) if found.parent == *graph => Ok(found),
        _ => Err(StoreError::not_found(Entity::Node, format!("{}/{}", graph, node))),
    }
}

/// Every edge with `node` as source or target.
fn incident_edges<R: Repository + ?Sized>(repo: &R, node: &NodeId) -> Result<Vec<Edge>> {
    let mut edges = repo.edges_from(node)?;
    edges.extend(repo.edges_to(node)?);
    Ok(edges)
}

//! Storage abstraction used by the store.
//!
//! A repository holds the three record collections and knows nothing about
//! the graph invariants: uniqueness, endpoint scoping, acyclicity and
//! cascades are all decided by [`Store`](crate::Store) before it calls
//! [`Repository::commit`].

use crate::types::{Edge, EdgeId, Graph, GraphId, Node, NodeId};
use eyre::Result;

/// A single write applied by [`Repository::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertGraph(Graph),
    InsertNode(Node),
    /// Replace a node's title, enrichment and `updated_at`.
    UpdateNode(Node),
    InsertEdge(Edge),
    /// Replace an edge's enrichment.
    UpdateEdge(Edge),
    DeleteEdge(EdgeId),
    DeleteNode(NodeId),
    DeleteGraph(GraphId),
}

/// Record storage for graphs, nodes and edges.
///
/// List methods return records in a stable order: graphs by title, nodes
/// by `(created_at, title)`, edges by `(created_at, id)`.
pub trait Repository {
    /// Look up a graph by id.
    fn graph(&self, id: &GraphId) -> Result<Option<Graph>>;

    /// Look up a graph by its `(owner, title)` key.
    fn graph_by_title(&self, owner: &str, title: &str) -> Result<Option<Graph>>;

    /// All graphs of an owner.
    fn graphs_of(&self, owner: &str) -> Result<Vec<Graph>>;

    /// Look up a node by id.
    fn node(&self, id: &NodeId) -> Result<Option<Node>>;

    /// Look up a node by its `(parent, title)` key.
    fn node_by_title(&self, graph: &GraphId, title: &str) -> Result<Option<Node>>;

    /// All nodes whose parent is `graph`.
    fn nodes_of(&self, graph: &GraphId) -> Result<Vec<Node>>;

    /// Look up an edge by id.
    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>>;

    /// Look up the edge for an ordered endpoint pair.
    fn edge_between(&self, source: &NodeId, target: &NodeId) -> Result<Option<Edge>>;

    /// Edges whose source is `node`.
    fn edges_from(&self, node: &NodeId) -> Result<Vec<Edge>>;

    /// Edges whose target is `node`.
    fn edges_to(&self, node: &NodeId) -> Result<Vec<Edge>>;

    /// Edges whose endpoints both belong to `graph`.
    fn edges_of(&self, graph: &GraphId) -> Result<Vec<Edge>>;

    /// Targets of the edges leaving `node`.
    fn successors(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        Ok(self.edges_from(node)?.into_iter().map(|edge| edge.target).collect())
    }

    /// Apply every mutation in order, all or nothing.
    fn commit(&mut self, batch: Vec<Mutation>) -> Result<()>;

    /// Run `work` as one exclusive unit of reads and commits.
    ///
    /// Storage that other handles can reach must hold them off until
    /// `work` returns, and undo its commits if `work` fails.
    fn exclusive<T, E>(&mut self, work: impl FnOnce(&mut Self) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        Self: Sized,
        E: From<eyre::Report>,
    {
        work(self)
    }
}

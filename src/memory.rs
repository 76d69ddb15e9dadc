//! In-memory repository backed by hash maps.

use crate::repository::{Mutation, Repository};
use crate::types::{Edge, EdgeId, Graph, GraphId, Node, NodeId};
use eyre::{Result, bail};
use std::collections::{HashMap, HashSet};

/// Hash-map repository with secondary indexes for every lookup the store
/// performs. Nothing is persisted.
#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    graphs: HashMap<GraphId, Graph>,
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,

    graph_titles: HashMap<(String, String), GraphId>,
    node_titles: HashMap<(GraphId, String), NodeId>,
    children: HashMap<GraphId, HashSet<NodeId>>,
    pairs: HashMap<(NodeId, NodeId), EdgeId>,
    outgoing: HashMap<NodeId, HashSet<EdgeId>>,
    incoming: HashMap<NodeId, HashSet<EdgeId>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a batch that touches records in an impossible way, before
    /// anything is applied.
    fn check(&self, batch: &[Mutation]) -> Result<()> {
        for mutation in batch {
            match mutation {
                Mutation::InsertGraph(graph) if self.graphs.contains_key(&graph.id) => {
                    bail!("graph {} already stored", graph.id)
                }
                Mutation::InsertNode(node) if self.nodes.contains_key(&node.id) => {
                    bail!("node {} already stored", node.id)
                }
                Mutation::InsertEdge(edge) if self.edges.contains_key(&edge.id) => {
                    bail!("edge {} already stored", edge.id)
                }
                Mutation::UpdateNode(node) if !self.nodes.contains_key(&node.id) => {
                    bail!("cannot update missing node {}", node.id)
                }
                Mutation::UpdateEdge(edge) if !self.edges.contains_key(&edge.id) => {
                    bail!("cannot update missing edge {}", edge.id)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::InsertGraph(graph) => {
                self.graph_titles
                    .insert((graph.owner.clone(), graph.title.clone()), graph.id.clone());
                self.graphs.insert(graph.id.clone(), graph);
            }
            Mutation::InsertNode(node) => {
                self.node_titles
                    .insert((node.parent.clone(), node.title.clone()), node.id.clone());
                self.children
                    .entry(node.parent.clone())
                    .or_default()
                    .insert(node.id.clone());
                self.nodes.insert(node.id.clone(), node);
            }
            Mutation::UpdateNode(node) => {
                if let Some(old) = self.nodes.get(&node.id) {
                    self.node_titles.remove(&(old.parent.clone(), old.title.clone()));
                }
                self.node_titles
                    .insert((node.parent.clone(), node.title.clone()), node.id.clone());
                self.nodes.insert(node.id.clone(), node);
            }
            Mutation::InsertEdge(edge) => {
                self.pairs
                    .insert((edge.source.clone(), edge.target.clone()), edge.id.clone());
                self.outgoing
                    .entry(edge.source.clone())
                    .or_default()
                    .insert(edge.id.clone());
                self.incoming
                    .entry(edge.target.clone())
                    .or_default()
                    .insert(edge.id.clone());
                self.edges.insert(edge.id.clone(), edge);
            }
            Mutation::UpdateEdge(edge) => {
                self.edges.insert(edge.id.clone(), edge);
            }
            Mutation::DeleteEdge(id) => {
                if let Some(edge) = self.edges.remove(&id) {
                    self.pairs.remove(&(edge.source.clone(), edge.target.clone()));
                    if let Some(ids) = self.outgoing.get_mut(&edge.source) {
                        ids.remove(&id);
                    }
                    if let Some(ids) = self.incoming.get_mut(&edge.target) {
                        ids.remove(&id);
                    }
                }
            }
            Mutation::DeleteNode(id) => {
                if let Some(node) = self.nodes.remove(&id) {
                    self.node_titles.remove(&(node.parent.clone(), node.title));
                    if let Some(ids) = self.children.get_mut(&node.parent) {
                        ids.remove(&id);
                    }
                    self.outgoing.remove(&id);
                    self.incoming.remove(&id);
                }
            }
            Mutation::DeleteGraph(id) => {
                if let Some(graph) = self.graphs.remove(&id) {
                    self.graph_titles.remove(&(graph.owner, graph.title));
                    self.children.remove(&id);
                }
            }
        }
    }

    fn collect_edges<'a>(&self, ids: impl IntoIterator<Item = &'a EdgeId>) -> Vec<Edge> {
        let mut edges: Vec<Edge> = ids.into_iter().filter_map(|id| self.edges.get(id).cloned()).collect();
        sort_edges(&mut edges);
        edges
    }
}

fn sort_edges(edges: &mut [Edge]) {
    edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

impl Repository for MemoryRepository {
    fn graph(&self, id: &GraphId) -> Result<Option<Graph>> {
        Ok(self.graphs.get(id).cloned())
    }

    fn graph_by_title(&self, owner: &str, title: &str) -> Result<Option<Graph>> {
        Ok(self
            .graph_titles
            .get(&(owner.to_string(), title.to_string()))
            .and_then(|id| self.graphs.get(id))
            .cloned())
    }

    fn graphs_of(&self, owner: &str) -> Result<Vec<Graph>> {
        let mut graphs: Vec<Graph> = self.graphs.values().filter(|g| g.owner == owner).cloned().collect();
        graphs.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(graphs)
    }

    fn node(&self, id: &NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.get(id).cloned())
    }

    fn node_by_title(&self, graph: &GraphId, title: &str) -> Result<Option<Node>> {
        Ok(self
            .node_titles
            .get(&(graph.clone(), title.to_string()))
            .and_then(|id| self.nodes.get(id))
            .cloned())
    }

    fn nodes_of(&self, graph: &GraphId) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .children
            .get(graph)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id).cloned())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.title.cmp(&b.title)));
        Ok(nodes)
    }

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        Ok(self.edges.get(id).cloned())
    }

    fn edge_between(&self, source: &NodeId, target: &NodeId) -> Result<Option<Edge>> {
        Ok(self
            .pairs
            .get(&(source.clone(), target.clone()))
            .and_then(|id| self.edges.get(id))
            .cloned())
    }

    fn edges_from(&self, node: &NodeId) -> Result<Vec<Edge>> {
        Ok(self.collect_edges(self.outgoing.get(node).into_iter().flatten()))
    }

    fn edges_to(&self, node: &NodeId) -> Result<Vec<Edge>> {
        Ok(self.collect_edges(self.incoming.get(node).into_iter().flatten()))
    }

    fn edges_of(&self, graph: &GraphId) -> Result<Vec<Edge>> {
        let members = match self.children.get(graph) {
            Some(members) => members,
            None => return Ok(Vec::new()),
        };
        let ids = members
            .iter()
            .filter_map(|node| self.outgoing.get(node))
            .flatten()
            .filter(|id| self.edges.get(*id).is_some_and(|edge| members.contains(&edge.target)));
        Ok(self.collect_edges(ids))
    }

    fn successors(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .outgoing
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .map(|edge| edge.target.clone())
            .collect())
    }

    fn commit(&mut self, batch: Vec<Mutation>) -> Result<()> {
        self.check(&batch)?;
        for mutation in batch {
            self.apply(mutation);
        }
        Ok(())
    }
}

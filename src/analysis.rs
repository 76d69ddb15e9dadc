//! Whole-graph analysis built on top of the store.

use crate::repository::Repository;
use crate::store::{Result, Store};
use crate::traverse::topological_sort;
use crate::types::{GraphId, Node, NodeId};
use std::collections::HashSet;

/// Summary counts for one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Nodes with no incoming edges.
    pub roots: usize,
    /// Nodes with no outgoing edges.
    pub leaves: usize,
}

/// Extension trait adding analysis queries to Store.
pub trait StoreAnalysisExt {
    /// Nodes with no incoming edges, in node order.
    fn roots(&self, graph: &GraphId) -> Result<Vec<Node>>;

    /// Every node of the graph, ordered so that each edge points forward.
    fn topological_order(&self, graph: &GraphId) -> Result<Vec<Node>>;

    /// Node, edge, root and leaf counts.
    fn stats(&self, graph: &GraphId) -> Result<GraphStats>;
}

impl<R: Repository> StoreAnalysisExt for Store<R> {
    fn roots(&self, graph: &GraphId) -> Result<Vec<Node>> {
        let (nodes, edges) = self.graph_snapshot(graph)?;
        let targets: HashSet<&NodeId> = edges.iter().map(|e| &e.target).collect();
        Ok(nodes.into_iter().filter(|n| !targets.contains(&n.id)).collect())
    }

    fn topological_order(&self, graph: &GraphId) -> Result<Vec<Node>> {
        let (nodes, edges) = self.graph_snapshot(graph)?;
        topological_sort(nodes, &edges)
            .ok_or_else(|| eyre::eyre!("stored edges of graph {} contain a cycle", graph).into())
    }

    fn stats(&self, graph: &GraphId) -> Result<GraphStats> {
        let (nodes, edges) = self.graph_snapshot(graph)?;
        let targets: HashSet<&NodeId> = edges.iter().map(|e| &e.target).collect();
        let sources: HashSet<&NodeId> = edges.iter().map(|e| &e.source).collect();

        Ok(GraphStats {
            nodes: nodes.len(),
            edges: edges.len(),
            roots: nodes.iter().filter(|n| !targets.contains(&n.id)).count(),
            leaves: nodes.iter().filter(|n| !sources.contains(&n.id)).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn titles(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.title.as_str()).collect()
    }

    #[test]
    fn test_roots_and_stats() {
        let store = Store::in_memory();
        let g = store.create_empty_graph("Alice", "Build").unwrap();
        let a = store.add_node(&g.id, "A", json!(null)).unwrap();
        let b = store.add_node(&g.id, "B", json!(null)).unwrap();
        let c = store.add_node(&g.id, "C", json!(null)).unwrap();
        store.add_node(&g.id, "Lonely", json!(null)).unwrap();
        store.add_edge(&g.id, &a.id, &c.id, json!(null)).unwrap();
        store.add_edge(&g.id, &b.id, &c.id, json!(null)).unwrap();

        let mut roots: Vec<String> = store.roots(&g.id).unwrap().into_iter().map(|n| n.title).collect();
        roots.sort();
        assert_eq!(roots, vec!["A", "B", "Lonely"]);

        let stats = store.stats(&g.id).unwrap();
        assert_eq!(
            stats,
            GraphStats {
                nodes: 4,
                edges: 2,
                roots: 3,
                leaves: 2,
            }
        );
    }

    #[test]
    fn test_topological_order_puts_sources_first() {
        let store = Store::in_memory();
        let g = store.create_empty_graph("Alice", "Build").unwrap();
        let c = store.add_node(&g.id, "C", json!(null)).unwrap();
        let b = store.add_node(&g.id, "B", json!(null)).unwrap();
        let a = store.add_node(&g.id, "A", json!(null)).unwrap();
        store.add_edge(&g.id, &a.id, &b.id, json!(null)).unwrap();
        store.add_edge(&g.id, &b.id, &c.id, json!(null)).unwrap();

        let order = store.topological_order(&g.id).unwrap();
        assert_eq!(titles(&order), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_analysis_on_missing_graph() {
        let store = Store::in_memory();
        let missing = GraphId::from("gr-missing");
        assert!(store.roots(&missing).unwrap_err().is_not_found());
        assert!(store.topological_order(&missing).unwrap_err().is_not_found());
        assert!(store.stats(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_stats_empty_graph() {
        let store = Store::in_memory();
        let g = store.create_empty_graph("Alice", "Empty").unwrap();
        assert_eq!(store.stats(&g.id).unwrap(), GraphStats::default());
    }
}

//! Shared test infrastructure for Dagram integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use dagram::{Edge, Graph, GraphId, Node, Repository, Store, StoreAnalysisExt};
use serde_json::json;
use std::collections::HashMap;
use tempfile::TempDir;

/// Default owner used by helpers.
pub const OWNER: &str = "alice";

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        init_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Drop the current store handle and open the same directory again.
    pub fn reopen(&mut self) {
        self.store = Store::open(self.temp_dir.path()).expect("Failed to reopen store");
    }

    /// Create a graph owned by the default owner.
    pub fn create_graph(&self, title: &str) -> Graph {
        self.store
            .create_empty_graph(OWNER, title)
            .expect("Failed to create graph")
    }

    /// Add a node with a null payload.
    pub fn add_node(&self, graph: &Graph, title: &str) -> Node {
        self.store
            .add_node(&graph.id, title, json!(null))
            .expect("Failed to add node")
    }

    /// Add nodes for each title, in order.
    pub fn add_nodes(&self, graph: &Graph, titles: &[&str]) -> Vec<Node> {
        titles.iter().map(|t| self.add_node(graph, t)).collect()
    }

    /// Add an edge with a null payload.
    pub fn connect(&self, graph: &Graph, source: &Node, target: &Node) -> Edge {
        self.store
            .add_edge(&graph.id, &source.id, &target.id, json!(null))
            .expect("Failed to add edge")
    }

    /// Sorted node titles of a graph.
    pub fn node_titles(&self, graph: &Graph) -> Vec<String> {
        node_titles(&self.store, &graph.id)
    }

    /// Sorted `(source title, target title)` pairs of a graph's edges.
    pub fn edge_titles(&self, graph: &Graph) -> Vec<(String, String)> {
        edge_titles(&self.store, &graph.id)
    }

    /// Assert that the graph's edges admit a topological order.
    pub fn assert_acyclic(&self, graph: &Graph) {
        assert_acyclic(&self.store, &graph.id);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn node_titles<R: Repository>(store: &Store<R>, graph: &GraphId) -> Vec<String> {
    let mut titles: Vec<String> = store
        .list_nodes(graph)
        .expect("Failed to list nodes")
        .into_iter()
        .map(|n| n.title)
        .collect();
    titles.sort();
    titles
}

pub fn edge_titles<R: Repository>(store: &Store<R>, graph: &GraphId) -> Vec<(String, String)> {
    let titles: HashMap<_, _> = store
        .list_nodes(graph)
        .expect("Failed to list nodes")
        .into_iter()
        .map(|n| (n.id, n.title))
        .collect();
    let mut pairs: Vec<(String, String)> = store
        .list_edges(graph)
        .expect("Failed to list edges")
        .iter()
        .map(|e| (titles[&e.source].clone(), titles[&e.target].clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Every edge must point forward in the store's topological order.
pub fn assert_acyclic<R: Repository>(store: &Store<R>, graph: &GraphId) {
    let order = store
        .topological_order(graph)
        .expect("Graph should have a topological order");
    let position: HashMap<_, _> = order.iter().enumerate().map(|(i, n)| (n.id.clone(), i)).collect();

    for edge in store.list_edges(graph).expect("Failed to list edges") {
        assert_ne!(edge.source, edge.target, "self-loop {:?}", edge);
        assert!(
            position[&edge.source] < position[&edge.target],
            "edge {} -> {} points backwards",
            edge.source,
            edge.target
        );
    }
}

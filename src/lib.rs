//! Dagram: a store for directed acyclic graphs.
//!
//! Dagram keeps named graphs of uniquely-titled nodes and rejects any edge
//! that would close a cycle. Nodes and edges carry an opaque JSON payload
//! that the store never looks at. Records live in SQLite or in memory.
//!
//! # Example
//!
//! ```no_run
//! use dagram::{Store, StoreError};
//! use serde_json::json;
//! use std::path::Path;
//!
//! // Initialize a new store
//! let store = Store::init(Path::new(".")).unwrap();
//!
//! // Create a graph and some nodes
//! let graph = store.create_empty_graph("alice", "Deps").unwrap();
//! let a = store.add_node(&graph.id, "A", json!({"kind": "lib"})).unwrap();
//! let b = store.add_node(&graph.id, "B", json!(null)).unwrap();
//!
//! // Connect them
//! store.add_edge(&graph.id, &a.id, &b.id, json!(null)).unwrap();
//!
//! // Closing the loop is refused
//! let err = store.add_edge(&graph.id, &b.id, &a.id, json!(null)).unwrap_err();
//! assert!(matches!(err, StoreError::CycleDetected { .. }));
//!
//! // Removing a node takes its edges with it
//! store.remove_node(&a.id).unwrap();
//! assert!(store.list_edges(&graph.id).unwrap().is_empty());
//! ```

mod config;
mod id;
mod memory;
mod repository;
mod storage;
mod store;
mod traverse;
mod types;

pub mod analysis;

// Re-export public API
pub use analysis::{GraphStats, StoreAnalysisExt};
pub use config::StoreConfig;
pub use memory::MemoryRepository;
pub use repository::{Mutation, Repository};
pub use storage::{DAGRAM_DIR, DB_FILE, SqliteRepository};
pub use store::{Result, Store, StoreError};
pub use types::{Edge, EdgeId, Entity, Graph, GraphId, Node, NodeId, ValidationError};

//! Graph traversals over a repository.

use crate::repository::Repository;
use crate::types::{Edge, Node, NodeId};
use eyre::Result;
use std::collections::{HashMap, HashSet, VecDeque};

/// Whether `to` is reachable from `from` over zero or more edges.
///
/// Adding `source -> target` creates a cycle exactly when
/// `reaches(repo, target, source)` holds; the zero-length path covers
/// self-loops.
pub fn reaches<R: Repository + ?Sized>(repo: &R, from: &NodeId, to: &NodeId) -> Result<bool> {
    // DFS from 'from', following edges forward
    let mut visited = HashSet::new();
    let mut stack = vec![from.clone()];

    while let Some(node) = stack.pop() {
        if node == *to {
            return Ok(true);
        }
        if visited.insert(node.clone()) {
            stack.extend(repo.successors(&node)?);
        }
    }

    log::trace!("{} does not reach {} ({} nodes visited)", from, to, visited.len());
    Ok(false)
}

/// Order `nodes` so that every edge points forward (Kahn's algorithm).
///
/// Nodes that become free at the same time keep their input order.
/// Returns `None` if the edges contain a cycle.
pub fn topological_sort(nodes: Vec<Node>, edges: &[Edge]) -> Option<Vec<Node>> {
    let total = nodes.len();
    let order: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut by_id: HashMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

    let mut in_degree: HashMap<&NodeId, usize> = order.iter().map(|id| (id, 0)).collect();
    let mut successors: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for edge in edges {
        if let Some(degree) = in_degree.get_mut(&edge.target) {
            *degree += 1;
        }
        successors.entry(&edge.source).or_default().push(&edge.target);
    }

    let mut queue: VecDeque<&NodeId> = order.iter().filter(|id| in_degree[id] == 0).collect();
    let mut sorted = Vec::with_capacity(total);

    while let Some(id) = queue.pop_front() {
        for next in successors.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(*next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
        if let Some(node) = by_id.remove(id) {
            sorted.push(node);
        }
    }

    (sorted.len() == total).then_some(sorted)
}

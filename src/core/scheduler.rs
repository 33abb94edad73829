//! Deterministic evaluation order (Kahn's algorithm)

use crate::core::graph::DependencyGraph;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::CellAddress;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

impl DependencyGraph {
    /// Order every node so each cell comes after all cells it reads.
    /// Among ready cells the smallest address goes first, so identical graphs
    /// always yield identical orders.
    pub fn topological_order(&self) -> AnalyzerResult<Vec<CellAddress>> {
        schedule(self)
    }
}

pub fn schedule(graph: &DependencyGraph) -> AnalyzerResult<Vec<CellAddress>> {
    let inner = graph.inner();
    let mut in_degree: Vec<usize> = inner
        .node_indices()
        .map(|idx| inner.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<(&CellAddress, NodeIndex)>> = inner
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .map(|idx| Reverse((&inner[idx].address, idx)))
        .collect();

    let mut order = Vec::with_capacity(inner.node_count());
    while let Some(Reverse((address, idx))) = ready.pop() {
        order.push(address.clone());
        for next in inner.neighbors_directed(idx, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse((&inner[next].address, next)));
            }
        }
    }

    if order.len() < inner.node_count() {
        let cyclic: Vec<CellAddress> = graph.detect_cycles().cells().into_iter().collect();
        debug!(scheduled = order.len(), total = inner.node_count(), "scheduling stopped at a cycle");
        return Err(AnalyzerError::CycleDetected(cyclic));
    }

    Ok(order)
}

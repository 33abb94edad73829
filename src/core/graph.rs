//! Cell dependency graph
//!
//! Edges point from the referenced cell to the formula cell that reads it,
//! so a topological order lists every cell after everything it depends on.

use crate::core::reference::{FormulaParser, FormulaReferences, ParseWarningKind, DEFAULT_MAX_RANGE_CELLS};
use crate::types::{CellAddress, CellRole};
use crate::workbook::Workbook;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

// =============================================================================
// Nodes, edges, reports
// =============================================================================

/// A cell taking part in at least one dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub address: CellAddress,
    pub role: CellRole,
    pub has_formula: bool,
    /// Referenced but never assigned: empty cell, missing sheet, unknown name
    pub external: bool,
    /// The cell holds a spreadsheet error value
    pub is_error: bool,
}

/// `to` directly references `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: CellAddress,
    pub to: CellAddress,
}

/// A non-fatal problem found while reading one cell's formula
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParseWarning {
    pub cell: CellAddress,
    pub kind: ParseWarningKind,
    pub detail: String,
}

/// Strongly connected components that form cycles. Each cycle is sorted,
/// cycles are ordered by their smallest address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycles: Vec<Vec<CellAddress>>,
}

impl CycleReport {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Every cell caught in some cycle
    pub fn cells(&self) -> BTreeSet<CellAddress> {
        self.cycles.iter().flatten().cloned().collect()
    }

    pub fn contains(&self, address: &CellAddress) -> bool {
        self.cycles.iter().any(|cycle| cycle.contains(address))
    }
}

/// Direct precedents and dependents of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighborhood {
    pub cell: CellAddress,
    pub precedents: Vec<CellAddress>,
    pub dependents: Vec<CellAddress>,
}

// =============================================================================
// Graph
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    index: HashMap<CellAddress, NodeIndex>,
}

impl DependencyGraph {
    fn insert_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node.address) {
            return idx;
        }
        let address = node.address.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(address, idx);
        idx
    }

    pub fn node(&self, address: &CellAddress) -> Option<&GraphNode> {
        self.index.get(address).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, address: &CellAddress) -> bool {
        self.index.contains_key(address)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All nodes ordered by address
    pub fn nodes(&self) -> Vec<&GraphNode> {
        let mut nodes: Vec<&GraphNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes
    }

    /// All edges ordered by (from, to)
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_references()
            .map(|e| DependencyEdge {
                from: self.graph[e.source()].address.clone(),
                to: self.graph[e.target()].address.clone(),
            })
            .collect();
        edges.sort();
        edges
    }

    fn neighbors(&self, address: &CellAddress, direction: Direction) -> Vec<CellAddress> {
        let Some(&idx) = self.index.get(address) else {
            return Vec::new();
        };
        let mut cells: Vec<CellAddress> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].address.clone())
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }

    /// Cells the given cell reads directly
    pub fn precedents(&self, address: &CellAddress) -> Vec<CellAddress> {
        self.neighbors(address, Direction::Incoming)
    }

    /// Cells reading the given cell directly
    pub fn dependents(&self, address: &CellAddress) -> Vec<CellAddress> {
        self.neighbors(address, Direction::Outgoing)
    }

    fn reachable(&self, address: &CellAddress, direction: Direction) -> Vec<CellAddress> {
        let Some(&start) = self.index.get(address) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, direction) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let mut cells: Vec<CellAddress> = visited
            .into_iter()
            .filter(|&idx| idx != start)
            .map(|idx| self.graph[idx].address.clone())
            .collect();
        cells.sort();
        cells
    }

    /// Everything the cell depends on, at any depth
    pub fn transitive_precedents(&self, address: &CellAddress) -> Vec<CellAddress> {
        self.reachable(address, Direction::Incoming)
    }

    /// Everything that depends on the cell, at any depth
    pub fn transitive_dependents(&self, address: &CellAddress) -> Vec<CellAddress> {
        self.reachable(address, Direction::Outgoing)
    }

    pub fn neighborhood(&self, address: &CellAddress) -> Option<Neighborhood> {
        self.contains(address).then(|| Neighborhood {
            cell: address.clone(),
            precedents: self.precedents(address),
            dependents: self.dependents(address),
        })
    }

    fn addresses_where(&self, keep: impl Fn(&GraphNode) -> bool) -> Vec<CellAddress> {
        let mut cells: Vec<CellAddress> = self
            .graph
            .node_weights()
            .filter(|n| keep(n))
            .map(|n| n.address.clone())
            .collect();
        cells.sort();
        cells
    }

    pub fn inputs(&self) -> Vec<CellAddress> {
        self.addresses_where(|n| n.role == CellRole::Input)
    }

    pub fn derived(&self) -> Vec<CellAddress> {
        self.addresses_where(|n| n.role == CellRole::Derived)
    }

    pub fn external(&self) -> Vec<CellAddress> {
        self.addresses_where(|n| n.external)
    }

    /// SCC analysis: components with more than one node, or a single node
    /// with a self edge
    pub fn detect_cycles(&self) -> CycleReport {
        let mut cycles: Vec<Vec<CellAddress>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                if scc.len() == 1 {
                    let idx = scc[0];
                    self.graph.edges_connecting(idx, idx).next().is_some()
                } else {
                    true
                }
            })
            .map(|scc| {
                let mut cells: Vec<CellAddress> = scc
                    .into_iter()
                    .map(|idx| self.graph[idx].address.clone())
                    .collect();
                cells.sort();
                cells
            })
            .collect();
        cycles.sort();
        CycleReport { cycles }
    }

    /// Copy of the graph without the given cells and their edges
    pub fn without(&self, excluded: &BTreeSet<CellAddress>) -> DependencyGraph {
        let graph = self.graph.filter_map(
            |_, node| (!excluded.contains(&node.address)).then(|| node.clone()),
            |_, _| Some(()),
        );
        let index = graph
            .node_indices()
            .map(|idx| (graph[idx].address.clone(), idx))
            .collect();
        DependencyGraph { graph, index }
    }

    /// The graph minus every node caught in a cycle
    pub fn acyclic_remainder(&self, cycles: &CycleReport) -> DependencyGraph {
        self.without(&cycles.cells())
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphNode, ()> {
        &self.graph
    }
}

impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes() == other.nodes() && self.edges() == other.edges()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphData {
    nodes: Vec<GraphNode>,
    edges: Vec<DependencyEdge>,
}

impl Serialize for DependencyGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GraphData {
            nodes: self.nodes().into_iter().cloned().collect(),
            edges: self.edges(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DependencyGraph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = GraphData::deserialize(deserializer)?;
        let mut graph = DependencyGraph::default();
        for node in data.nodes {
            graph.insert_node(node);
        }
        for edge in data.edges {
            match (graph.index.get(&edge.from), graph.index.get(&edge.to)) {
                (Some(&from), Some(&to)) => {
                    graph.graph.update_edge(from, to, ());
                }
                _ => {
                    return Err(serde::de::Error::custom(format!(
                        "edge {} -> {} names an unknown node",
                        edge.from, edge.to
                    )))
                }
            }
        }
        Ok(graph)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Everything produced by one graph build
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: DependencyGraph,
    pub cycles: CycleReport,
    pub warnings: Vec<ParseWarning>,
    /// Parsed references of every formula cell, reused by the metric rules
    pub references: HashMap<CellAddress, FormulaReferences>,
}

/// Builds the dependency graph of a workbook
pub struct DependencyGraphBuilder<'a> {
    workbook: &'a Workbook,
    max_range_cells: u64,
}

impl<'a> DependencyGraphBuilder<'a> {
    pub fn new(workbook: &'a Workbook) -> Self {
        Self {
            workbook,
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
        }
    }

    pub fn with_max_range_cells(mut self, max_range_cells: u64) -> Self {
        self.max_range_cells = max_range_cells;
        self
    }

    fn node_for(&self, address: &CellAddress) -> GraphNode {
        match self.workbook.cell(address) {
            Some(record) if !address.is_synthetic() => GraphNode {
                address: address.clone(),
                role: record.role,
                has_formula: record.has_formula(),
                external: false,
                is_error: record.value.is_error(),
            },
            _ => GraphNode {
                address: address.clone(),
                role: CellRole::Unknown,
                has_formula: false,
                external: !self.is_named_constant(address),
                is_error: false,
            },
        }
    }

    /// Placeholder standing for a defined name bound to a value
    fn is_named_constant(&self, address: &CellAddress) -> bool {
        address
            .synthetic_label()
            .and_then(|label| label.strip_prefix("name:"))
            .and_then(|name| self.workbook.named_range(name))
            .is_some_and(|named| named.constant)
    }

    /// Parse every formula cell and wire referenced → formula edges.
    /// Cycles are reported, never fatal.
    pub fn build(&self) -> GraphBuild {
        let parser = FormulaParser::new(self.workbook).with_max_range_cells(self.max_range_cells);
        let mut graph = DependencyGraph::default();
        let mut warnings = Vec::new();
        let mut references = HashMap::new();

        for record in self.workbook.formula_cells() {
            let refs = parser.parse(record.formula.as_deref(), &record.address.sheet);

            for issue in &refs.issues {
                warn!(cell = %record.address, kind = ?issue.kind, "{}", issue.detail);
                warnings.push(ParseWarning {
                    cell: record.address.clone(),
                    kind: issue.kind,
                    detail: issue.detail.clone(),
                });
            }

            let dependencies = refs.dependencies();
            references.insert(record.address.clone(), refs);
            if dependencies.is_empty() {
                continue;
            }
            let to = graph.insert_node(self.node_for(&record.address));
            for dependency in &dependencies {
                let from = graph.insert_node(self.node_for(dependency));
                graph.graph.update_edge(from, to, ());
            }
            debug!(cell = %record.address, references = dependencies.len(), "formula wired");
        }

        classify(&mut graph);
        let cycles = graph.detect_cycles();
        for cycle in &cycles.cycles {
            let cells: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            warn!(cells = %cells.join(", "), "circular reference");
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cycles = cycles.len(),
            warnings = warnings.len(),
            "dependency graph built"
        );

        GraphBuild {
            graph,
            cycles,
            warnings,
            references,
        }
    }
}

/// External nodes stay unknown; otherwise no incoming edge means input,
/// anything fed by another cell is derived.
fn classify(graph: &mut DependencyGraph) {
    let indices: Vec<NodeIndex> = graph.graph.node_indices().collect();
    for idx in indices {
        let fed = graph
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
            .is_some();
        let node = &mut graph.graph[idx];
        node.role = if node.external {
            CellRole::Unknown
        } else if fed {
            CellRole::Derived
        } else {
            CellRole::Input
        };
    }
}

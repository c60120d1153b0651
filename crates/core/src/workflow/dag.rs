use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Errors raised by the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The traversal frontier emptied before every vertex was visited
    #[error("Cycle detected among vertices {unvisited:?}")]
    CycleDetected { unvisited: Vec<usize> },

    #[error("Vertex {vertex} is out of range for a graph with {vertex_count} vertices")]
    VertexOutOfRange { vertex: usize, vertex_count: usize },
}

/// Directed graph over dense vertex ids `0..n`
///
/// An edge `(from, to)` means `from` must execute before `to`. At most one
/// edge exists per ordered pair; adding it again replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "GraphRecord", try_from = "GraphRecord")]
pub struct DependencyGraph {
    graph: DiGraph<(), ()>,
}

impl DependencyGraph {
    /// Create a graph with `vertex_count` vertices and no edges
    pub fn new(vertex_count: usize) -> Self {
        let mut graph = DiGraph::with_capacity(vertex_count, 0);
        for _ in 0..vertex_count {
            graph.add_node(());
        }
        Self { graph }
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Insert the edge `(from, to)`, replacing an existing one for the same pair
    pub fn add_edge(&mut self, from: usize, to: usize) -> Result<(), GraphError> {
        let from = self.index(from)?;
        let to = self.index(to)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    pub fn in_degree(&self, vertex: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(vertex), Direction::Incoming)
            .count()
    }

    pub fn out_degree(&self, vertex: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(vertex), Direction::Outgoing)
            .count()
    }

    /// Direct predecessors of `vertex`, in the order their edges were added
    pub fn dependencies(&self, vertex: usize) -> Vec<usize> {
        self.ordered_edges(vertex, Direction::Incoming)
    }

    /// Direct successors of `vertex`, in the order their edges were added
    pub fn successors(&self, vertex: usize) -> Vec<usize> {
        self.ordered_edges(vertex, Direction::Outgoing)
    }

    /// Vertices with no incoming edges
    pub fn sources(&self) -> Vec<usize> {
        (0..self.vertex_count())
            .filter(|&v| self.in_degree(v) == 0)
            .collect()
    }

    /// Vertices with no outgoing edges
    pub fn sinks(&self) -> Vec<usize> {
        (0..self.vertex_count())
            .filter(|&v| self.out_degree(v) == 0)
            .collect()
    }

    /// All edges as `(from, to)` pairs, in insertion order
    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index()))
            .collect()
    }

    /// Every vertex exactly once, each after all of its predecessors (Kahn)
    ///
    /// The frontier is FIFO and seeded in ascending vertex order. A fresh
    /// traversal state is built per call; the graph itself is never mutated.
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.vertex_count();
        let mut remaining: Vec<usize> = (0..n).map(|v| self.in_degree(v)).collect();
        let mut frontier: VecDeque<usize> = (0..n).filter(|&v| remaining[v] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(vertex) = frontier.pop_front() {
            order.push(vertex);
            for successor in self.successors(vertex) {
                remaining[successor] -= 1;
                if remaining[successor] == 0 {
                    frontier.push_back(successor);
                }
            }
        }

        if order.len() < n {
            let unvisited = (0..n).filter(|&v| remaining[v] > 0).collect();
            return Err(GraphError::CycleDetected { unvisited });
        }

        Ok(order)
    }

    fn index(&self, vertex: usize) -> Result<NodeIndex, GraphError> {
        if vertex < self.vertex_count() {
            Ok(NodeIndex::new(vertex))
        } else {
            Err(GraphError::VertexOutOfRange {
                vertex,
                vertex_count: self.vertex_count(),
            })
        }
    }

    fn ordered_edges(&self, vertex: usize, direction: Direction) -> Vec<usize> {
        if vertex >= self.vertex_count() {
            return Vec::new();
        }
        // petgraph walks adjacency newest-first; edge ids give insertion order
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(NodeIndex::new(vertex), direction)
            .map(|e| {
                let other = match direction {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                (e.id().index(), other.index())
            })
            .collect();
        edges.sort_unstable_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, v)| v).collect()
    }
}

/// Persisted form of a [`DependencyGraph`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphRecord {
    vertex_count: usize,
    edges: Vec<(usize, usize)>,
}

impl From<DependencyGraph> for GraphRecord {
    fn from(graph: DependencyGraph) -> Self {
        Self {
            vertex_count: graph.vertex_count(),
            edges: graph.edges(),
        }
    }
}

impl TryFrom<GraphRecord> for DependencyGraph {
    type Error = GraphError;

    fn try_from(record: GraphRecord) -> Result<Self, Self::Error> {
        let mut graph = DependencyGraph::new(record.vertex_count);
        for (from, to) in record.edges {
            graph.add_edge(from, to)?;
        }
        Ok(graph)
    }
}

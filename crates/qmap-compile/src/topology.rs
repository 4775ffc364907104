//! Physical connectivity of a target device.

use petgraph::algo::connected_components;
use petgraph::graph::UnGraph;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Target device coupling map.
///
/// The coupling map defines which pairs of physical qubits can
/// interact with two-qubit gates (including the swaps a mapper inserts).
///
/// ## Performance
///
/// On construction, a distance matrix is precomputed using BFS from each
/// node. This enables O(1) `distance()` lookups and O(distance) path
/// reconstruction during routing.
///
/// [`add_edge`](Self::add_edge) drops the matrices; lookups then fall back
/// to a BFS until [`rebuild_caches()`](Self::rebuild_caches) is called.
///
/// ## Deserialization
///
/// Only the edge list and qubit count are serialized. Deserializing
/// validates the edges like [`from_edges`](Self::from_edges) and rebuilds
/// the adjacency list and both matrices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CouplingEdges")]
pub struct CouplingMap {
    /// List of connected qubit pairs (bidirectional).
    edges: Vec<(u32, u32)>,
    /// Number of physical qubits.
    num_qubits: u32,
    #[serde(skip)]
    adjacency: FxHashMap<u32, Vec<u32>>,
    /// `dist_matrix[from][to]`, `u32::MAX` if unreachable.
    #[serde(skip)]
    dist_matrix: Vec<Vec<u32>>,
    /// `pred_matrix[from][to]` is the node before `to` on a shortest path.
    #[serde(skip)]
    pred_matrix: Vec<Vec<u32>>,
}

/// Serialized form of a [`CouplingMap`].
#[derive(Deserialize)]
struct CouplingEdges {
    edges: Vec<(u32, u32)>,
    num_qubits: u32,
}

impl TryFrom<CouplingEdges> for CouplingMap {
    type Error = CompileError;

    fn try_from(data: CouplingEdges) -> CompileResult<Self> {
        Self::from_edges(data.num_qubits, data.edges)
    }
}

impl CouplingMap {
    /// Create a coupling map with the given number of qubits and no edges.
    pub fn new(num_qubits: u32) -> Self {
        Self {
            edges: vec![],
            num_qubits,
            adjacency: FxHashMap::default(),
            dist_matrix: vec![],
            pred_matrix: vec![],
        }
    }

    /// Build a coupling map from an edge list.
    ///
    /// Fails if an edge references a qubit outside `0..num_qubits` or is a
    /// self-loop.
    pub fn from_edges(
        num_qubits: u32,
        edges: impl IntoIterator<Item = (u32, u32)>,
    ) -> CompileResult<Self> {
        let mut map = Self::new(num_qubits);
        for (q1, q2) in edges {
            if q1 >= num_qubits || q2 >= num_qubits || q1 == q2 {
                return Err(CompileError::Configuration(format!(
                    "invalid coupling edge ({q1}, {q2}) for {num_qubits} qubits"
                )));
            }
            map.add_edge(q1, q2);
        }
        map.precompute_distances();
        Ok(map)
    }

    /// Add an edge between two qubits (bidirectional).
    ///
    /// Duplicate edges (including reversed pairs) are silently ignored.
    /// A new edge invalidates the distance and predecessor matrices.
    pub fn add_edge(&mut self, q1: u32, q2: u32) {
        if self.is_connected(q1, q2) {
            return;
        }
        self.edges.push((q1, q2));
        self.adjacency.entry(q1).or_default().push(q2);
        self.adjacency.entry(q2).or_default().push(q1);
        self.dist_matrix.clear();
        self.pred_matrix.clear();
    }

    /// Whether the distance and predecessor matrices match the edge list.
    fn has_distance_cache(&self) -> bool {
        self.dist_matrix.len() == self.num_qubits as usize
    }

    fn precompute_distances(&mut self) {
        let n = self.num_qubits as usize;
        self.dist_matrix = vec![vec![u32::MAX; n]; n];
        self.pred_matrix = vec![vec![u32::MAX; n]; n];

        for src in 0..n {
            self.dist_matrix[src][src] = 0;
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(src as u32);

            while let Some(current) = queue.pop_front() {
                let cur = current as usize;
                for &neighbor in self.adjacency.get(&current).into_iter().flatten() {
                    let nb = neighbor as usize;
                    if nb < n && self.dist_matrix[src][nb] == u32::MAX {
                        self.dist_matrix[src][nb] = self.dist_matrix[src][cur] + 1;
                        self.pred_matrix[src][nb] = current;
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    /// Rebuild the adjacency list and distance/predecessor matrices from the
    /// edge list.
    pub fn rebuild_caches(&mut self) {
        self.adjacency.clear();
        for &(q1, q2) in &self.edges {
            self.adjacency.entry(q1).or_default().push(q2);
            self.adjacency.entry(q2).or_default().push(q1);
        }
        self.precompute_distances();
    }

    /// Check if two qubits are directly connected.
    #[inline]
    pub fn is_connected(&self, q1: u32, q2: u32) -> bool {
        self.adjacency
            .get(&q1)
            .is_some_and(|neighbors| neighbors.contains(&q2))
    }

    /// Get the number of physical qubits.
    #[inline]
    pub fn num_qubits(&self) -> u32 {
        self.num_qubits
    }

    /// Get the coupling edges.
    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    /// Get neighbors of a qubit.
    pub fn neighbors(&self, qubit: u32) -> impl Iterator<Item = u32> + '_ {
        self.adjacency
            .get(&qubit)
            .map(|v| v.iter().copied())
            .into_iter()
            .flatten()
    }

    /// Whether every qubit can reach every other one.
    pub fn is_connected_graph(&self) -> bool {
        if self.num_qubits == 0 {
            return true;
        }
        let mut graph = UnGraph::<(), ()>::with_capacity(self.num_qubits as usize, self.edges.len());
        for _ in 0..self.num_qubits {
            graph.add_node(());
        }
        graph.extend_with_edges(self.edges.iter().copied());
        connected_components(&graph) == 1
    }

    /// Create a linear coupling map (0-1-2-3-...).
    pub fn linear(n: u32) -> Self {
        let mut map = Self::new(n);
        for i in 0..n.saturating_sub(1) {
            map.add_edge(i, i + 1);
        }
        map.precompute_distances();
        map
    }

    /// Create a cyclic chain (a linear chain whose ends are coupled).
    pub fn ring(n: u32) -> Self {
        let mut map = Self::linear(n);
        if n > 2 {
            map.add_edge(n - 1, 0);
            map.precompute_distances();
        }
        map
    }

    /// Create a 2-D grid with row-major qubit numbering.
    pub fn grid(rows: u32, columns: u32) -> Self {
        let mut map = Self::new(rows * columns);
        for row in 0..rows {
            for column in 0..columns {
                let id = row * columns + column;
                if column + 1 < columns {
                    map.add_edge(id, id + 1);
                }
                if row + 1 < rows {
                    map.add_edge(id, id + columns);
                }
            }
        }
        map.precompute_distances();
        map
    }

    /// Create a star topology (center qubit connected to all others).
    pub fn star(n: u32) -> Self {
        let mut map = Self::new(n);
        for i in 1..n {
            map.add_edge(0, i);
        }
        map.precompute_distances();
        map
    }

    /// O(1) shortest-path distance lookup using the precomputed matrix, or a
    /// BFS when the matrix is stale.
    pub fn distance(&self, from: u32, to: u32) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        if !self.has_distance_cache() {
            let path = self.shortest_path_bfs(from, to)?;
            return u32::try_from(path.len() - 1).ok();
        }
        let d = *self.dist_matrix.get(from as usize)?.get(to as usize)?;
        (d != u32::MAX).then_some(d)
    }

    /// Reconstruct the shortest path `from → to`, both ends included.
    /// Returns `None` if no path exists.
    pub fn shortest_path(&self, from: u32, to: u32) -> Option<Vec<u32>> {
        if from == to {
            return Some(vec![from]);
        }
        if !self.has_distance_cache() {
            return self.shortest_path_bfs(from, to);
        }
        self.distance(from, to)?;

        let preds = &self.pred_matrix[from as usize];
        let mut path = vec![to];
        let mut current = to;
        while current != from {
            let pred = preds[current as usize];
            if pred == u32::MAX {
                return None;
            }
            path.push(pred);
            current = pred;
        }
        path.reverse();
        Some(path)
    }

    /// Fallback BFS when the matrices are stale. Neighbors are visited in
    /// insertion order, so paths match the precomputed ones.
    fn shortest_path_bfs(&self, from: u32, to: u32) -> Option<Vec<u32>> {
        let mut preds: FxHashMap<u32, u32> = FxHashMap::default();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(from);
        preds.insert(from, from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut node = to;
                while node != from {
                    node = *preds.get(&node)?;
                    path.push(node);
                }
                path.reverse();
                return Some(path);
            }
            for &neighbor in self.adjacency.get(&current).into_iter().flatten() {
                if let std::collections::hash_map::Entry::Vacant(e) = preds.entry(neighbor) {
                    e.insert(current);
                    queue.push_back(neighbor);
                }
            }
        }

        None
    }
}

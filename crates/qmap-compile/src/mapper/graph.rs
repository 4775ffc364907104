//! Arbitrary connected coupling graphs.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashSet;

use qmap_ir::{Command, GateKind, QubitId};

use crate::error::{CompileError, CompileResult};
use crate::mapping::Mapping;
use crate::topology::CouplingMap;

use super::{GraphMapper, MapperEngine, Plan, RoutingStrategy};

/// Picks the node for a qubit entering the mapping.
///
/// Called only while the mapping has a free node. Returning `None` leaves
/// the qubit unplaced until a later cycle; a returned node must be free.
pub type Placement = Box<dyn Fn(&CouplingMap, &Mapping, QubitId) -> Option<u32> + Send + Sync>;

/// Default [`Placement`]: the free node with the lowest id.
pub fn lowest_free_node(coupling: &CouplingMap, mapping: &Mapping, _qubit: QubitId) -> Option<u32> {
    (0..coupling.num_qubits()).find(|&p| mapping.get_logical(p).is_none())
}

/// Routes interactions along shortest paths of a coupling graph.
///
/// Every path routed in one cycle reserves its nodes. An interaction whose
/// shortest path crosses a reserved node first tries a detour through a
/// neighbour of either endpoint; failing that, it is deferred to a later
/// cycle instead of undoing other routes.
pub struct GraphRouting {
    coupling: CouplingMap,
    placement: Placement,
}

impl fmt::Debug for GraphRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphRouting")
            .field("coupling", &self.coupling)
            .finish_non_exhaustive()
    }
}

impl GraphRouting {
    /// Wrap a coupling map, which must be connected.
    pub fn new(mut coupling: CouplingMap) -> CompileResult<Self> {
        if coupling.num_qubits() == 0 {
            return Err(CompileError::Configuration(
                "coupling graph has no qubits".into(),
            ));
        }
        if !coupling.is_connected_graph() {
            return Err(CompileError::Configuration(format!(
                "coupling graph with {} qubits is not connected",
                coupling.num_qubits()
            )));
        }
        coupling.rebuild_caches();
        Ok(Self {
            coupling,
            placement: Box::new(lowest_free_node),
        })
    }

    /// Replace the initial placement of new qubits.
    #[must_use]
    pub fn with_placement(
        mut self,
        placement: impl Fn(&CouplingMap, &Mapping, QubitId) -> Option<u32> + Send + Sync + 'static,
    ) -> Self {
        self.placement = Box::new(placement);
        self
    }

    /// The underlying coupling map.
    pub fn coupling(&self) -> &CouplingMap {
        &self.coupling
    }
}

/// Per-cycle routing state.
struct Router<'a> {
    coupling: &'a CouplingMap,
    placement: &'a Placement,
    /// Mapping at the start of the cycle.
    placed: &'a Mapping,
    mapping: Mapping,
    active: FxHashSet<QubitId>,
    reserved: FxHashSet<u32>,
    swaps: Vec<(u32, u32)>,
}

impl Router<'_> {
    fn place(&mut self, qubit: QubitId) -> CompileResult<()> {
        if self.mapping.len() >= self.coupling.num_qubits() as usize {
            return Ok(());
        }
        let Some(node) = (self.placement)(self.coupling, &self.mapping, qubit) else {
            return Ok(());
        };
        if node >= self.coupling.num_qubits() || self.mapping.get_logical(node).is_some() {
            return Err(CompileError::Configuration(format!(
                "placement put {qubit} on node {node}, which is not a free node"
            )));
        }
        self.mapping.insert(qubit, node)?;
        self.active.insert(qubit);
        Ok(())
    }

    fn deactivate(&mut self, q0: QubitId, q1: QubitId) {
        self.active.remove(&q0);
        self.active.remove(&q1);
    }

    fn physical(&self, qubit: QubitId) -> CompileResult<u32> {
        self.mapping.get_physical(qubit).ok_or_else(|| {
            CompileError::InternalInvariant(format!("active qubit {qubit} is not placed"))
        })
    }

    fn is_free(&self, path: &[u32]) -> bool {
        !path.iter().any(|node| self.reserved.contains(node))
    }

    /// Shortest path from `p0` to `p1` that avoids every reserved node and
    /// leaves one endpoint through a neighbour. Ties keep the first
    /// candidate, neighbours of `p0` before neighbours of `p1`.
    fn detour(&self, p0: u32, p1: u32) -> Option<Vec<u32>> {
        let via_p0 = self.coupling.neighbors(p0).filter_map(|n| {
            let rest = self.coupling.shortest_path(n, p1)?;
            (!rest.contains(&p0)).then(|| [vec![p0], rest].concat())
        });
        let via_p1 = self.coupling.neighbors(p1).filter_map(|n| {
            let mut path = self.coupling.shortest_path(p0, n)?;
            (!path.contains(&p1)).then(|| {
                path.push(p1);
                path
            })
        });
        via_p0
            .chain(via_p1)
            .filter(|path| self.is_free(path))
            .fold(None, |best: Option<Vec<u32>>, path| match best {
                Some(best) if best.len() <= path.len() => Some(best),
                _ => Some(path),
            })
    }

    fn route(&mut self, q0: QubitId, q1: QubitId) -> CompileResult<()> {
        if !self.active.contains(&q0) || !self.active.contains(&q1) {
            self.deactivate(q0, q1);
            return Ok(());
        }
        let (p0, p1) = (self.physical(q0)?, self.physical(q1)?);
        if self.coupling.is_connected(p0, p1) {
            self.reserved.extend([p0, p1]);
            return Ok(());
        }

        let shortest = self.coupling.shortest_path(p0, p1).ok_or_else(|| {
            CompileError::InternalInvariant(format!("no path between nodes {p0} and {p1}"))
        })?;
        let path = if self.is_free(&shortest) {
            shortest
        } else if let Some(detour) = self.detour(p0, p1) {
            detour
        } else {
            self.deactivate(q0, q1);
            return Ok(());
        };
        self.reserved.extend(path.iter().copied());

        // q0 walks to `meet`, q1 walks to `meet + 1`.
        let meet = (path.len() - 2) / 2;
        for i in 0..meet {
            self.exchange(path[i], path[i + 1]);
        }
        for j in (meet + 2..path.len()).rev() {
            self.exchange(path[j], path[j - 1]);
        }
        Ok(())
    }

    /// Exchange two nodes. Only exchanges that move a qubit placed before
    /// this cycle are emitted; qubits placed during the cycle simply start
    /// at their final node.
    fn exchange(&mut self, a: u32, b: u32) {
        let moves_placed = [a, b].into_iter().any(|node| {
            self.mapping
                .get_logical(node)
                .is_some_and(|logical| self.placed.contains(logical))
        });
        self.mapping.swap(a, b);
        if moves_placed {
            self.swaps.push((a, b));
        }
    }
}

impl RoutingStrategy for GraphRouting {
    fn name(&self) -> &'static str {
        "GraphMapper"
    }

    fn capacity(&self) -> usize {
        self.coupling.num_qubits() as usize
    }

    fn is_adjacent(&self, p0: u32, p1: u32) -> bool {
        self.coupling.is_connected(p0, p1)
    }

    fn plan(
        &mut self,
        allocated: &FxHashSet<QubitId>,
        buffer: &VecDeque<Command>,
        current: &Mapping,
    ) -> CompileResult<Plan> {
        let capacity = self.capacity();
        let mut router = Router {
            coupling: &self.coupling,
            placement: &self.placement,
            placed: current,
            mapping: current.clone(),
            active: allocated
                .iter()
                .copied()
                .chain(current.iter().map(|(logical, _)| logical))
                .collect(),
            reserved: FxHashSet::default(),
            swaps: Vec::new(),
        };

        for cmd in buffer {
            if router.mapping.len() == capacity && router.active.is_empty() {
                break;
            }
            let qubits: Vec<QubitId> = cmd.all_qubits().collect();
            if qubits.is_empty() || qubits.len() > 2 {
                return Err(CompileError::InternalInvariant(format!(
                    "mapper buffer holds a command on {} qubits: {cmd}",
                    qubits.len()
                )));
            }
            match (&cmd.gate, qubits.as_slice()) {
                (GateKind::Allocate, &[qubit]) => {
                    if !router.mapping.contains(qubit) {
                        router.place(qubit)?;
                    }
                }
                (GateKind::Deallocate, &[qubit]) => {
                    router.active.remove(&qubit);
                }
                (_, &[q0, q1]) => router.route(q0, q1)?,
                _ => {}
            }
        }

        Ok(Plan {
            mapping: router.mapping,
            swaps: router.swaps,
        })
    }
}

impl GraphMapper {
    /// Mapper for a connected coupling graph.
    pub fn graph(coupling: CouplingMap) -> CompileResult<Self> {
        Ok(MapperEngine::new(GraphRouting::new(coupling)?))
    }

    /// Replace the initial placement of new qubits; see [`Placement`].
    #[must_use]
    pub fn with_placement(
        mut self,
        placement: impl Fn(&CouplingMap, &Mapping, QubitId) -> Option<u32> + Send + Sync + 'static,
    ) -> Self {
        self.strategy.placement = Box::new(placement);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmap_ir::StandardGate;

    fn cx(control: u32, target: u32) -> Command {
        Command::gate(StandardGate::X, &[QubitId(target)], &[QubitId(control)]).unwrap()
    }

    fn mapping(pairs: &[(u32, u32)]) -> Mapping {
        Mapping::from_pairs(pairs.iter().map(|&(l, p)| (QubitId(l), p))).unwrap()
    }

    fn allocated(ids: &[u32]) -> FxHashSet<QubitId> {
        ids.iter().map(|&q| QubitId(q)).collect()
    }

    /// Path graph 0-1-...-(n-1) given as an explicit edge list.
    fn path_graph(n: u32) -> GraphRouting {
        GraphRouting::new(CouplingMap::from_edges(n, (1..n).map(|q| (q - 1, q))).unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_disconnected_graph() {
        let split = CouplingMap::from_edges(4, [(0, 1), (2, 3)]).unwrap();
        assert!(matches!(
            GraphRouting::new(split),
            Err(CompileError::Configuration(_))
        ));
        assert!(GraphRouting::new(CouplingMap::new(0)).is_err());
    }

    #[test]
    fn test_endpoints_meet_in_the_middle() {
        let mut graph = path_graph(5);
        let current = mapping(&[(0, 0), (1, 4)]);
        let plan = graph
            .plan(&allocated(&[0, 1]), &VecDeque::from([cx(0, 1)]), &current)
            .unwrap();
        assert_eq!(plan.swaps, vec![(0, 1), (4, 3), (3, 2)]);
        assert_eq!(plan.mapping.get_physical(QubitId(0)), Some(1));
        assert_eq!(plan.mapping.get_physical(QubitId(1)), Some(2));
    }

    #[test]
    fn test_crossing_paths_are_deferred() {
        let mut graph = path_graph(6);
        let current = mapping(&[(0, 0), (1, 3), (2, 2), (3, 5)]);
        let buffer = VecDeque::from([cx(0, 1), cx(2, 3), cx(2, 1)]);
        let plan = graph
            .plan(&allocated(&[0, 1, 2, 3]), &buffer, &current)
            .unwrap();
        assert_eq!(plan.swaps, vec![(0, 1), (3, 2)]);
        assert_eq!(plan.mapping.get_physical(QubitId(0)), Some(1));
        assert_eq!(plan.mapping.get_physical(QubitId(1)), Some(2));
        assert_eq!(plan.mapping.get_physical(QubitId(2)), Some(3));
    }

    #[test]
    fn test_crossing_path_takes_detour() {
        // Ring 0-1-2-3-4-5-0: the shortest path 0-1-2-3 is blocked by the
        // adjacent pair on 1 and 2, the other way round is free.
        let mut graph = GraphRouting::new(CouplingMap::ring(6)).unwrap();
        let current = mapping(&[(0, 1), (1, 2), (2, 0), (3, 3)]);
        let buffer = VecDeque::from([cx(0, 1), cx(2, 3)]);
        let plan = graph
            .plan(&allocated(&[0, 1, 2, 3]), &buffer, &current)
            .unwrap();
        assert_eq!(plan.swaps, vec![(0, 5), (3, 4)]);
        assert_eq!(plan.mapping.get_physical(QubitId(2)), Some(5));
        assert_eq!(plan.mapping.get_physical(QubitId(3)), Some(4));
        assert_eq!(plan.mapping.get_physical(QubitId(0)), Some(1));
    }

    #[test]
    fn test_routes_on_incrementally_built_map() {
        let mut coupling = CouplingMap::new(3);
        coupling.add_edge(0, 1);
        coupling.add_edge(1, 2);
        let mut graph = GraphRouting::new(coupling).unwrap();
        let current = mapping(&[(0, 0), (1, 1), (2, 2)]);
        let plan = graph
            .plan(&allocated(&[0, 1, 2]), &VecDeque::from([cx(0, 2)]), &current)
            .unwrap();
        assert_eq!(plan.swaps, vec![(2, 1)]);
        assert_eq!(plan.mapping.get_physical(QubitId(2)), Some(1));
    }

    #[test]
    fn test_custom_placement() {
        let mut graph = GraphRouting::new(CouplingMap::linear(4)).unwrap().with_placement(
            |coupling, mapping, _| {
                (0..coupling.num_qubits())
                    .rev()
                    .find(|&p| mapping.get_logical(p).is_none())
            },
        );
        let buffer = VecDeque::from([Command::allocate(QubitId(0)), Command::allocate(QubitId(1))]);
        let plan = graph
            .plan(&FxHashSet::default(), &buffer, &Mapping::new())
            .unwrap();
        assert_eq!(plan.mapping.get_physical(QubitId(0)), Some(3));
        assert_eq!(plan.mapping.get_physical(QubitId(1)), Some(2));

        let mut lazy = GraphRouting::new(CouplingMap::linear(2)).unwrap().with_placement(|_, _, _| None);
        let plan = lazy
            .plan(&FxHashSet::default(), &buffer, &Mapping::new())
            .unwrap();
        assert!(plan.mapping.is_empty());
    }

    #[test]
    fn test_placement_on_occupied_node_is_rejected() {
        let mut graph = GraphRouting::new(CouplingMap::linear(3))
            .unwrap()
            .with_placement(|_, _, _| Some(0));
        let buffer = VecDeque::from([Command::allocate(QubitId(5))]);
        assert!(matches!(
            graph.plan(&allocated(&[4]), &buffer, &mapping(&[(4, 0)])),
            Err(CompileError::Configuration(_))
        ));
    }

    #[test]
    fn test_adjacent_pair_reserves_nodes() {
        let mut graph = path_graph(4);
        let current = mapping(&[(0, 1), (1, 2), (2, 0), (3, 3)]);
        let buffer = VecDeque::from([cx(0, 1), cx(2, 3)]);
        let plan = graph
            .plan(&allocated(&[0, 1, 2, 3]), &buffer, &current)
            .unwrap();
        assert!(plan.swaps.is_empty());
        assert_eq!(plan.mapping, current);
    }

    #[test]
    fn test_new_qubits_take_lowest_free_nodes() {
        let mut graph = GraphRouting::new(CouplingMap::star(4)).unwrap();
        let current = mapping(&[(7, 0)]);
        let buffer = VecDeque::from([
            Command::allocate(QubitId(8)),
            Command::allocate(QubitId(9)),
            cx(8, 9),
        ]);
        let plan = graph.plan(&allocated(&[7]), &buffer, &current).unwrap();
        // Leaves 1 and 2 only meet through the occupied hub.
        assert_eq!(plan.swaps, vec![(2, 0)]);
        assert_eq!(plan.mapping.get_physical(QubitId(7)), Some(2));
        assert_eq!(plan.mapping.get_physical(QubitId(8)), Some(1));
        assert_eq!(plan.mapping.get_physical(QubitId(9)), Some(0));
    }

    #[test]
    fn test_fresh_qubits_are_not_swapped() {
        let mut graph = GraphRouting::new(CouplingMap::star(4)).unwrap();
        let buffer = VecDeque::from([
            Command::allocate(QubitId(0)),
            Command::allocate(QubitId(1)),
            Command::allocate(QubitId(2)),
            cx(1, 2),
        ]);
        let plan = graph
            .plan(&FxHashSet::default(), &buffer, &Mapping::new())
            .unwrap();
        assert!(plan.swaps.is_empty());
        assert!(graph.is_adjacent(
            plan.mapping.get_physical(QubitId(1)).unwrap(),
            plan.mapping.get_physical(QubitId(2)).unwrap()
        ));
    }

    #[test]
    fn test_allocation_beyond_capacity_is_skipped() {
        let mut graph = path_graph(2);
        let buffer = VecDeque::from([
            Command::allocate(QubitId(0)),
            Command::allocate(QubitId(1)),
            Command::allocate(QubitId(2)),
        ]);
        let plan = graph
            .plan(&FxHashSet::default(), &buffer, &Mapping::new())
            .unwrap();
        assert_eq!(plan.mapping.len(), 2);
        assert!(!plan.mapping.contains(QubitId(2)));
    }

    #[test]
    fn test_wide_command_is_invariant_violation() {
        let mut graph = path_graph(4);
        let toffoli =
            Command::gate(StandardGate::X, &[QubitId(2)], &[QubitId(0), QubitId(1)]).unwrap();
        assert!(matches!(
            graph.plan(&FxHashSet::default(), &VecDeque::from([toffoli]), &Mapping::new()),
            Err(CompileError::InternalInvariant(_))
        ));
    }
}

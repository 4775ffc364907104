//! 2-D grid topology.
//!
//! Internally positions are numbered row-major. For a grid with 3 rows and
//! 2 columns:
//!
//! ```text
//! 0 - 1
//! |   |
//! 2 - 3
//! |   |
//! 4 - 5
//! ```
//!
//! Placement walks the grid as a snake (even rows left to right, odd rows
//! right to left) so consecutive positions are always coupled, and reuses
//! the chain heuristic. Swaps come from a three-phase sorting network:
//! columns, then rows, then columns again.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use petgraph::algo::maximum_matching;
use petgraph::graph::{NodeIndex, UnGraph};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rustc_hash::{FxHashMap, FxHashSet};

use qmap_ir::{Command, QubitId};

use crate::config::MapperConfig;
use crate::error::{CompileError, CompileResult};
use crate::mapping::Mapping;
use crate::stats::swap_depth;

use super::segment::place_on_chain;
use super::{GridMapper, MapperEngine, Plan, RoutingStrategy};

/// Cost of a candidate swap list; the mapper keeps the cheapest.
pub type SwapCost = Box<dyn Fn(&[(u32, u32)]) -> usize + Send + Sync>;

/// Seed for sampling matching orders, fixed so runs are reproducible.
const MATCHING_SEED: u64 = 11;

/// A `rows × columns` grid with nearest-neighbour coupling.
pub struct GridLattice {
    rows: usize,
    columns: usize,
    /// Row-major position → backend id.
    to_backend: Vec<u32>,
    from_backend: FxHashMap<u32, u32>,
    /// Row-major position → snake position.
    to_snake: Vec<u32>,
    /// Snake position → row-major position.
    from_snake: Vec<u32>,
    num_optimization_steps: usize,
    cost: SwapCost,
    rng: StdRng,
}

impl fmt::Debug for GridLattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridLattice")
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .field("num_optimization_steps", &self.num_optimization_steps)
            .finish_non_exhaustive()
    }
}

/// Where the qubit currently in a cell has to go.
#[derive(Debug, Clone, Copy)]
struct Cell {
    final_row: usize,
    final_column: usize,
    intermediate_row: Option<usize>,
}

impl GridLattice {
    /// Create a grid whose backend ids are the row-major positions.
    pub fn new(rows: usize, columns: usize) -> CompileResult<Self> {
        let capacity = checked_capacity(rows, columns)?;
        Self::build(rows, columns, (0..capacity as u32).collect())
    }

    /// Create a grid whose row-major position `p` is backend qubit
    /// `relabel[p]`.
    ///
    /// The relabeling must be a bijection over `0..rows * columns`.
    pub fn with_relabel(
        rows: usize,
        columns: usize,
        relabel: &BTreeMap<u32, u32>,
    ) -> CompileResult<Self> {
        let capacity = checked_capacity(rows, columns)?;
        let keys_complete = relabel.len() == capacity && relabel.keys().copied().eq(0..capacity as u32);
        let distinct: FxHashSet<u32> = relabel.values().copied().collect();
        if !keys_complete || distinct.len() != capacity {
            return Err(CompileError::Configuration(format!(
                "grid relabeling must be a bijection over 0..{capacity}"
            )));
        }
        Self::build(rows, columns, relabel.values().copied().collect())
    }

    fn build(rows: usize, columns: usize, to_backend: Vec<u32>) -> CompileResult<Self> {
        let capacity = rows * columns;
        let mut to_snake = vec![0; capacity];
        let mut from_snake = vec![0; capacity];
        for row in 0..rows {
            for column in 0..columns {
                let row_major = row * columns + column;
                let snake = if row % 2 == 0 {
                    row_major
                } else {
                    (row + 1) * columns - column - 1
                };
                to_snake[row_major] = snake as u32;
                from_snake[snake] = row_major as u32;
            }
        }
        let from_backend = to_backend
            .iter()
            .enumerate()
            .map(|(position, &backend)| (backend, position as u32))
            .collect();
        let defaults = MapperConfig::default();
        Ok(Self {
            rows,
            columns,
            to_backend,
            from_backend,
            to_snake,
            from_snake,
            num_optimization_steps: defaults.num_optimization_steps,
            cost: Box::new(swap_depth),
            rng: StdRng::seed_from_u64(MATCHING_SEED),
        })
    }

    /// Replace the swap cost function.
    #[must_use]
    pub fn with_cost(mut self, cost: impl Fn(&[(u32, u32)]) -> usize + Send + Sync + 'static) -> Self {
        self.cost = Box::new(cost);
        self
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Snake position of a row-major position.
    pub fn to_snake(&self, row_major: u32) -> Option<u32> {
        self.to_snake.get(row_major as usize).copied()
    }

    /// Row-major position of a snake position.
    pub fn from_snake(&self, snake: u32) -> Option<u32> {
        self.from_snake.get(snake as usize).copied()
    }

    /// Swaps, in backend ids, that move every qubit of `old` also present
    /// in `new` to its new place. Both mappings are in backend ids.
    pub fn swaps_between(&mut self, old: &Mapping, new: &Mapping) -> CompileResult<Vec<(u32, u32)>> {
        let old = self.internal(old)?;
        let new = self.internal(new)?;
        let swaps = self.swap_network(&old, &new)?;
        swaps
            .into_iter()
            .map(|(a, b)| Ok((self.to_backend(a)?, self.to_backend(b)?)))
            .collect()
    }

    fn internal(&self, mapping: &Mapping) -> CompileResult<Mapping> {
        mapping.relabeled(|backend| {
            self.from_backend(backend).ok_or_else(|| {
                CompileError::Configuration(format!("backend qubit {backend} is not on the grid"))
            })
        })
    }

    fn swap_network(&mut self, old: &Mapping, new: &Mapping) -> CompileResult<Vec<(u32, u32)>> {
        let cells = self.initial_cells(old, new)?;
        let matchings = self.column_matchings(&cells)?;

        let mut best: Option<(usize, Vec<(u32, u32)>)> = None;
        for permutation in self.matching_orders() {
            let swaps = self.sort_cells(cells.clone(), &matchings, &permutation)?;
            let cost = (self.cost)(&swaps);
            if best.as_ref().is_none_or(|(lowest, _)| cost < *lowest) {
                best = Some((cost, swaps));
            }
        }
        Ok(best.map(|(_, swaps)| swaps).unwrap_or_default())
    }

    /// One cell per row-major position. Qubits in both mappings get their
    /// new position; the remaining cells take the unused positions in
    /// ascending order.
    fn initial_cells(&self, old: &Mapping, new: &Mapping) -> CompileResult<Vec<Cell>> {
        let capacity = self.rows * self.columns;
        let mut targets: Vec<Option<u32>> = vec![None; capacity];
        let mut used = vec![false; capacity];
        for (logical, from) in old.iter() {
            let Some(to) = new.get_physical(logical) else {
                continue;
            };
            match (targets.get_mut(from as usize), used.get_mut(to as usize)) {
                (Some(slot), Some(taken)) => {
                    *slot = Some(to);
                    *taken = true;
                }
                _ => {
                    return Err(CompileError::InternalInvariant(format!(
                        "qubit {logical} moves {from} -> {to} outside the grid"
                    )));
                }
            }
        }

        let mut unused = (0..capacity as u32).filter(|&p| !used[p as usize]);
        let cells = targets
            .into_iter()
            .map(|target| {
                target.or_else(|| unused.next()).map(|to| Cell {
                    final_row: to as usize / self.columns,
                    final_column: to as usize % self.columns,
                    intermediate_row: None,
                })
            })
            .collect::<Option<Vec<_>>>();
        match (cells, unused.next()) {
            (Some(cells), None) => Ok(cells),
            _ => Err(CompileError::InternalInvariant(
                "grid target positions do not form a permutation".into(),
            )),
        }
    }

    /// `rows` successive perfect matchings between current and destination
    /// columns. Entry `[i][c]` is the destination column the `i`-th
    /// matching pairs with current column `c`.
    fn column_matchings(&self, cells: &[Cell]) -> CompileResult<Vec<Vec<usize>>> {
        let columns = self.columns;
        let mut multiplicity = vec![vec![0_usize; columns]; columns];
        for (position, cell) in cells.iter().enumerate() {
            multiplicity[position % columns][cell.final_column] += 1;
        }

        let mut matchings = Vec::with_capacity(self.rows);
        for _ in 0..self.rows {
            let mut graph = UnGraph::<(), ()>::with_capacity(2 * columns, columns * columns);
            let nodes: Vec<NodeIndex> = (0..2 * columns).map(|_| graph.add_node(())).collect();
            for (column, counts) in multiplicity.iter().enumerate() {
                for (destination, &count) in counts.iter().enumerate() {
                    if count > 0 {
                        graph.add_edge(nodes[column], nodes[columns + destination], ());
                    }
                }
            }

            let matching = maximum_matching(&graph);
            let mut round = Vec::with_capacity(columns);
            for column in 0..columns {
                let destination = matching
                    .mate(nodes[column])
                    .map(NodeIndex::index)
                    .and_then(|mate| mate.checked_sub(columns))
                    .ok_or_else(|| {
                        CompileError::InternalInvariant(format!(
                            "no perfect column matching for column {column}"
                        ))
                    })?;
                multiplicity[column][destination] -= 1;
                round.push(destination);
            }
            matchings.push(round);
        }
        Ok(matchings)
    }

    /// Orders in which the matchings are assigned to intermediate rows:
    /// every permutation when the budget allows, else a seeded sample.
    fn matching_orders(&mut self) -> Vec<Vec<usize>> {
        let identity: Vec<usize> = (0..self.rows).collect();
        match factorial(self.rows) {
            Some(total) if total <= self.num_optimization_steps => all_permutations(identity),
            _ => (0..self.num_optimization_steps)
                .map(|_| {
                    let mut order = identity.clone();
                    order.shuffle(&mut self.rng);
                    order
                })
                .collect(),
        }
    }

    fn sort_cells(
        &self,
        mut cells: Vec<Cell>,
        matchings: &[Vec<usize>],
        permutation: &[usize],
    ) -> CompileResult<Vec<(u32, u32)>> {
        let (rows, columns) = (self.rows, self.columns);
        for column in 0..columns {
            for (intermediate_row, &choice) in permutation.iter().enumerate() {
                let destination = matchings[choice][column];
                let chosen = (0..rows)
                    .map(|row| row * columns + column)
                    .filter(|&i| {
                        cells[i].intermediate_row.is_none() && cells[i].final_column == destination
                    })
                    .min_by_key(|&i| cells[i].final_row)
                    .ok_or_else(|| {
                        CompileError::InternalInvariant(format!(
                            "column {column} has no qubit left for destination column {destination}"
                        ))
                    })?;
                cells[chosen].intermediate_row = Some(intermediate_row);
            }
        }

        let column_lines: Vec<Vec<usize>> = (0..columns)
            .map(|column| (0..rows).map(|row| row * columns + column).collect())
            .collect();
        let row_lines: Vec<Vec<usize>> = (0..rows)
            .map(|row| (0..columns).map(|column| row * columns + column).collect())
            .collect();

        let mut swaps = Vec::new();
        for line in &column_lines {
            sort_line(&mut cells, line, &mut swaps, |c| c.intermediate_row.unwrap_or(usize::MAX));
        }
        for line in &row_lines {
            sort_line(&mut cells, line, &mut swaps, |c| c.final_column);
        }
        for line in &column_lines {
            sort_line(&mut cells, line, &mut swaps, |c| c.final_row);
        }
        Ok(swaps)
    }
}

/// Odd-even transposition sort of the cells at `line`, recording each
/// exchange as a swap of row-major positions.
fn sort_line(cells: &mut [Cell], line: &[usize], swaps: &mut Vec<(u32, u32)>, key: impl Fn(&Cell) -> usize) {
    let n = line.len();
    let mut sorted = false;
    while !sorted {
        sorted = true;
        for start in [1, 0] {
            for i in (start..n.saturating_sub(1)).step_by(2) {
                let (a, b) = (line[i], line[i + 1]);
                if key(&cells[a]) > key(&cells[b]) {
                    cells.swap(a, b);
                    swaps.push((a as u32, b as u32));
                    sorted = false;
                }
            }
        }
    }
}

fn checked_capacity(rows: usize, columns: usize) -> CompileResult<usize> {
    rows.checked_mul(columns)
        .filter(|&capacity| capacity > 0 && u32::try_from(capacity).is_ok())
        .ok_or_else(|| {
            CompileError::Configuration(format!("invalid grid dimensions {rows}x{columns}"))
        })
}

fn factorial(n: usize) -> Option<usize> {
    (1..=n).try_fold(1_usize, |acc, k| acc.checked_mul(k))
}

fn all_permutations(mut current: Vec<usize>) -> Vec<Vec<usize>> {
    let mut all = vec![current.clone()];
    while next_permutation(&mut current) {
        all.push(current.clone());
    }
    all
}

/// Advance to the next lexicographic permutation; false after the last.
fn next_permutation(items: &mut [usize]) -> bool {
    let Some(pivot) = (1..items.len()).rev().find(|&i| items[i - 1] < items[i]) else {
        return false;
    };
    let Some(successor) = (pivot..items.len()).rev().find(|&j| items[j] > items[pivot - 1]) else {
        return false;
    };
    items.swap(pivot - 1, successor);
    items[pivot..].reverse();
    true
}

impl RoutingStrategy for GridLattice {
    fn name(&self) -> &'static str {
        "GridMapper"
    }

    fn capacity(&self) -> usize {
        self.rows * self.columns
    }

    fn is_adjacent(&self, p0: u32, p1: u32) -> bool {
        let (low, high) = (p0.min(p1) as usize, p0.max(p1) as usize);
        let capacity = self.rows * self.columns;
        high < capacity
            && (high - low == self.columns || (high - low == 1 && high % self.columns != 0))
    }

    fn plan(
        &mut self,
        allocated: &FxHashSet<QubitId>,
        buffer: &VecDeque<Command>,
        current: &Mapping,
    ) -> CompileResult<Plan> {
        let lookup = |table: &[u32], p: u32| {
            table.get(p as usize).copied().ok_or_else(|| {
                CompileError::InternalInvariant(format!("position {p} is outside the grid"))
            })
        };
        let snake_current = current.relabeled(|p| lookup(&self.to_snake, p))?;
        let snake_new = place_on_chain(self.capacity(), false, allocated, buffer, &snake_current)?;
        let mapping = snake_new.relabeled(|s| lookup(&self.from_snake, s))?;
        let swaps = self.swap_network(current, &mapping)?;
        Ok(Plan { mapping, swaps })
    }

    fn configure(&mut self, config: &MapperConfig) {
        self.num_optimization_steps = config.num_optimization_steps;
    }

    fn to_backend(&self, physical: u32) -> CompileResult<u32> {
        self.to_backend.get(physical as usize).copied().ok_or_else(|| {
            CompileError::InternalInvariant(format!("position {physical} is outside the grid"))
        })
    }

    fn from_backend(&self, backend: u32) -> Option<u32> {
        self.from_backend.get(&backend).copied()
    }
}

impl GridMapper {
    /// Mapper for a `rows × columns` grid with row-major backend ids.
    pub fn grid(rows: usize, columns: usize) -> CompileResult<Self> {
        Ok(MapperEngine::new(GridLattice::new(rows, columns)?))
    }

    /// Mapper for a grid whose backend numbers qubits differently; see
    /// [`GridLattice::with_relabel`].
    pub fn grid_with_relabel(
        rows: usize,
        columns: usize,
        relabel: &BTreeMap<u32, u32>,
    ) -> CompileResult<Self> {
        Ok(MapperEngine::new(GridLattice::with_relabel(rows, columns, relabel)?))
    }

    /// Replace the swap cost function.
    #[must_use]
    pub fn with_swap_cost(mut self, cost: impl Fn(&[(u32, u32)]) -> usize + Send + Sync + 'static) -> Self {
        self.strategy.cost = Box::new(cost);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mapping(pairs: &[(u32, u32)]) -> Mapping {
        Mapping::from_pairs(pairs.iter().map(|&(l, p)| (QubitId(l), p))).unwrap()
    }

    /// Apply swaps to a position → logical table.
    fn apply(initial: &[u32], swaps: &[(u32, u32)]) -> Vec<u32> {
        let mut slots = initial.to_vec();
        for &(a, b) in swaps {
            slots.swap(a as usize, b as usize);
        }
        slots
    }

    #[test]
    fn test_snake_order() {
        let grid = GridLattice::new(3, 2).unwrap();
        let snake: Vec<u32> = (0..6).map(|p| grid.to_snake(p).unwrap()).collect();
        assert_eq!(snake, vec![0, 1, 3, 2, 4, 5]);
        assert_eq!(grid.from_snake(3), Some(2));
    }

    #[test]
    fn test_grid_adjacency() {
        let grid = GridLattice::new(2, 3).unwrap();
        assert!(grid.is_adjacent(0, 1));
        assert!(grid.is_adjacent(4, 1));
        assert!(!grid.is_adjacent(2, 3));
        assert!(!grid.is_adjacent(0, 4));

        let column = GridLattice::new(3, 1).unwrap();
        assert!(column.is_adjacent(0, 1));
        assert!(column.is_adjacent(2, 1));
    }

    #[test]
    fn test_relabel_must_be_bijection() {
        let missing: BTreeMap<u32, u32> = [(0, 0), (1, 1), (2, 2)].into_iter().collect();
        assert!(GridLattice::with_relabel(2, 2, &missing).is_err());
        let clash: BTreeMap<u32, u32> = [(0, 0), (1, 1), (2, 2), (3, 2)].into_iter().collect();
        assert!(GridLattice::with_relabel(2, 2, &clash).is_err());
        assert!(GridLattice::new(0, 3).is_err());
    }

    #[test]
    fn test_backend_translation_is_checked() {
        let relabel: BTreeMap<u32, u32> = [(0, 0), (1, 1), (2, 3), (3, 2)].into_iter().collect();
        let grid = GridLattice::with_relabel(2, 2, &relabel).unwrap();
        assert_eq!(grid.to_backend(2).unwrap(), 3);
        assert!(matches!(
            grid.to_backend(4),
            Err(CompileError::InternalInvariant(_))
        ));
        assert_eq!(grid.from_backend(3), Some(2));
        assert_eq!(grid.from_backend(4), None);
    }

    #[test]
    fn test_reversal_on_relabelled_square() {
        // Row-major 0 1 / 2 3 numbered 0 1 / 3 2 by the backend: the
        // coupling graph is the 4-cycle 0-1-2-3-0.
        let relabel: BTreeMap<u32, u32> = [(0, 0), (1, 1), (2, 3), (3, 2)].into_iter().collect();
        let mut grid = GridLattice::with_relabel(2, 2, &relabel).unwrap();
        let old = mapping(&[(0, 0), (1, 1), (2, 2), (3, 3)]);
        let new = mapping(&[(0, 3), (1, 2), (2, 1), (3, 0)]);

        let swaps = grid.swaps_between(&old, &new).unwrap();
        let cycle = [(0, 1), (1, 2), (2, 3), (3, 0)];
        for &(a, b) in &swaps {
            assert!(cycle.contains(&(a, b)) || cycle.contains(&(b, a)), "({a}, {b})");
        }
        assert_eq!(apply(&[0, 1, 2, 3], &swaps), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_reversal_on_row_major_square() {
        let mut grid = GridLattice::new(2, 2).unwrap();
        let old = mapping(&[(0, 0), (1, 1), (2, 2), (3, 3)]);
        let new = mapping(&[(0, 3), (1, 2), (2, 1), (3, 0)]);
        let swaps = grid.swaps_between(&old, &new).unwrap();
        for &(a, b) in &swaps {
            assert!(grid.is_adjacent(a, b));
        }
        assert_eq!(apply(&[0, 1, 2, 3], &swaps), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_cost_function_is_consulted() {
        let mut grid = GridLattice::new(3, 3)
            .unwrap()
            .with_cost(|swaps: &[(u32, u32)]| swaps.len());
        let old = mapping(&[(0, 0), (1, 4), (2, 8)]);
        let new = mapping(&[(0, 8), (1, 4), (2, 0)]);
        let swaps = grid.swaps_between(&old, &new).unwrap();
        let slots = apply(&(0..9).collect::<Vec<_>>(), &swaps);
        assert_eq!(slots[8], 0);
        assert_eq!(slots[4], 4);
        assert_eq!(slots[0], 8);
    }

    #[test]
    fn test_permutation_enumeration() {
        assert_eq!(factorial(4), Some(24));
        assert_eq!(factorial(0), Some(1));
        assert_eq!(all_permutations(vec![0, 1, 2]).len(), 6);

        let mut small = GridLattice::new(3, 2).unwrap();
        assert_eq!(small.matching_orders().len(), 6);
        let mut large = GridLattice::new(5, 2).unwrap();
        large.configure(&MapperConfig::default().with_num_optimization_steps(7));
        assert_eq!(large.matching_orders().len(), 7);
    }

    fn grid_case() -> impl Strategy<Value = (usize, usize, Vec<u32>, Vec<u32>)> {
        (1_usize..5, 1_usize..5).prop_flat_map(|(rows, columns)| {
            let ids: Vec<u32> = (0..(rows * columns) as u32).collect();
            (
                Just(rows),
                Just(columns),
                Just(ids.clone()).prop_shuffle(),
                Just(ids).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_snake_is_bijective(rows in 1_usize..9, columns in 1_usize..9) {
            let grid = GridLattice::new(rows, columns).unwrap();
            let capacity = (rows * columns) as u32;
            for p in 0..capacity {
                let snake = grid.to_snake(p).unwrap();
                prop_assert!(snake < capacity);
                prop_assert_eq!(grid.from_snake(snake), Some(p));
            }
            for s in 1..capacity {
                let a = grid.from_snake(s - 1).unwrap();
                let b = grid.from_snake(s).unwrap();
                prop_assert!(grid.is_adjacent(a, b));
            }
        }

        #[test]
        fn prop_grid_swaps_reach_target((rows, columns, old, new) in grid_case()) {
            let mut grid = GridLattice::new(rows, columns).unwrap();
            let old_map = mapping(&old.iter().enumerate().map(|(l, &p)| (l as u32, p)).collect::<Vec<_>>());
            let new_map = mapping(&new.iter().enumerate().map(|(l, &p)| (l as u32, p)).collect::<Vec<_>>());
            let swaps = grid.swaps_between(&old_map, &new_map).unwrap();

            let mut applied = old_map.clone();
            for &(a, b) in &swaps {
                prop_assert!(grid.is_adjacent(a, b));
                applied.swap(a, b);
            }
            prop_assert_eq!(applied, new_map.clone());
            prop_assert!(grid.swaps_between(&new_map, &new_map).unwrap().is_empty());
        }
    }
}

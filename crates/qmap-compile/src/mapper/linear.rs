//! Linear chain and ring topologies.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use qmap_ir::{Command, QubitId};

use crate::error::{CompileError, CompileResult};
use crate::mapping::Mapping;

use super::segment::place_on_chain;
use super::{LinearMapper, MapperEngine, Plan, RoutingStrategy};

/// Qubits `0..num_qubits` coupled as a chain; a cyclic chain also couples
/// the two ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearChain {
    num_qubits: usize,
    cyclic: bool,
}

impl LinearChain {
    /// Create a chain of `num_qubits` qubits.
    pub fn new(num_qubits: usize, cyclic: bool) -> CompileResult<Self> {
        if num_qubits == 0 || u32::try_from(num_qubits).is_err() {
            return Err(CompileError::Configuration(format!(
                "a chain needs between 1 and {} qubits, got {num_qubits}",
                u32::MAX
            )));
        }
        Ok(Self { num_qubits, cyclic })
    }

    /// Whether the ends are coupled.
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }
}

impl RoutingStrategy for LinearChain {
    fn name(&self) -> &'static str {
        "LinearMapper"
    }

    fn capacity(&self) -> usize {
        self.num_qubits
    }

    fn is_adjacent(&self, p0: u32, p1: u32) -> bool {
        let diff = p0.abs_diff(p1) as usize;
        diff == 1 || (self.cyclic && self.num_qubits > 2 && diff == self.num_qubits - 1)
    }

    fn plan(
        &mut self,
        allocated: &FxHashSet<QubitId>,
        buffer: &VecDeque<Command>,
        current: &Mapping,
    ) -> CompileResult<Plan> {
        let mapping = place_on_chain(self.num_qubits, self.cyclic, allocated, buffer, current)?;
        let swaps = odd_even_transposition_swaps(current, &mapping, self.num_qubits)?;
        Ok(Plan { mapping, swaps })
    }
}

impl LinearMapper {
    /// Mapper for a chain (or ring, if `cyclic`) of `num_qubits` qubits.
    pub fn linear(num_qubits: usize, cyclic: bool) -> CompileResult<Self> {
        Ok(MapperEngine::new(LinearChain::new(num_qubits, cyclic)?))
    }
}

/// Nearest-neighbour swaps moving every qubit of `old` that is also in
/// `new` to its new position.
///
/// Positions not prescribed by a common qubit receive the unused target
/// positions in ascending order, which makes the permutation total; an
/// odd-even transposition sort then realizes it. Each returned pair is
/// `(i, i + 1)`.
pub fn odd_even_transposition_swaps(
    old: &Mapping,
    new: &Mapping,
    capacity: usize,
) -> CompileResult<Vec<(u32, u32)>> {
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
                    "qubit {logical} moves {from} -> {to} outside a chain of {capacity}"
                )));
            }
        }
    }

    let mut unused = (0..capacity as u32).filter(|&p| !used[p as usize]);
    let mut positions = Vec::with_capacity(capacity);
    for target in targets {
        match target.or_else(|| unused.next()) {
            Some(p) => positions.push(p),
            None => {
                return Err(CompileError::InternalInvariant(
                    "ran out of target positions while completing the permutation".into(),
                ));
            }
        }
    }
    if unused.next().is_some() {
        return Err(CompileError::InternalInvariant(
            "unassigned target positions left after completing the permutation".into(),
        ));
    }

    let mut swaps = Vec::new();
    let n = positions.len();
    let mut sorted = false;
    while !sorted {
        sorted = true;
        for start in [1, 0] {
            for i in (start..n.saturating_sub(1)).step_by(2) {
                if positions[i] > positions[i + 1] {
                    positions.swap(i, i + 1);
                    swaps.push((i as u32, i as u32 + 1));
                    sorted = false;
                }
            }
        }
    }
    Ok(swaps)
}

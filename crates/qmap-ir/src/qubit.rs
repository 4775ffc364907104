//! Qubit identifiers and the qubit arena owned by the pipeline root.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IrError, IrResult};

/// Unique identifier for a qubit within a compilation session.
///
/// Upstream of a mapper the id names a logical qubit; downstream of it the
/// same type carries physical (or backend) ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QubitId(pub u32);

impl fmt::Display for QubitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl From<u32> for QubitId {
    fn from(id: u32) -> Self {
        QubitId(id)
    }
}

/// Lifecycle state of an issued qubit.
///
/// Qubits that were never issued are not represented: an id beyond the
/// arena's length is unallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QubitState {
    /// Allocated and usable.
    Allocated,
    /// Allocated and measured at least once; still usable.
    Measured,
    /// Deallocated. The id is poisoned and never reissued.
    Deallocated,
}

impl QubitState {
    /// Whether commands may still reference a qubit in this state.
    #[inline]
    pub fn is_live(self) -> bool {
        !matches!(self, QubitState::Deallocated)
    }
}

/// Arena of qubit states indexed by [`QubitId`].
///
/// Ids are issued in strictly increasing order starting at zero, so the
/// arena is a dense vector.
#[derive(Debug, Clone, Default)]
pub struct QubitArena {
    states: Vec<QubitState>,
}

impl QubitArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id in the [`QubitState::Allocated`] state.
    ///
    /// Fails once every `u32` id has been issued.
    pub fn allocate(&mut self) -> IrResult<QubitId> {
        let id = id_for_index(self.states.len())?;
        self.states.push(QubitState::Allocated);
        Ok(id)
    }

    /// Get the state of a qubit, `None` if the id was never issued.
    pub fn state(&self, qubit: QubitId) -> Option<QubitState> {
        self.states.get(qubit.0 as usize).copied()
    }

    /// Check that a qubit is live.
    pub fn check_live(&self, qubit: QubitId) -> IrResult<()> {
        match self.state(qubit) {
            Some(state) if state.is_live() => Ok(()),
            Some(_) => Err(IrError::QubitDeallocated(qubit)),
            None => Err(IrError::QubitNotFound(qubit)),
        }
    }

    /// Record that a live qubit has been measured.
    pub fn mark_measured(&mut self, qubit: QubitId) -> IrResult<()> {
        self.check_live(qubit)?;
        self.states[qubit.0 as usize] = QubitState::Measured;
        Ok(())
    }

    /// Poison a live qubit.
    ///
    /// Deallocating twice is an error rather than a no-op: it almost always
    /// means the caller lost track of ownership.
    pub fn deallocate(&mut self, qubit: QubitId) -> IrResult<()> {
        self.check_live(qubit)?;
        self.states[qubit.0 as usize] = QubitState::Deallocated;
        Ok(())
    }

    /// Iterate over the ids of all live qubits in ascending order.
    pub fn live(&self) -> impl Iterator<Item = QubitId> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_live())
            .map(|(idx, _)| QubitId(idx as u32))
    }

    /// Number of live qubits.
    pub fn num_live(&self) -> usize {
        self.states.iter().filter(|state| state.is_live()).count()
    }

    /// Number of ids issued so far.
    pub fn num_issued(&self) -> usize {
        self.states.len()
    }
}

fn id_for_index(index: usize) -> IrResult<QubitId> {
    u32::try_from(index)
        .map(QubitId)
        .map_err(|_| IrError::QubitIdsExhausted)
}

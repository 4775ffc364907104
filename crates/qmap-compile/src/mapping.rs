//! Logical-to-physical qubit mappings.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use qmap_ir::QubitId;

use crate::error::{CompileError, CompileResult};

/// A partial bijection from logical qubits to physical qubits.
///
/// Both directions are stored so lookups are O(1) either way. Every
/// mutation goes through methods that keep the two maps consistent; no two
/// logical qubits ever share a physical qubit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    logical_to_physical: FxHashMap<QubitId, u32>,
    physical_to_logical: FxHashMap<u32, QubitId>,
}

impl Mapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping from `(logical, physical)` pairs.
    ///
    /// Fails if a logical or physical id appears twice.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (QubitId, u32)>) -> CompileResult<Self> {
        let mut mapping = Self::new();
        for (logical, physical) in pairs {
            mapping.insert(logical, physical)?;
        }
        Ok(mapping)
    }

    /// Map a logical qubit that is not yet mapped onto a free physical qubit.
    pub fn insert(&mut self, logical: QubitId, physical: u32) -> CompileResult<()> {
        if let Some(&existing) = self.logical_to_physical.get(&logical) {
            return Err(CompileError::Configuration(format!(
                "logical qubit {logical} is already mapped to {existing}"
            )));
        }
        if let Some(&occupant) = self.physical_to_logical.get(&physical) {
            return Err(CompileError::Configuration(format!(
                "physical qubit {physical} is already occupied by {occupant}"
            )));
        }
        self.logical_to_physical.insert(logical, physical);
        self.physical_to_logical.insert(physical, logical);
        Ok(())
    }

    /// Remove a logical qubit, returning the physical qubit it occupied.
    pub fn remove(&mut self, logical: QubitId) -> Option<u32> {
        let physical = self.logical_to_physical.remove(&logical)?;
        self.physical_to_logical.remove(&physical);
        Some(physical)
    }

    /// Get the physical qubit for a logical qubit.
    #[inline]
    pub fn get_physical(&self, logical: QubitId) -> Option<u32> {
        self.logical_to_physical.get(&logical).copied()
    }

    /// Get the logical qubit for a physical qubit.
    #[inline]
    pub fn get_logical(&self, physical: u32) -> Option<QubitId> {
        self.physical_to_logical.get(&physical).copied()
    }

    /// Whether a logical qubit is mapped.
    #[inline]
    pub fn contains(&self, logical: QubitId) -> bool {
        self.logical_to_physical.contains_key(&logical)
    }

    /// Exchange the contents of two physical qubits; either may be empty.
    pub fn swap(&mut self, p1: u32, p2: u32) {
        let l1 = self.physical_to_logical.remove(&p1);
        let l2 = self.physical_to_logical.remove(&p2);

        if let Some(l1) = l1 {
            self.logical_to_physical.insert(l1, p2);
            self.physical_to_logical.insert(p2, l1);
        }
        if let Some(l2) = l2 {
            self.logical_to_physical.insert(l2, p1);
            self.physical_to_logical.insert(p1, l2);
        }
    }

    /// Get the number of mapped qubits.
    pub fn len(&self) -> usize {
        self.logical_to_physical.len()
    }

    /// Check if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.logical_to_physical.is_empty()
    }

    /// Iterate over `(logical, physical)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (QubitId, u32)> + '_ {
        self.logical_to_physical.iter().map(|(&l, &p)| (l, p))
    }

    /// `(logical, physical)` pairs sorted by logical id.
    pub fn sorted_pairs(&self) -> Vec<(QubitId, u32)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable();
        pairs
    }

    /// Rename every physical id through `f`, which must be injective.
    pub fn relabeled(&self, mut f: impl FnMut(u32) -> CompileResult<u32>) -> CompileResult<Self> {
        let mut mapping = Self::new();
        for (logical, physical) in self.sorted_pairs() {
            mapping.insert(logical, f(physical)?)?;
        }
        Ok(mapping)
    }

    /// Check that every physical id lies in `0..capacity`.
    pub fn check_capacity(&self, capacity: usize) -> CompileResult<()> {
        match self.physical_to_logical.keys().find(|&&p| p as usize >= capacity) {
            Some(p) => Err(CompileError::Configuration(format!(
                "physical qubit {p} is outside 0..{capacity}"
            ))),
            None => Ok(()),
        }
    }

    /// Position-indexed view: slot `p` holds the logical qubit at `p`.
    pub fn to_chain(&self, capacity: usize) -> Vec<Option<QubitId>> {
        let mut chain = vec![None; capacity];
        for (logical, physical) in self.iter() {
            if let Some(slot) = chain.get_mut(physical as usize) {
                *slot = Some(logical);
            }
        }
        chain
    }
}

//! Chain placement: group interacting qubits into segments, then lay the
//! segments out along the chain close to where their qubits already are.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use qmap_ir::{Command, GateKind, QubitId};

use crate::error::{CompileError, CompileResult};
use crate::mapping::Mapping;

/// State of one lookahead scan over the buffered commands.
///
/// A segment is an ordered run of logical qubits that must end up next to
/// each other on the chain. Qubits stay *active* while gates on them can
/// still be honoured this round; once a qubit drops out, later gates on it
/// are left for a future remap.
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    capacity: usize,
    cyclic: bool,
    allocated: FxHashSet<QubitId>,
    active: FxHashSet<QubitId>,
    segments: Vec<Vec<QubitId>>,
    neighbours: FxHashMap<QubitId, FxHashSet<QubitId>>,
}

impl SegmentBuilder {
    /// Start a scan. `allocated` are the qubits already placed on the device.
    pub fn new(capacity: usize, cyclic: bool, allocated: &FxHashSet<QubitId>) -> Self {
        Self {
            capacity,
            cyclic,
            allocated: allocated.clone(),
            active: allocated.clone(),
            segments: Vec::new(),
            neighbours: allocated.iter().map(|&q| (q, FxHashSet::default())).collect(),
        }
    }

    /// Segments built so far, in creation order.
    pub fn segments(&self) -> &[Vec<QubitId>] {
        &self.segments
    }

    /// Qubits claiming a chain position this round.
    pub fn allocated(&self) -> &FxHashSet<QubitId> {
        &self.allocated
    }

    /// Whether gates on `qubit` can still be honoured this round.
    pub fn is_active(&self, qubit: QubitId) -> bool {
        self.active.contains(&qubit)
    }

    /// Whether the two qubits are already chained next to each other.
    pub fn are_neighbours(&self, q0: QubitId, q1: QubitId) -> bool {
        self.neighbours.get(&q0).is_some_and(|n| n.contains(&q1))
    }

    fn degree(&self, qubit: QubitId) -> usize {
        self.neighbours.get(&qubit).map_or(0, FxHashSet::len)
    }

    /// Feed buffered commands in program order.
    ///
    /// Stops early once every position is claimed and no qubit is active.
    pub fn scan<'a>(&mut self, commands: impl IntoIterator<Item = &'a Command>) -> CompileResult<()> {
        for cmd in commands {
            if self.allocated.len() == self.capacity && self.active.is_empty() {
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
                    if self.allocated.len() < self.capacity {
                        self.allocated.insert(qubit);
                        self.active.insert(qubit);
                        self.neighbours.entry(qubit).or_default();
                    }
                }
                // The position stays claimed until the next remap.
                (GateKind::Deallocate, &[qubit]) => {
                    self.active.remove(&qubit);
                }
                (_, &[q0, q1]) => self.process_two_qubit_gate(q0, q1),
                _ => {}
            }
        }
        Ok(())
    }

    /// Try to make `q0` and `q1` chain neighbours.
    pub fn process_two_qubit_gate(&mut self, q0: QubitId, q1: QubitId) {
        if self.are_neighbours(q0, q1) {
            return;
        }
        if !self.active.contains(&q0)
            || !self.active.contains(&q1)
            || self.degree(q0) > 1
            || self.degree(q1) > 1
        {
            self.deactivate(q0, q1);
            return;
        }

        let end0 = self.find_end(q0);
        let end1 = self.find_end(q1);
        let touched = match (end0, end1) {
            (None, None) => {
                self.segments.push(vec![q0, q1]);
                self.segments.len() - 1
            }
            (Some((i0, _)), Some((i1, _))) if i0 == i1 => {
                // Joining the two ends would close the segment on itself.
                self.deactivate(q0, q1);
                return;
            }
            (None, Some((index, left))) => {
                attach(&mut self.segments[index], q0, left);
                index
            }
            (Some((index, left)), None) => {
                attach(&mut self.segments[index], q1, left);
                index
            }
            (Some((i0, left0)), Some((i1, left1))) => self.splice(i0, left0, i1, left1),
        };

        self.link(q0, q1);
        if self.cyclic {
            let segment = &self.segments[touched];
            if segment.len() == self.capacity {
                if let (Some(&first), Some(&last)) = (segment.first(), segment.last()) {
                    self.link(first, last);
                }
            }
        }
    }

    fn deactivate(&mut self, q0: QubitId, q1: QubitId) {
        self.active.remove(&q0);
        self.active.remove(&q1);
    }

    fn link(&mut self, q0: QubitId, q1: QubitId) {
        self.neighbours.entry(q0).or_default().insert(q1);
        self.neighbours.entry(q1).or_default().insert(q0);
    }

    /// Segment index and whether `qubit` is its left end.
    fn find_end(&self, qubit: QubitId) -> Option<(usize, bool)> {
        self.segments.iter().enumerate().find_map(|(index, segment)| {
            if segment.first() == Some(&qubit) {
                Some((index, true))
            } else if segment.last() == Some(&qubit) {
                Some((index, false))
            } else {
                None
            }
        })
    }

    /// Join the segments ending in the two qubits; returns the index of the
    /// joined segment.
    fn splice(&mut self, i0: usize, left0: bool, i1: usize, left1: bool) -> usize {
        let (keep, take) = match (left0, left1) {
            // ..., q0] + [q1, ...
            (false, true) => (i0, i1),
            // [q0, ... + ..., q1] reads as seg1 + seg0.
            (true, false) => (i1, i0),
            // ..., q0] + reversed(..., q1]
            (false, false) => {
                self.segments[i1].reverse();
                (i0, i1)
            }
            // reversed([q0, ...) + [q1, ...
            (true, true) => {
                self.segments[i0].reverse();
                (i0, i1)
            }
        };
        let tail = std::mem::take(&mut self.segments[take]);
        self.segments[keep].extend(tail);
        self.segments.remove(take);
        if take < keep { keep - 1 } else { keep }
    }

    /// Lay the segments out on the chain.
    ///
    /// Qubits outside every segment are placed as singletons after the
    /// segments, in ascending id order. Each step places the candidate whose
    /// window overlaps most with `previous`, where an empty previous slot
    /// counts as overlap; among perfect overlaps the smallest padding wins
    /// and remaining ties keep the earliest candidate.
    pub fn place(self, previous: &Mapping) -> CompileResult<Mapping> {
        let mut remaining = self.segments;
        let mut singletons: Vec<QubitId> = self
            .allocated
            .iter()
            .copied()
            .filter(|q| !remaining.iter().any(|segment| segment.contains(q)))
            .collect();
        singletons.sort_unstable();
        remaining.extend(singletons.into_iter().map(|q| vec![q]));

        let capacity = self.capacity;
        let mut num_unused = capacity.checked_sub(self.allocated.len()).ok_or_else(|| {
            CompileError::InternalInvariant(format!(
                "{} qubits claimed on a chain of {capacity}",
                self.allocated.len()
            ))
        })?;
        let previous_chain = previous.to_chain(capacity);
        let mut chain: Vec<Option<QubitId>> = vec![None; capacity];
        let mut cursor = 0;

        while !remaining.is_empty() {
            let mut best: Option<(usize, usize, f64)> = None;
            for (index, segment) in remaining.iter().enumerate() {
                for padding in 0..=num_unused {
                    let start = cursor + padding;
                    let Some(window) = previous_chain.get(start..start + segment.len()) else {
                        break;
                    };
                    let overlap = window
                        .iter()
                        .filter(|slot| slot.is_none_or(|id| segment.contains(&id)))
                        .count();
                    let fraction = overlap as f64 / segment.len() as f64;
                    let better = match best {
                        None => true,
                        Some((_, best_padding, best_fraction)) => {
                            (fraction >= 1.0 && padding < best_padding) || fraction > best_fraction
                        }
                    };
                    if better {
                        best = Some((index, padding, fraction));
                    }
                }
            }

            let (index, padding, _) = best.ok_or_else(|| {
                CompileError::InternalInvariant("no room left on the chain for a segment".into())
            })?;
            let segment = remaining.remove(index);
            let start = cursor + padding;
            let slots = chain.get_mut(start..start + segment.len()).ok_or_else(|| {
                CompileError::InternalInvariant("segment placed past the end of the chain".into())
            })?;
            for (slot, qubit) in slots.iter_mut().zip(segment.iter()) {
                *slot = Some(*qubit);
            }
            cursor = start + segment.len();
            num_unused -= padding;
        }

        let mut mapping = Mapping::new();
        for (position, qubit) in chain.into_iter().enumerate() {
            if let Some(qubit) = qubit {
                mapping.insert(qubit, position as u32)?;
            }
        }
        Ok(mapping)
    }
}

/// Put `qubit` at the end of `segment` marked by `left`.
fn attach(segment: &mut Vec<QubitId>, qubit: QubitId, left: bool) {
    if left {
        segment.insert(0, qubit);
    } else {
        segment.push(qubit);
    }
}

/// Compute a chain placement for the buffered commands.
pub fn place_on_chain(
    capacity: usize,
    cyclic: bool,
    allocated: &FxHashSet<QubitId>,
    buffer: &VecDeque<Command>,
    current: &Mapping,
) -> CompileResult<Mapping> {
    let mut builder = SegmentBuilder::new(capacity, cyclic, allocated);
    builder.scan(buffer)?;
    builder.place(current)
}

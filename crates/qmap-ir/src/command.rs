//! Commands: a gate applied to target qubit groups under optional controls.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IrError, IrResult};
use crate::gate::GateKind;
use crate::qubit::QubitId;

/// Metadata attached to a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// The logical id of the (single) qubit a mapped command acts on.
    ///
    /// Added by mappers to realized Allocate, Deallocate and Measure
    /// commands so a backend can report results by logical id.
    LogicalQubitId(QubitId),
    /// The qubit may start in an arbitrary state.
    Dirty,
    /// Free-form tag for stages outside this crate.
    Custom(String),
}

/// A gate application.
///
/// Controls are kept sorted by id together with their control-state bits,
/// and target groups of gates with interchangeable targets are sorted by
/// their first qubit, so two commands describing the same operation compare
/// equal regardless of argument order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// The gate discriminant.
    pub gate: GateKind,
    qubits: Vec<Vec<QubitId>>,
    controls: Vec<QubitId>,
    control_state: String,
    /// Tags attached to the command.
    pub tags: Vec<Tag>,
}

impl Command {
    /// Create a command from raw target groups without validation.
    pub fn new(gate: impl Into<GateKind>, qubits: Vec<Vec<QubitId>>) -> Self {
        let mut cmd = Self {
            gate: gate.into(),
            qubits,
            controls: vec![],
            control_state: String::new(),
            tags: vec![],
        };
        cmd.canonicalize();
        cmd
    }

    /// Create a validated gate command with one qubit per target group.
    ///
    /// Fails if the number of targets does not match the gate or if a qubit
    /// appears twice among targets and controls.
    pub fn gate(
        gate: impl Into<GateKind>,
        targets: &[QubitId],
        controls: &[QubitId],
    ) -> IrResult<Self> {
        let gate = gate.into();
        if targets.len() != gate.num_targets() {
            return Err(IrError::QubitCountMismatch {
                gate_name: gate.name().to_string(),
                expected: gate.num_targets(),
                got: targets.len(),
            });
        }
        let mut seen: Vec<QubitId> = Vec::with_capacity(targets.len() + controls.len());
        for &qubit in controls.iter().chain(targets) {
            if seen.contains(&qubit) {
                return Err(IrError::DuplicateQubit {
                    qubit,
                    gate_name: gate.name().to_string(),
                });
            }
            seen.push(qubit);
        }
        let cmd = Self::new(gate, targets.iter().map(|&q| vec![q]).collect());
        Ok(cmd.with_controls(controls.to_vec()))
    }

    /// Allocate a single qubit.
    pub fn allocate(qubit: QubitId) -> Self {
        Self::new(GateKind::Allocate, vec![vec![qubit]])
    }

    /// Deallocate a single qubit.
    pub fn deallocate(qubit: QubitId) -> Self {
        Self::new(GateKind::Deallocate, vec![vec![qubit]])
    }

    /// Measure a single qubit.
    pub fn measure(qubit: QubitId) -> Self {
        Self::new(GateKind::Measure, vec![vec![qubit]])
    }

    /// Swap two qubits.
    pub fn swap(q0: QubitId, q1: QubitId) -> Self {
        Self::new(GateKind::Swap, vec![vec![q0], vec![q1]])
    }

    /// The flush sentinel.
    pub fn flush() -> Self {
        Self::new(GateKind::Flush, vec![])
    }

    /// Replace the control qubits; every control is conditioned on `1`.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<QubitId>) -> Self {
        self.control_state = "1".repeat(controls.len());
        self.controls = controls;
        self.canonicalize();
        self
    }

    /// Replace the control qubits with an explicit control-state bitstring.
    pub fn with_control_state(
        mut self,
        controls: Vec<QubitId>,
        state: impl Into<String>,
    ) -> IrResult<Self> {
        let state = state.into();
        if state.len() != controls.len() || state.chars().any(|c| c != '0' && c != '1') {
            return Err(IrError::ControlStateMismatch {
                state,
                num_controls: controls.len(),
            });
        }
        self.controls = controls;
        self.control_state = state;
        self.canonicalize();
        Ok(self)
    }

    /// Append a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Target qubit groups.
    pub fn qubits(&self) -> &[Vec<QubitId>] {
        &self.qubits
    }

    /// Control qubits, sorted by id.
    pub fn controls(&self) -> &[QubitId] {
        &self.controls
    }

    /// Control-state bits aligned with [`controls`](Self::controls).
    pub fn control_state(&self) -> &str {
        &self.control_state
    }

    /// All qubits: controls first, then targets in group order.
    pub fn all_qubits(&self) -> impl Iterator<Item = QubitId> + '_ {
        self.controls
            .iter()
            .copied()
            .chain(self.qubits.iter().flatten().copied())
    }

    /// Total number of qubits, counting controls.
    pub fn num_qubits(&self) -> usize {
        self.controls.len() + self.qubits.iter().map(Vec::len).sum::<usize>()
    }

    /// The first target qubit, if any.
    pub fn first_target(&self) -> Option<QubitId> {
        self.qubits.first().and_then(|group| group.first()).copied()
    }

    /// The logical id recorded by a [`Tag::LogicalQubitId`], if present.
    pub fn logical_qubit_id(&self) -> Option<QubitId> {
        self.tags.iter().find_map(|tag| match tag {
            Tag::LogicalQubitId(id) => Some(*id),
            _ => None,
        })
    }

    /// Whether this is the flush sentinel.
    pub fn is_flush(&self) -> bool {
        matches!(self.gate, GateKind::Flush)
    }

    /// Return a copy with every qubit id rewritten through `f`.
    ///
    /// The result is re-canonicalized, since renaming can change the sort
    /// order of controls and interchangeable targets.
    pub fn map_qubits(&self, mut f: impl FnMut(QubitId) -> QubitId) -> Self {
        let mut cmd = Self {
            gate: self.gate.clone(),
            qubits: self
                .qubits
                .iter()
                .map(|group| group.iter().map(|&q| f(q)).collect())
                .collect(),
            controls: self.controls.iter().map(|&q| f(q)).collect(),
            control_state: self.control_state.clone(),
            tags: self.tags.clone(),
        };
        cmd.canonicalize();
        cmd
    }

    fn canonicalize(&mut self) {
        if self.controls.len() > 1 {
            let bits: Vec<char> = self.control_state.chars().collect();
            let mut pairs: Vec<(QubitId, char)> = self
                .controls
                .iter()
                .enumerate()
                .map(|(i, &q)| (q, bits.get(i).copied().unwrap_or('1')))
                .collect();
            pairs.sort_by_key(|&(q, _)| q);
            self.controls = pairs.iter().map(|&(q, _)| q).collect();
            self.control_state = pairs.iter().map(|&(_, b)| b).collect();
        }
        if self.gate.has_interchangeable_targets() {
            self.qubits.sort_by_key(|group| group.first().copied());
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.controls.is_empty() {
            write!(f, "C{}(", self.controls.len())?;
        }
        write!(f, "{} |", self.gate.name())?;
        for group in &self.qubits {
            let ids: Vec<String> = group.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", ids.join(", "))?;
        }
        if !self.controls.is_empty() {
            let ids: Vec<String> = self.controls.iter().map(ToString::to_string).collect();
            write!(f, " ctrl [{}])", ids.join(", "))?;
        }
        Ok(())
    }
}

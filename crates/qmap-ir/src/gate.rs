//! Gate discriminants carried by commands.

use serde::{Deserialize, Serialize};

/// Standard gates with known semantics.
///
/// Controlled variants are expressed through a command's control qubits, so
/// only the target-side action is listed here (CNOT is `X` with one control).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StandardGate {
    /// Identity gate.
    I,
    /// Pauli-X gate.
    X,
    /// Pauli-Y gate.
    Y,
    /// Pauli-Z gate.
    Z,
    /// Hadamard gate.
    H,
    /// S gate (sqrt(Z)).
    S,
    /// S-dagger gate.
    Sdg,
    /// T gate (fourth root of Z).
    T,
    /// T-dagger gate.
    Tdg,
    /// sqrt(X) gate.
    SX,
    /// Rotation around X axis.
    Rx(f64),
    /// Rotation around Y axis.
    Ry(f64),
    /// Rotation around Z axis.
    Rz(f64),
    /// Global phase on the target.
    Ph(f64),
    /// XX rotation gate.
    Rxx(f64),
    /// YY rotation gate.
    Ryy(f64),
    /// ZZ rotation gate.
    Rzz(f64),
}

impl StandardGate {
    /// Get the name of this gate.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            StandardGate::I => "id",
            StandardGate::X => "x",
            StandardGate::Y => "y",
            StandardGate::Z => "z",
            StandardGate::H => "h",
            StandardGate::S => "s",
            StandardGate::Sdg => "sdg",
            StandardGate::T => "t",
            StandardGate::Tdg => "tdg",
            StandardGate::SX => "sx",
            StandardGate::Rx(_) => "rx",
            StandardGate::Ry(_) => "ry",
            StandardGate::Rz(_) => "rz",
            StandardGate::Ph(_) => "ph",
            StandardGate::Rxx(_) => "rxx",
            StandardGate::Ryy(_) => "ryy",
            StandardGate::Rzz(_) => "rzz",
        }
    }

    /// Number of target qubits, not counting controls.
    #[inline]
    pub fn num_targets(&self) -> usize {
        match self {
            StandardGate::Rxx(_) | StandardGate::Ryy(_) | StandardGate::Rzz(_) => 2,
            _ => 1,
        }
    }

    /// Whether the target qubits may be reordered without changing the gate.
    pub fn has_interchangeable_targets(&self) -> bool {
        matches!(
            self,
            StandardGate::Rxx(_) | StandardGate::Ryy(_) | StandardGate::Rzz(_)
        )
    }
}

/// A user-defined gate forwarded opaquely through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomGate {
    /// The name of the gate.
    pub name: String,
    /// The number of target qubits it operates on.
    pub num_targets: usize,
    /// Parameters of the gate.
    pub params: Vec<f64>,
}

impl CustomGate {
    /// Create a new custom gate.
    pub fn new(name: impl Into<String>, num_targets: usize) -> Self {
        Self {
            name: name.into(),
            num_targets,
            params: vec![],
        }
    }

    /// Add parameters to the gate.
    #[must_use]
    pub fn with_params(mut self, params: Vec<f64>) -> Self {
        self.params = params;
        self
    }
}

/// The closed set of command discriminants.
///
/// Pipeline stages dispatch on this with an exhaustive `match`; the reserved
/// variants (`Allocate`, `Deallocate`, `Measure`, `Swap`, `Flush`) are the
/// ones stages recognize directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateKind {
    /// Bring a qubit into existence.
    Allocate,
    /// Release a qubit.
    Deallocate,
    /// Measure a qubit in the computational basis.
    Measure,
    /// Exchange the state of two qubits.
    Swap,
    /// Drain barrier. Carries no qubits.
    Flush,
    /// A standard gate with known semantics.
    Standard(StandardGate),
    /// A custom user-defined gate.
    Custom(CustomGate),
}

impl GateKind {
    /// Get the name of this gate.
    pub fn name(&self) -> &str {
        match self {
            GateKind::Allocate => "allocate",
            GateKind::Deallocate => "deallocate",
            GateKind::Measure => "measure",
            GateKind::Swap => "swap",
            GateKind::Flush => "flush",
            GateKind::Standard(g) => g.name(),
            GateKind::Custom(g) => &g.name,
        }
    }

    /// Number of target qubits the gate expects.
    pub fn num_targets(&self) -> usize {
        match self {
            GateKind::Allocate | GateKind::Deallocate | GateKind::Measure => 1,
            GateKind::Swap => 2,
            GateKind::Flush => 0,
            GateKind::Standard(g) => g.num_targets(),
            GateKind::Custom(g) => g.num_targets,
        }
    }

    /// Whether the target qubits may be reordered without changing the gate.
    pub fn has_interchangeable_targets(&self) -> bool {
        match self {
            GateKind::Swap => true,
            GateKind::Standard(g) => g.has_interchangeable_targets(),
            GateKind::Allocate
            | GateKind::Deallocate
            | GateKind::Measure
            | GateKind::Flush
            | GateKind::Custom(_) => false,
        }
    }
}

impl From<StandardGate> for GateKind {
    fn from(gate: StandardGate) -> Self {
        GateKind::Standard(gate)
    }
}

impl From<CustomGate> for GateKind {
    fn from(gate: CustomGate) -> Self {
        GateKind::Custom(gate)
    }
}

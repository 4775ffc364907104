//! qmap command model
//!
//! This crate provides the value types that flow through a qmap compiler
//! pipeline: qubit identifiers, gate discriminants and commands.
//!
//! # Core Components
//!
//! - **Qubits**: [`QubitId`] names a qubit; [`QubitArena`] tracks the
//!   lifecycle of every id issued by a pipeline root.
//! - **Gates**: [`GateKind`] is the closed set of command discriminants,
//!   with [`StandardGate`] and [`CustomGate`] for ordinary operations.
//! - **Commands**: [`Command`] applies a gate to target qubit groups under
//!   optional controls and carries [`Tag`]s.
//!
//! # Example: A CNOT
//!
//! ```rust
//! use qmap_ir::{Command, QubitId, StandardGate};
//!
//! let cnot = Command::gate(StandardGate::X, &[QubitId(1)], &[QubitId(0)]).unwrap();
//! assert_eq!(cnot.num_qubits(), 2);
//! assert_eq!(cnot.controls(), &[QubitId(0)]);
//! ```
//!
//! # Reserved Discriminants
//!
//! | Kind | Targets | Meaning |
//! |------|---------|---------|
//! | `Allocate` | 1 | Qubit comes into existence |
//! | `Deallocate` | 1 | Qubit is released; its id is poisoned |
//! | `Measure` | 1 | Computational-basis measurement |
//! | `Swap` | 2 | Exchange of two qubits |
//! | `Flush` | 0 | Drain barrier |

pub mod command;
pub mod error;
pub mod gate;
pub mod qubit;

pub use command::{Command, Tag};
pub use error::{IrError, IrResult};
pub use gate::{CustomGate, GateKind, StandardGate};
pub use qubit::{QubitArena, QubitId, QubitState};

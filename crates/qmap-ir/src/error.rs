//! Error types for the IR crate.

use crate::qubit::QubitId;
use thiserror::Error;

/// Errors that can occur when building commands or tracking qubits.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IrError {
    /// The qubit id was never issued.
    #[error("Qubit {0} not found")]
    QubitNotFound(QubitId),

    /// The qubit was already deallocated; its id is poisoned.
    #[error("Qubit {0} was already deallocated")]
    QubitDeallocated(QubitId),

    /// Every `u32` qubit id has been issued.
    #[error("Qubit ids exhausted: every u32 id has been issued")]
    QubitIdsExhausted,

    /// Gate requires a different number of target qubits.
    #[error("Gate '{gate_name}' requires {expected} target qubits, got {got}")]
    QubitCountMismatch {
        /// Name of the gate.
        gate_name: String,
        /// Expected number of qubits.
        expected: usize,
        /// Actual number of qubits provided.
        got: usize,
    },

    /// The same qubit appears twice in one command.
    #[error("Duplicate qubit {qubit} in '{gate_name}'")]
    DuplicateQubit {
        /// The duplicate qubit.
        qubit: QubitId,
        /// Gate name for context.
        gate_name: String,
    },

    /// Control-state bitstring does not match the number of controls.
    #[error("Control state '{state}' does not match {num_controls} control qubits")]
    ControlStateMismatch {
        /// The offending bitstring.
        state: String,
        /// Number of control qubits.
        num_controls: usize,
    },
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;

//! Error types for the compilation crate.

use qmap_ir::QubitId;
use thiserror::Error;

/// Errors that can occur while running a compiler pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// Error from the IR crate.
    #[error("IR error: {0}")]
    Ir(#[from] qmap_ir::IrError),

    /// Malformed construction parameters (id relabeling, topology, mapping).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A command touches more qubits than the mapper can place at once.
    #[error("Command needs {required} qubits but at most {available} can interact")]
    CapacityExceeded {
        /// Qubits touched by the command, counting controls.
        required: usize,
        /// Largest number of qubits the mapper can serve in one command.
        available: usize,
    },

    /// A remap cycle neither realized a command nor moved a qubit.
    #[error(
        "Circuit cannot be routed on {capacity} physical qubits: \
         {pending} buffered commands made no progress"
    )]
    UnroutableCircuit {
        /// Physical capacity of the mapper.
        capacity: usize,
        /// Commands left in the buffer.
        pending: usize,
    },

    /// An algorithm invariant was violated.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// A stage forwarded commands or an availability query past the end of
    /// the pipeline.
    #[error("No next engine after '{0}'; a terminal stage must override is_available")]
    NoNextEngine(String),

    /// The pipeline was assembled incorrectly.
    #[error("Unsupported engine setup: {0}")]
    UnsupportedEngine(String),

    /// A lifecycle gate was passed where an ordinary gate is expected.
    #[error("Gate '{0}' is issued by the engine itself and cannot be applied")]
    ReservedGate(String),

    /// No measurement result was recorded for the qubit.
    #[error("No measurement result for qubit {0}; measure it and flush first")]
    NotYetMeasured(QubitId),
}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::CapacityExceeded {
            required: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Command needs 3 qubits but at most 2 can interact"
        );

        let err = CompileError::from(qmap_ir::IrError::QubitDeallocated(QubitId(4)));
        assert_eq!(err.to_string(), "IR error: Qubit q4 was already deallocated");
    }
}

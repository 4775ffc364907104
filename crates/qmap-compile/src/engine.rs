//! Engine trait and the plumbing that connects pipeline stages.

use std::any::Any;

use rustc_hash::FxHashMap;

use qmap_ir::{Command, QubitId};

use crate::error::{CompileError, CompileResult};
use crate::mapper::Mapper;

/// Downcasting support for boxed stages.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A stage in a compiler pipeline.
///
/// Stages are chained: each receives command batches from its predecessor
/// and forwards (possibly rewritten) batches through the [`Downstream`]
/// handle. A stage that buffers must drain completely before forwarding a
/// flush command.
pub trait Engine: AsAny + Send + Sync {
    /// Get the name of this stage.
    fn name(&self) -> &str;

    /// Process a batch of commands.
    fn receive(&mut self, commands: Vec<Command>, next: &mut Downstream<'_>) -> CompileResult<()>;

    /// Whether this stage (and the rest of the pipeline) can execute `cmd`.
    ///
    /// The default asks the next stage. A terminal stage must override it.
    fn is_available(&self, cmd: &Command, next: Upcoming<'_>) -> CompileResult<bool> {
        next.is_available(cmd, self.name())
    }

    /// View this stage as a mapper, if it is one.
    fn as_mapper(&self) -> Option<&dyn Mapper> {
        None
    }

    /// Mutable counterpart of [`as_mapper`](Self::as_mapper).
    fn as_mapper_mut(&mut self) -> Option<&mut dyn Mapper> {
        None
    }
}

/// Measurement outcomes keyed by logical qubit id.
#[derive(Debug, Clone, Default)]
pub struct MeasurementResults {
    outcomes: FxHashMap<QubitId, bool>,
}

impl MeasurementResults {
    /// Create an empty result store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the outcome for a qubit.
    pub fn record(&mut self, qubit: QubitId, outcome: bool) {
        self.outcomes.insert(qubit, outcome);
    }

    /// Get the last recorded outcome for a qubit.
    pub fn get(&self, qubit: QubitId) -> Option<bool> {
        self.outcomes.get(&qubit).copied()
    }

    /// Number of qubits with a recorded outcome.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if no outcome has been recorded.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// The remainder of a pipeline as seen by one stage.
pub struct Downstream<'a> {
    stages: &'a mut [Box<dyn Engine>],
    results: &'a mut MeasurementResults,
}

impl<'a> Downstream<'a> {
    /// Wrap the stages following the caller.
    pub fn new(stages: &'a mut [Box<dyn Engine>], results: &'a mut MeasurementResults) -> Self {
        Self { stages, results }
    }

    /// Forward a batch to the next stage. Empty batches are dropped.
    pub fn send(&mut self, commands: Vec<Command>, sender: &str) -> CompileResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let Some((next, rest)) = self.stages.split_first_mut() else {
            return Err(CompileError::NoNextEngine(sender.to_string()));
        };
        let mut downstream = Downstream {
            stages: rest,
            results: &mut *self.results,
        };
        next.receive(commands, &mut downstream)
    }

    /// Availability view of the remaining stages.
    pub fn upcoming(&self) -> Upcoming<'_> {
        Upcoming(&*self.stages)
    }

    /// Measurement result store owned by the pipeline root.
    pub fn results(&mut self) -> &mut MeasurementResults {
        &mut *self.results
    }

    /// Whether no stage follows.
    pub fn is_terminal(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Read-only view of the stages following a caller, for availability
/// queries.
#[derive(Clone, Copy)]
pub struct Upcoming<'a>(&'a [Box<dyn Engine>]);

impl<'a> Upcoming<'a> {
    /// Wrap the stages following the caller.
    pub fn new(stages: &'a [Box<dyn Engine>]) -> Self {
        Self(stages)
    }

    /// Ask the next stage whether `cmd` is available.
    pub fn is_available(self, cmd: &Command, asker: &str) -> CompileResult<bool> {
        match self.0.split_first() {
            Some((next, rest)) => next.is_available(cmd, Upcoming(rest)),
            None => Err(CompileError::NoNextEngine(asker.to_string())),
        }
    }
}

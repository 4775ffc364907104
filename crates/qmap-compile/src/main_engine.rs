//! The pipeline root.

use tracing::{debug, info, instrument};

use qmap_ir::{Command, GateKind, IrResult, QubitArena, QubitId, QubitState};

use crate::engine::{Downstream, Engine, MeasurementResults, Upcoming};
use crate::error::{CompileError, CompileResult};
use crate::mapper::Mapper;

const ROOT_NAME: &str = "MainEngine";

/// Root of a compiler pipeline.
///
/// The root issues qubit ids, validates that commands only reference live
/// qubits, and owns the measurement results reported by the backend.
pub struct MainEngine {
    stages: Vec<Box<dyn Engine>>,
    arena: QubitArena,
    results: MeasurementResults,
    mapper_index: Option<usize>,
}

impl MainEngine {
    /// Start assembling a pipeline.
    pub fn builder() -> MainEngineBuilder {
        MainEngineBuilder::new()
    }

    fn send(&mut self, commands: Vec<Command>) -> CompileResult<()> {
        Downstream::new(&mut self.stages, &mut self.results).send(commands, ROOT_NAME)
    }

    /// Allocate one qubit.
    pub fn allocate_qubit(&mut self) -> CompileResult<QubitId> {
        let qubit = self.arena.allocate()?;
        self.send(vec![Command::allocate(qubit)])?;
        Ok(qubit)
    }

    /// Allocate `n` qubits in one batch.
    pub fn allocate_qureg(&mut self, n: usize) -> CompileResult<Vec<QubitId>> {
        let qubits = (0..n)
            .map(|_| self.arena.allocate())
            .collect::<IrResult<Vec<QubitId>>>()?;
        self.send(qubits.iter().map(|&q| Command::allocate(q)).collect())?;
        Ok(qubits)
    }

    /// Release a live qubit. Its id is never issued again.
    pub fn deallocate_qubit(&mut self, qubit: QubitId) -> CompileResult<()> {
        self.arena.deallocate(qubit)?;
        self.send(vec![Command::deallocate(qubit)])
    }

    /// Run `f` on `n` fresh qubits, then release whichever of them are
    /// still live, also when `f` fails.
    pub fn with_qubits<T>(
        &mut self,
        n: usize,
        f: impl FnOnce(&mut Self, &[QubitId]) -> CompileResult<T>,
    ) -> CompileResult<T> {
        let qubits = self.allocate_qureg(n)?;
        let outcome = f(self, &qubits);
        let still_live: Vec<QubitId> = qubits
            .into_iter()
            .filter(|&q| self.arena.state(q).is_some_and(QubitState::is_live))
            .collect();
        let released = still_live
            .into_iter()
            .try_for_each(|q| self.deallocate_qubit(q));
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Apply a gate without controls.
    pub fn apply(&mut self, gate: impl Into<GateKind>, targets: &[QubitId]) -> CompileResult<()> {
        self.apply_controlled(gate, &[], targets)
    }

    /// Apply a gate conditioned on every control being `1`.
    pub fn apply_controlled(
        &mut self,
        gate: impl Into<GateKind>,
        controls: &[QubitId],
        targets: &[QubitId],
    ) -> CompileResult<()> {
        let gate = gate.into();
        match gate {
            GateKind::Allocate | GateKind::Deallocate | GateKind::Measure | GateKind::Flush => {
                return Err(CompileError::ReservedGate(gate.name().to_string()));
            }
            GateKind::Swap | GateKind::Standard(_) | GateKind::Custom(_) => {}
        }
        for &qubit in controls.iter().chain(targets) {
            self.arena.check_live(qubit)?;
        }
        let cmd = Command::gate(gate, targets, controls)?;
        self.send(vec![cmd])
    }

    /// Exchange two qubits.
    pub fn swap(&mut self, q0: QubitId, q1: QubitId) -> CompileResult<()> {
        self.apply(GateKind::Swap, &[q0, q1])
    }

    /// Measure a qubit. The outcome is available after the next flush.
    pub fn measure(&mut self, qubit: QubitId) -> CompileResult<()> {
        self.arena.mark_measured(qubit)?;
        self.send(vec![Command::measure(qubit)])
    }

    /// Drain every stage, optionally releasing all live qubits first.
    ///
    /// Flushing an already drained pipeline only forwards another flush.
    #[instrument(skip(self))]
    pub fn flush(&mut self, deallocate_qubits: bool) -> CompileResult<()> {
        let mut batch = Vec::new();
        if deallocate_qubits {
            let live: Vec<QubitId> = self.arena.live().collect();
            for qubit in live {
                self.arena.deallocate(qubit)?;
                batch.push(Command::deallocate(qubit));
            }
        }
        info!(
            "Flushing pipeline of {} stages, releasing {} qubits",
            self.stages.len(),
            batch.len()
        );
        batch.push(Command::flush());
        self.send(batch)
    }

    /// Outcome of the last measurement of `qubit`.
    pub fn measurement_result(&self, qubit: QubitId) -> CompileResult<bool> {
        self.results
            .get(qubit)
            .ok_or(CompileError::NotYetMeasured(qubit))
    }

    /// Whether the pipeline can execute `cmd`.
    pub fn is_available(&self, cmd: &Command) -> CompileResult<bool> {
        Upcoming::new(&self.stages).is_available(cmd, ROOT_NAME)
    }

    /// The mapper stage, if the pipeline has one.
    pub fn mapper(&self) -> Option<&dyn Mapper> {
        self.stages.get(self.mapper_index?)?.as_mapper()
    }

    /// Mutable access to the mapper stage.
    pub fn mapper_mut(&mut self) -> Option<&mut dyn Mapper> {
        self.stages.get_mut(self.mapper_index?)?.as_mapper_mut()
    }

    /// The first stage of type `T`.
    pub fn stage<T: Engine>(&self) -> Option<&T> {
        self.stages
            .iter()
            .find_map(|stage| stage.as_ref().as_any().downcast_ref::<T>())
    }

    /// Mutable access to the first stage of type `T`.
    pub fn stage_mut<T: Engine>(&mut self) -> Option<&mut T> {
        self.stages
            .iter_mut()
            .find_map(|stage| stage.as_mut().as_any_mut().downcast_mut::<T>())
    }

    /// Lifecycle state of an id, `None` if it was never issued.
    pub fn qubit_state(&self, qubit: QubitId) -> Option<QubitState> {
        self.arena.state(qubit)
    }

    /// Ids of all live qubits in ascending order.
    pub fn live_qubits(&self) -> Vec<QubitId> {
        self.arena.live().collect()
    }

    /// Stage names in pipeline order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

/// Builder assembling the stages of a [`MainEngine`].
#[derive(Default)]
pub struct MainEngineBuilder {
    stages: Vec<Box<dyn Engine>>,
    backend: Option<Box<dyn Engine>>,
}

impl MainEngineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an intermediate stage.
    #[must_use]
    pub fn with_stage(self, stage: impl Engine) -> Self {
        self.with_boxed_stage(Box::new(stage))
    }

    /// Append an already boxed stage, e.g. one built from a
    /// [`TopologyConfig`](crate::TopologyConfig).
    #[must_use]
    pub fn with_boxed_stage(mut self, stage: Box<dyn Engine>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Set the terminal stage. It always runs last.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Engine) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Validate the stage list and build the engine.
    ///
    /// Fails with [`CompileError::UnsupportedEngine`] for an empty pipeline
    /// or one with more than one mapper.
    pub fn build(self) -> CompileResult<MainEngine> {
        let mut stages = self.stages;
        stages.extend(self.backend);
        if stages.is_empty() {
            return Err(CompileError::UnsupportedEngine(
                "a pipeline needs at least one stage".into(),
            ));
        }

        let mappers: Vec<usize> = stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.as_mapper().is_some())
            .map(|(index, _)| index)
            .collect();
        if mappers.len() > 1 {
            return Err(CompileError::UnsupportedEngine(format!(
                "pipeline holds {} mappers; at most one is supported",
                mappers.len()
            )));
        }

        debug!(
            "Built pipeline: {}",
            stages
                .iter()
                .map(|stage| stage.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(MainEngine {
            stages,
            arena: QubitArena::new(),
            results: MeasurementResults::new(),
            mapper_index: mappers.first().copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::mapper::LinearMapper;
    use qmap_ir::{IrError, StandardGate};

    fn backend_only() -> MainEngine {
        MainEngine::builder()
            .with_backend(RecordingBackend::new().with_outcome(true))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_pipelines() {
        assert!(matches!(
            MainEngine::builder().build(),
            Err(CompileError::UnsupportedEngine(_))
        ));
        let two_mappers = MainEngine::builder()
            .with_stage(LinearMapper::linear(3, false).unwrap())
            .with_stage(LinearMapper::linear(3, false).unwrap())
            .with_backend(RecordingBackend::new())
            .build();
        assert!(matches!(two_mappers, Err(CompileError::UnsupportedEngine(_))));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut engine = backend_only();
        let a = engine.allocate_qubit().unwrap();
        engine.deallocate_qubit(a).unwrap();
        let b = engine.allocate_qubit().unwrap();
        assert!(b > a);
        assert_eq!(engine.qubit_state(a), Some(QubitState::Deallocated));
        assert!(matches!(
            engine.deallocate_qubit(a),
            Err(CompileError::Ir(IrError::QubitDeallocated(_)))
        ));
        assert!(matches!(
            engine.deallocate_qubit(QubitId(99)),
            Err(CompileError::Ir(IrError::QubitNotFound(_)))
        ));
    }

    #[test]
    fn test_apply_validates_qubits_and_gate() {
        let mut engine = backend_only();
        let q = engine.allocate_qureg(2).unwrap();
        engine.deallocate_qubit(q[1]).unwrap();
        assert!(engine.apply(StandardGate::H, &[q[1]]).is_err());
        assert!(matches!(
            engine.apply(GateKind::Measure, &[q[0]]),
            Err(CompileError::ReservedGate(_))
        ));
        engine.apply(StandardGate::H, &[q[0]]).unwrap();
        let backend = engine.stage::<RecordingBackend>().unwrap();
        assert_eq!(backend.gates().count(), 1);
    }

    #[test]
    fn test_measurement_result_after_flush() {
        let mut engine = backend_only();
        let q = engine.allocate_qubit().unwrap();
        assert!(matches!(
            engine.measurement_result(q),
            Err(CompileError::NotYetMeasured(_))
        ));
        engine.measure(q).unwrap();
        engine.flush(false).unwrap();
        assert!(engine.measurement_result(q).unwrap());
        assert_eq!(engine.qubit_state(q), Some(QubitState::Measured));
    }

    #[test]
    fn test_with_qubits_releases_on_error() {
        let mut engine = backend_only();
        let result: CompileResult<()> = engine.with_qubits(2, |engine, q| {
            engine.deallocate_qubit(q[0])?;
            engine.apply(StandardGate::H, &[q[0]])
        });
        assert!(result.is_err());
        assert!(engine.live_qubits().is_empty());
        let backend = engine.stage::<RecordingBackend>().unwrap();
        assert!(backend.live_qubits().is_empty());
    }

    #[test]
    fn test_flush_releases_live_qubits() {
        let mut engine = backend_only();
        engine.allocate_qureg(3).unwrap();
        engine.flush(true).unwrap();
        engine.flush(true).unwrap();
        assert!(engine.live_qubits().is_empty());
        let backend = engine.stage::<RecordingBackend>().unwrap();
        assert_eq!(backend.num_flushes(), 2);
        assert_eq!(backend.max_live(), 3);
    }

    #[test]
    fn test_availability_and_mapper_access() {
        let mut engine = MainEngine::builder()
            .with_stage(LinearMapper::linear(4, false).unwrap())
            .with_backend(RecordingBackend::new())
            .build()
            .unwrap();
        assert_eq!(engine.stage_names(), vec!["LinearMapper", "RecordingBackend"]);
        let toffoli =
            Command::gate(StandardGate::X, &[QubitId(2)], &[QubitId(0), QubitId(1)]).unwrap();
        assert!(!engine.is_available(&toffoli).unwrap());
        assert_eq!(engine.mapper().map(|m| m.capacity()), Some(4));
        assert!(engine.mapper_mut().is_some());
        assert!(backend_only().mapper().is_none());
    }
}

//! A terminal stage that records what reaches the end of a pipeline.

use rustc_hash::FxHashSet;
use tracing::debug;

use qmap_ir::{Command, GateKind, QubitId};

use crate::engine::{Downstream, Engine, Upcoming};
use crate::error::CompileResult;

/// Terminal stage that stores every received command.
///
/// Measurements are answered with a fixed outcome and reported to the
/// pipeline root under the command's logical qubit id (or its target, when
/// no mapper ran upstream). The stage also tracks which physical qubits are
/// live so tests can check resource bounds.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    received: Vec<Command>,
    outcome: bool,
    live: FxHashSet<QubitId>,
    max_live: usize,
    num_flushes: usize,
}

impl RecordingBackend {
    /// Create a backend that reports `false` for every measurement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outcome reported for measurements.
    #[must_use]
    pub fn with_outcome(mut self, outcome: bool) -> Self {
        self.outcome = outcome;
        self
    }

    /// All commands received so far, in order.
    pub fn received(&self) -> &[Command] {
        &self.received
    }

    /// Take the received commands, leaving the log empty.
    pub fn take_received(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.received)
    }

    /// Received commands that are neither lifecycle commands nor flushes.
    pub fn gates(&self) -> impl Iterator<Item = &Command> + '_ {
        self.received.iter().filter(|cmd| {
            !matches!(
                cmd.gate,
                GateKind::Allocate | GateKind::Deallocate | GateKind::Flush
            )
        })
    }

    /// Received swap commands.
    pub fn swaps(&self) -> impl Iterator<Item = &Command> + '_ {
        self.received
            .iter()
            .filter(|cmd| matches!(cmd.gate, GateKind::Swap))
    }

    /// Physical qubits currently allocated.
    pub fn live_qubits(&self) -> &FxHashSet<QubitId> {
        &self.live
    }

    /// Largest number of simultaneously allocated qubits observed.
    pub fn max_live(&self) -> usize {
        self.max_live
    }

    /// Number of flush commands received.
    pub fn num_flushes(&self) -> usize {
        self.num_flushes
    }
}

impl Engine for RecordingBackend {
    fn name(&self) -> &str {
        "RecordingBackend"
    }

    fn receive(&mut self, commands: Vec<Command>, next: &mut Downstream<'_>) -> CompileResult<()> {
        debug!("Backend received {} commands", commands.len());
        for cmd in commands {
            match cmd.gate {
                GateKind::Allocate => {
                    if let Some(qubit) = cmd.first_target() {
                        self.live.insert(qubit);
                        self.max_live = self.max_live.max(self.live.len());
                    }
                }
                GateKind::Deallocate => {
                    if let Some(qubit) = cmd.first_target() {
                        self.live.remove(&qubit);
                    }
                }
                GateKind::Measure => {
                    if let Some(qubit) = cmd.logical_qubit_id().or(cmd.first_target()) {
                        next.results().record(qubit, self.outcome);
                    }
                }
                GateKind::Flush => self.num_flushes += 1,
                GateKind::Swap | GateKind::Standard(_) | GateKind::Custom(_) => {}
            }
            self.received.push(cmd);
        }
        Ok(())
    }

    fn is_available(&self, _cmd: &Command, _next: Upcoming<'_>) -> CompileResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MeasurementResults;
    use qmap_ir::Tag;

    #[test]
    fn test_backend_records_and_reports() {
        let mut backend = RecordingBackend::new().with_outcome(true);
        let mut stages: Vec<Box<dyn Engine>> = vec![];
        let mut results = MeasurementResults::new();
        let mut next = Downstream::new(&mut stages, &mut results);

        backend
            .receive(
                vec![
                    Command::allocate(QubitId(2)),
                    Command::measure(QubitId(2)).with_tag(Tag::LogicalQubitId(QubitId(7))),
                    Command::deallocate(QubitId(2)),
                    Command::flush(),
                ],
                &mut next,
            )
            .unwrap();

        assert_eq!(backend.received().len(), 4);
        assert_eq!(backend.gates().count(), 1);
        assert_eq!(backend.max_live(), 1);
        assert!(backend.live_qubits().is_empty());
        assert_eq!(backend.num_flushes(), 1);
        assert_eq!(results.get(QubitId(7)), Some(true));
        assert_eq!(results.get(QubitId(2)), None);
    }

    #[test]
    fn test_untagged_measurement_uses_target() {
        let mut backend = RecordingBackend::new();
        let mut stages: Vec<Box<dyn Engine>> = vec![];
        let mut results = MeasurementResults::new();
        let mut next = Downstream::new(&mut stages, &mut results);

        backend
            .receive(vec![Command::measure(QubitId(3))], &mut next)
            .unwrap();
        assert_eq!(results.get(QubitId(3)), Some(false));
    }
}

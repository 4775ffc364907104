//! Topology-aware qubit mappers.
//!
//! Every mapper shares one control loop, [`MapperEngine`], which buffers
//! incoming commands, forwards the ones the current mapping can already
//! execute and remaps when it gets stuck. What differs per topology lives
//! behind [`RoutingStrategy`]:
//!
//! - [`LinearChain`]: a chain or ring of qubits
//! - [`GridLattice`]: a 2-D grid, handled as a snake-shaped chain
//! - [`GraphRouting`]: any connected coupling graph
//!
//! # Example
//!
//! ```
//! use qmap_compile::{LinearMapper, MainEngine, RecordingBackend};
//! use qmap_ir::StandardGate;
//!
//! let mut engine = MainEngine::builder()
//!     .with_stage(LinearMapper::linear(3, false).unwrap())
//!     .with_backend(RecordingBackend::new())
//!     .build()
//!     .unwrap();
//!
//! let q = engine.allocate_qureg(3).unwrap();
//! engine.apply_controlled(StandardGate::X, &[q[0]], &[q[2]]).unwrap();
//! engine.flush(true).unwrap();
//! assert_eq!(engine.mapper().unwrap().stats().num_mappings, 0);
//! ```

mod graph;
mod grid;
mod linear;
mod segment;

pub use graph::{GraphRouting, Placement, lowest_free_node};
pub use grid::{GridLattice, SwapCost};
pub use linear::{LinearChain, odd_even_transposition_swaps};
pub use segment::{SegmentBuilder, place_on_chain};

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, instrument};

use qmap_ir::{Command, GateKind, QubitId, Tag};

use crate::config::MapperConfig;
use crate::engine::{Downstream, Engine, Upcoming};
use crate::error::{CompileError, CompileResult};
use crate::mapping::Mapping;
use crate::stats::MapperStats;

/// Mapper over a linear chain or ring.
pub type LinearMapper = MapperEngine<LinearChain>;
/// Mapper over a 2-D grid.
pub type GridMapper = MapperEngine<GridLattice>;
/// Mapper over an arbitrary coupling graph.
pub type GraphMapper = MapperEngine<GraphRouting>;

/// Object-safe view of a mapper stage.
pub trait Mapper {
    /// Number of physical qubits.
    fn capacity(&self) -> usize;

    /// Snapshot of the mapping in backend ids; `None` before the first
    /// remap cycle.
    fn current_mapping(&self) -> CompileResult<Option<Mapping>>;

    /// Install a mapping given in backend ids.
    fn set_current_mapping(&mut self, mapping: Mapping) -> CompileResult<()>;

    /// Diagnostics collected so far.
    fn stats(&self) -> &MapperStats;

    /// Number of commands waiting in the buffer.
    fn num_buffered(&self) -> usize;
}

/// Output of one placement round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Target mapping, in internal physical ids.
    pub mapping: Mapping,
    /// Adjacent exchanges turning the current mapping into `mapping`.
    pub swaps: Vec<(u32, u32)>,
}

/// Topology-specific half of a mapper.
///
/// Strategies work in internal physical ids `0..capacity`;
/// [`to_backend`](Self::to_backend) translates them for the next stage.
pub trait RoutingStrategy: Send + Sync + 'static {
    /// Stage name reported by the owning mapper.
    fn name(&self) -> &'static str;

    /// Number of physical qubits.
    fn capacity(&self) -> usize;

    /// Whether two internal ids are coupled.
    fn is_adjacent(&self, p0: u32, p1: u32) -> bool;

    /// Compute a new mapping for the buffered commands and the swaps that
    /// reach it from `current`.
    ///
    /// `allocated` holds the logical qubits whose allocation has already
    /// been forwarded.
    fn plan(
        &mut self,
        allocated: &FxHashSet<QubitId>,
        buffer: &VecDeque<Command>,
        current: &Mapping,
    ) -> CompileResult<Plan>;

    /// Pick up tuning knobs from the mapper configuration.
    fn configure(&mut self, _config: &MapperConfig) {}

    /// Translate an internal id into a backend id.
    fn to_backend(&self, physical: u32) -> CompileResult<u32> {
        Ok(physical)
    }

    /// Translate a backend id into an internal id.
    fn from_backend(&self, backend: u32) -> Option<u32> {
        ((backend as usize) < self.capacity()).then_some(backend)
    }
}

/// The control loop shared by all mappers.
pub struct MapperEngine<S> {
    strategy: S,
    config: MapperConfig,
    buffer: VecDeque<Command>,
    /// Logical → internal physical ids. `None` until the first cycle.
    mapping: Option<Mapping>,
    /// Logical qubits whose allocation was forwarded and not yet released.
    currently_allocated: FxHashSet<QubitId>,
    stats: MapperStats,
    stalled: bool,
}

impl<S: RoutingStrategy> MapperEngine<S> {
    /// Wrap a strategy with the default configuration.
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            config: MapperConfig::default(),
            buffer: VecDeque::new(),
            mapping: None,
            currently_allocated: FxHashSet::default(),
            stats: MapperStats::default(),
            stalled: false,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: MapperConfig) -> CompileResult<Self> {
        config.validate()?;
        self.strategy.configure(&config);
        self.config = config;
        Ok(self)
    }

    /// Set the buffer capacity.
    pub fn with_buffer_capacity(self, buffer_capacity: usize) -> CompileResult<Self> {
        let config = self.config.with_buffer_capacity(buffer_capacity);
        self.with_config(config)
    }

    /// The routing strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// The active configuration.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn check_capacity(&self, cmd: &Command) -> CompileResult<()> {
        let required = cmd.num_qubits();
        let available = self.strategy.capacity().min(2);
        if required > available {
            return Err(CompileError::CapacityExceeded {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Run one remap cycle.
    #[instrument(skip_all, fields(mapper = self.strategy.name()))]
    fn run_cycle(&mut self, next: &mut Downstream<'_>) -> CompileResult<()> {
        let name = self.strategy.name();
        let mut drained = 0;
        if self.mapping.is_some() {
            drained += self.drain(next)?;
            if self.buffer.is_empty() {
                self.stalled = false;
                return Ok(());
            }
        }

        let current = self.mapping.get_or_insert_with(Mapping::new);
        let plan = self
            .strategy
            .plan(&self.currently_allocated, &self.buffer, current)?;
        let num_swaps = plan.swaps.len();
        if num_swaps > 0 {
            let batch = swap_batch(
                &self.strategy,
                &self.currently_allocated,
                current,
                &plan,
            )?;
            next.send(batch, name)?;
            self.stats.record(&plan.swaps);
            info!("{} remapped with {} swaps", name, num_swaps);
        }
        self.mapping = Some(plan.mapping);
        drained += self.drain(next)?;

        if drained == 0 {
            if num_swaps == 0 || self.stalled {
                return Err(CompileError::UnroutableCircuit {
                    capacity: self.strategy.capacity(),
                    pending: self.buffer.len(),
                });
            }
            self.stalled = true;
        } else {
            self.stalled = false;
        }
        Ok(())
    }

    /// Forward every buffered command the current mapping can execute,
    /// keeping per-qubit order. Returns the number of commands realized.
    fn drain(&mut self, next: &mut Downstream<'_>) -> CompileResult<usize> {
        let strategy = &self.strategy;
        let Some(mapping) = self.mapping.as_mut() else {
            return Ok(0);
        };
        let backend = |p: u32| strategy.to_backend(p).map(QubitId);

        let mut active: FxHashSet<QubitId> = self
            .currently_allocated
            .iter()
            .copied()
            .chain(mapping.iter().map(|(logical, _)| logical))
            .collect();
        let mut kept = VecDeque::with_capacity(self.buffer.len());
        let mut forward = Vec::new();

        while let Some(cmd) = self.buffer.pop_front() {
            if active.is_empty() {
                kept.push_back(cmd);
                kept.append(&mut self.buffer);
                break;
            }
            match cmd.gate {
                GateKind::Allocate => {
                    let qubit = single_target(&cmd)?;
                    match mapping.get_physical(qubit) {
                        Some(physical) => {
                            self.currently_allocated.insert(qubit);
                            forward.push(
                                Command::allocate(backend(physical)?)
                                    .with_tag(Tag::LogicalQubitId(qubit)),
                            );
                        }
                        None => kept.push_back(cmd),
                    }
                }
                GateKind::Deallocate => {
                    let qubit = single_target(&cmd)?;
                    if active.remove(&qubit) {
                        let physical = mapping.remove(qubit).ok_or_else(|| {
                            CompileError::InternalInvariant(format!(
                                "active qubit {qubit} has no physical qubit"
                            ))
                        })?;
                        self.currently_allocated.remove(&qubit);
                        forward.push(
                            Command::deallocate(backend(physical)?)
                                .with_tag(Tag::LogicalQubitId(qubit)),
                        );
                    } else {
                        kept.push_back(cmd);
                    }
                }
                GateKind::Flush => {
                    return Err(CompileError::InternalInvariant(
                        "flush command found in mapper buffer".into(),
                    ));
                }
                GateKind::Measure | GateKind::Swap | GateKind::Standard(_) | GateKind::Custom(_) => {
                    if is_realizable(strategy, mapping, &active, &cmd) {
                        let mut translated = FxHashMap::default();
                        for qubit in cmd.all_qubits() {
                            if let Some(physical) = mapping.get_physical(qubit) {
                                translated.insert(qubit, backend(physical)?);
                            }
                        }
                        let mut mapped = cmd.map_qubits(|q| translated.get(&q).copied().unwrap_or(q));
                        if matches!(cmd.gate, GateKind::Measure) {
                            if let Some(logical) = cmd.first_target() {
                                mapped = mapped.with_tag(Tag::LogicalQubitId(logical));
                            }
                        }
                        forward.push(mapped);
                    } else {
                        for qubit in cmd.all_qubits() {
                            active.remove(&qubit);
                        }
                        kept.push_back(cmd);
                    }
                }
            }
        }

        let realized = forward.len();
        self.buffer = kept;
        debug!(
            "{} forwarded {} commands, {} still buffered",
            strategy.name(),
            realized,
            self.buffer.len()
        );
        next.send(forward, strategy.name())?;
        Ok(realized)
    }
}

fn single_target(cmd: &Command) -> CompileResult<QubitId> {
    match (cmd.first_target(), cmd.num_qubits()) {
        (Some(qubit), 1) => Ok(qubit),
        _ => Err(CompileError::InternalInvariant(format!(
            "{} must act on exactly one qubit",
            cmd.gate.name()
        ))),
    }
}

fn is_realizable<S: RoutingStrategy>(
    strategy: &S,
    mapping: &Mapping,
    active: &FxHashSet<QubitId>,
    cmd: &Command,
) -> bool {
    let mut physical = Vec::with_capacity(2);
    for qubit in cmd.all_qubits() {
        if !active.contains(&qubit) {
            return false;
        }
        match mapping.get_physical(qubit) {
            Some(p) => physical.push(p),
            None => return false,
        }
    }
    match physical.as_slice() {
        [p0, p1] => strategy.is_adjacent(*p0, *p1),
        _ => true,
    }
}

/// Scratch allocations, swaps and scratch deallocations for one remap, in
/// backend ids.
///
/// Only physical qubits touched by a swap and not holding an allocated
/// logical qubit are borrowed.
fn swap_batch<S: RoutingStrategy>(
    strategy: &S,
    allocated: &FxHashSet<QubitId>,
    old: &Mapping,
    plan: &Plan,
) -> CompileResult<Vec<Command>> {
    let backend = |p: u32| strategy.to_backend(p).map(QubitId);
    let touched: BTreeSet<u32> = plan.swaps.iter().flat_map(|&(a, b)| [a, b]).collect();

    let mut held_before = FxHashSet::default();
    let mut held_after = FxHashSet::default();
    for &logical in allocated {
        let (Some(before), Some(after)) = (old.get_physical(logical), plan.mapping.get_physical(logical))
        else {
            return Err(CompileError::InternalInvariant(format!(
                "allocated qubit {logical} is missing from a mapping"
            )));
        };
        held_before.insert(before);
        held_after.insert(after);
    }

    let mut batch = Vec::with_capacity(plan.swaps.len() + 2 * touched.len());
    for &p in touched.iter().filter(|p| !held_before.contains(*p)) {
        batch.push(Command::allocate(backend(p)?));
    }
    for &(p0, p1) in &plan.swaps {
        if !strategy.is_adjacent(p0, p1) {
            return Err(CompileError::InternalInvariant(format!(
                "swap ({p0}, {p1}) is not on a coupling edge"
            )));
        }
        batch.push(Command::swap(backend(p0)?, backend(p1)?));
    }
    for &p in touched.iter().filter(|p| !held_after.contains(*p)) {
        batch.push(Command::deallocate(backend(p)?));
    }
    Ok(batch)
}

impl<S: RoutingStrategy> Engine for MapperEngine<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn receive(&mut self, commands: Vec<Command>, next: &mut Downstream<'_>) -> CompileResult<()> {
        for cmd in commands {
            if cmd.is_flush() {
                info!(
                    "{} flushing {} buffered commands",
                    self.strategy.name(),
                    self.buffer.len()
                );
                while !self.buffer.is_empty() {
                    self.run_cycle(next)?;
                }
                next.send(vec![cmd], self.strategy.name())?;
                continue;
            }
            self.check_capacity(&cmd)?;
            self.buffer.push_back(cmd);
            if self.buffer.len() >= self.config.buffer_capacity {
                self.run_cycle(next)?;
            }
        }
        Ok(())
    }

    fn is_available(&self, cmd: &Command, _next: Upcoming<'_>) -> CompileResult<bool> {
        Ok(cmd.num_qubits() <= 2)
    }

    fn as_mapper(&self) -> Option<&dyn Mapper> {
        Some(self)
    }

    fn as_mapper_mut(&mut self) -> Option<&mut dyn Mapper> {
        Some(self)
    }
}

impl<S: RoutingStrategy> Mapper for MapperEngine<S> {
    fn capacity(&self) -> usize {
        self.strategy.capacity()
    }

    fn current_mapping(&self) -> CompileResult<Option<Mapping>> {
        self.mapping
            .as_ref()
            .map(|mapping| mapping.relabeled(|p| self.strategy.to_backend(p)))
            .transpose()
    }

    fn set_current_mapping(&mut self, mapping: Mapping) -> CompileResult<()> {
        let internal = mapping.relabeled(|backend| {
            self.strategy.from_backend(backend).ok_or_else(|| {
                CompileError::Configuration(format!(
                    "backend qubit {backend} is not part of the topology"
                ))
            })
        })?;
        if let Some(missing) = self
            .currently_allocated
            .iter()
            .find(|&&logical| !internal.contains(logical))
        {
            return Err(CompileError::Configuration(format!(
                "allocated qubit {missing} is missing from the new mapping"
            )));
        }
        self.mapping = Some(internal);
        Ok(())
    }

    fn stats(&self) -> &MapperStats {
        &self.stats
    }

    fn num_buffered(&self) -> usize {
        self.buffer.len()
    }
}

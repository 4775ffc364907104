//! Property tests: random circuits on every topology.
//!
//! For any circuit that fits the device, with or without qubits being
//! released and allocated mid-circuit and for any buffer capacity, after
//! `flush(true)`:
//! - every two-qubit command reaching the backend is on a coupling edge
//! - the mapper buffer is empty
//! - per logical qubit, the backend sees the same commands in the same order
//! - no more physical qubits are ever live than the device has

use proptest::prelude::*;
use rustc_hash::FxHashMap;

use qmap_compile::{
    CouplingMap, Engine, GraphMapper, GridMapper, LinearMapper, MainEngine, RecordingBackend,
};
use qmap_ir::{Command, GateKind, QubitId, StandardGate};

/// One circuit operation on logical qubit indices.
#[derive(Debug, Clone)]
enum Op {
    H(usize),
    Cx(usize, usize),
}

/// A circuit step that may change the set of live qubits.
#[derive(Debug, Clone)]
enum Step {
    Allocate,
    /// Release the live qubit at this index (modulo the live count).
    Deallocate(usize),
    Gate(Op),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<usize>().prop_map(Op::H),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Cx(a, b)),
    ]
}

fn ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op(), 0..max_len)
}

fn steps(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            1 => Just(Step::Allocate),
            1 => any::<usize>().prop_map(Step::Deallocate),
            3 => op().prop_map(Step::Gate),
        ],
        0..max_len,
    )
}

/// Build the command for `op` on the given live qubits.
fn command(op: &Op, live: &[QubitId]) -> Command {
    let n = live.len();
    match *op {
        Op::Cx(a, b) if a % n != b % n => {
            Command::gate(StandardGate::X, &[live[b % n]], &[live[a % n]])
        }
        Op::Cx(a, _) | Op::H(a) => Command::gate(StandardGate::H, &[live[a % n]], &[]),
    }
    .unwrap()
}

fn apply(engine: &mut MainEngine, cmd: &Command) {
    engine
        .apply_controlled(cmd.gate.clone(), cmd.controls(), &targets(cmd))
        .unwrap();
}

/// Run `ops` on `num_logical` qubits and return the issued commands.
fn run(engine: &mut MainEngine, num_logical: usize, ops: &[Op]) -> Vec<Command> {
    let q = engine.allocate_qureg(num_logical).unwrap();
    let mut issued = Vec::new();
    for op in ops {
        let cmd = command(op, &q);
        apply(engine, &cmd);
        issued.push(cmd);
    }
    engine.flush(true).unwrap();
    issued
}

/// Run `steps`, keeping between one and `capacity` qubits live. Returns
/// the issued gates and the number of qubit ids handed out.
fn run_with_churn(engine: &mut MainEngine, capacity: usize, steps: &[Step]) -> (Vec<Command>, usize) {
    let mut live = vec![engine.allocate_qubit().unwrap()];
    let mut num_issued = 1;
    let mut issued = Vec::new();
    for step in steps {
        match step {
            Step::Allocate if live.len() < capacity => {
                live.push(engine.allocate_qubit().unwrap());
                num_issued += 1;
            }
            Step::Deallocate(index) if live.len() > 1 => {
                let qubit = live.remove(index % live.len());
                engine.deallocate_qubit(qubit).unwrap();
            }
            Step::Gate(op) => {
                let cmd = command(op, &live);
                apply(engine, &cmd);
                issued.push(cmd);
            }
            Step::Allocate | Step::Deallocate(_) => {}
        }
    }
    engine.flush(true).unwrap();
    (issued, num_issued)
}

fn targets(cmd: &Command) -> Vec<QubitId> {
    cmd.qubits().iter().flatten().copied().collect()
}

/// Translate backend gates back to logical ids by replaying lifecycle and
/// swap commands.
fn logical_gates(backend: &RecordingBackend) -> Vec<Command> {
    let mut occupant: FxHashMap<QubitId, QubitId> = FxHashMap::default();
    let mut gates = Vec::new();
    for cmd in backend.received() {
        match cmd.gate {
            GateKind::Allocate => {
                if let (Some(physical), Some(logical)) = (cmd.first_target(), cmd.logical_qubit_id()) {
                    occupant.insert(physical, logical);
                }
            }
            GateKind::Deallocate => {
                if let Some(physical) = cmd.first_target() {
                    occupant.remove(&physical);
                }
            }
            GateKind::Swap => {
                let pair: Vec<QubitId> = cmd.all_qubits().collect();
                let first = occupant.remove(&pair[0]);
                let second = occupant.remove(&pair[1]);
                if let Some(logical) = first {
                    occupant.insert(pair[1], logical);
                }
                if let Some(logical) = second {
                    occupant.insert(pair[0], logical);
                }
            }
            GateKind::Flush => {}
            GateKind::Measure | GateKind::Standard(_) | GateKind::Custom(_) => {
                gates.push(cmd.map_qubits(|p| occupant.get(&p).copied().unwrap_or(QubitId(u32::MAX))));
            }
        }
    }
    gates
}

fn check_pipeline(
    engine: &MainEngine,
    issued: &[Command],
    num_logical: usize,
    capacity: usize,
    adjacent: impl Fn(u32, u32) -> bool,
) -> Result<(), TestCaseError> {
    let backend = engine.stage::<RecordingBackend>().unwrap();
    prop_assert_eq!(engine.mapper().unwrap().num_buffered(), 0);
    prop_assert!(backend.max_live() <= capacity);
    prop_assert!(backend.live_qubits().is_empty());

    for cmd in backend.gates() {
        if let [a, b] = cmd.all_qubits().collect::<Vec<_>>().as_slice() {
            prop_assert!(adjacent(a.0, b.0), "{} is not on a coupling edge", cmd);
        }
    }

    let realized = logical_gates(backend);
    for logical in (0..num_logical as u32).map(QubitId) {
        let touches = |cmd: &&Command| cmd.all_qubits().any(|q| q == logical);
        let expected: Vec<&Command> = issued.iter().filter(touches).collect();
        let actual: Vec<&Command> = realized.iter().filter(touches).collect();
        prop_assert_eq!(expected, actual, "order differs on {}", logical);
    }
    Ok(())
}

fn pipeline(mapper: impl Engine) -> MainEngine {
    MainEngine::builder()
        .with_stage(mapper)
        .with_backend(RecordingBackend::new())
        .build()
        .unwrap()
}

/// A random connected graph: a random spanning tree plus extra edges.
fn connected_graph() -> impl Strategy<Value = CouplingMap> {
    (2_u32..8).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<u32>(), (n - 1) as usize),
            prop::collection::vec((0..n, 0..n), 0..4),
        )
            .prop_map(move |(parents, extra)| {
                let tree = (1..n).zip(parents).map(|(child, seed)| (seed % child, child));
                let extra = extra.into_iter().filter(|(a, b)| a != b);
                CouplingMap::from_edges(n, tree.chain(extra).collect::<Vec<_>>()).unwrap()
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_linear_circuits_route(
        capacity in 2_usize..7,
        fill in 0.0_f64..1.0,
        cyclic in any::<bool>(),
        ops in ops(30),
    ) {
        let num_logical = 1 + ((capacity - 1) as f64 * fill) as usize;
        let mut engine = pipeline(LinearMapper::linear(capacity, cyclic).unwrap());
        let issued = run(&mut engine, num_logical, &ops);
        let n = capacity as u32;
        check_pipeline(&engine, &issued, num_logical, capacity, |a, b| {
            let diff = a.abs_diff(b);
            diff == 1 || (cyclic && n > 2 && diff == n - 1)
        })?;
    }

    #[test]
    fn prop_grid_circuits_route(
        rows in 1_usize..4,
        columns in 1_usize..4,
        fill in 0.0_f64..1.0,
        ops in ops(30),
    ) {
        let capacity = rows * columns;
        let num_logical = 1 + ((capacity - 1) as f64 * fill) as usize;
        let lattice = CouplingMap::grid(rows as u32, columns as u32);
        let mut engine = pipeline(GridMapper::grid(rows, columns).unwrap());
        let issued = run(&mut engine, num_logical, &ops);
        check_pipeline(&engine, &issued, num_logical, capacity, |a, b| lattice.is_connected(a, b))?;
    }

    #[test]
    fn prop_graph_circuits_route(
        coupling in connected_graph(),
        fill in 0.0_f64..1.0,
        ops in ops(30),
    ) {
        let capacity = coupling.num_qubits() as usize;
        let num_logical = 1 + ((capacity - 1) as f64 * fill) as usize;
        let mut engine = pipeline(GraphMapper::graph(coupling.clone()).unwrap());
        let issued = run(&mut engine, num_logical, &ops);
        check_pipeline(&engine, &issued, num_logical, capacity, |a, b| coupling.is_connected(a, b))?;
    }

    #[test]
    fn prop_linear_churn_with_small_buffer(
        capacity in 2_usize..6,
        cyclic in any::<bool>(),
        buffer_capacity in 1_usize..6,
        steps in steps(40),
    ) {
        let mapper = LinearMapper::linear(capacity, cyclic)
            .unwrap()
            .with_buffer_capacity(buffer_capacity)
            .unwrap();
        let mut engine = pipeline(mapper);
        let (issued, num_issued) = run_with_churn(&mut engine, capacity, &steps);
        let n = capacity as u32;
        check_pipeline(&engine, &issued, num_issued, capacity, |a, b| {
            let diff = a.abs_diff(b);
            diff == 1 || (cyclic && n > 2 && diff == n - 1)
        })?;
    }

    #[test]
    fn prop_grid_churn_with_small_buffer(
        rows in 1_usize..4,
        columns in 1_usize..4,
        buffer_capacity in 1_usize..6,
        steps in steps(40),
    ) {
        let capacity = rows * columns;
        let lattice = CouplingMap::grid(rows as u32, columns as u32);
        let mapper = GridMapper::grid(rows, columns)
            .unwrap()
            .with_buffer_capacity(buffer_capacity)
            .unwrap();
        let mut engine = pipeline(mapper);
        let (issued, num_issued) = run_with_churn(&mut engine, capacity, &steps);
        check_pipeline(&engine, &issued, num_issued, capacity, |a, b| lattice.is_connected(a, b))?;
    }

    #[test]
    fn prop_graph_churn_with_small_buffer(
        coupling in connected_graph(),
        buffer_capacity in 1_usize..6,
        steps in steps(40),
    ) {
        let capacity = coupling.num_qubits() as usize;
        let mapper = GraphMapper::graph(coupling.clone())
            .unwrap()
            .with_buffer_capacity(buffer_capacity)
            .unwrap();
        let mut engine = pipeline(mapper);
        let (issued, num_issued) = run_with_churn(&mut engine, capacity, &steps);
        check_pipeline(&engine, &issued, num_issued, capacity, |a, b| coupling.is_connected(a, b))?;
    }
}

//! qmap engine pipeline and topology-aware mappers
//!
//! This crate turns a stream of commands on logical qubits into a stream
//! that only performs two-qubit interactions between physically coupled
//! qubits, inserting SWAP operations where needed.
//!
//! # Overview
//!
//! A compiler is a chain of [`Engine`] stages rooted at a [`MainEngine`]:
//! 1. **Root**: issues qubit ids, checks qubit lifecycles, keeps results
//! 2. **Mapper**: buffers commands and remaps qubits onto the topology
//! 3. **Backend**: executes (or here, records) the mapped commands
//!
//! # Architecture
//!
//! ```text
//! MainEngine ── allocate / apply / measure / flush
//!       │
//!       ▼
//! ┌──────────────────────┐
//! │ MapperEngine<S>      │ ◄── MapperConfig (buffer capacity, steps)
//! │   buffer → drain     │
//! │   plan → swap batch  │
//! └──────────────────────┘
//!       │   S = LinearChain / GridLattice / GraphRouting
//!       ▼
//! Backend (physical ids, LogicalQubitId tags on lifecycle + Measure)
//! ```
//!
//! # Example: Routing on a Chain
//!
//! ```rust
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
//! engine.apply_controlled(StandardGate::X, &[q[0]], &[q[1]]).unwrap();
//! engine.apply_controlled(StandardGate::X, &[q[1]], &[q[2]]).unwrap();
//! engine.apply_controlled(StandardGate::X, &[q[0]], &[q[2]]).unwrap();
//! engine.flush(true).unwrap();
//!
//! let backend = engine.stage::<RecordingBackend>().unwrap();
//! assert_eq!(backend.swaps().count(), 1);
//! ```
//!
//! # Logging
//!
//! Stages log through [`tracing`]: `info!` per flush and per remap, `debug!`
//! per forwarded batch. The library never installs a subscriber.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod main_engine;
pub mod mapper;
pub mod mapping;
pub mod stats;
pub mod topology;

pub use backend::RecordingBackend;
pub use config::{MapperConfig, MapperSetup, TopologyConfig, build_mapper};
pub use engine::{AsAny, Downstream, Engine, MeasurementResults, Upcoming};
pub use error::{CompileError, CompileResult};
pub use main_engine::{MainEngine, MainEngineBuilder};
pub use mapper::{
    GraphMapper, GraphRouting, GridLattice, GridMapper, LinearChain, LinearMapper, Mapper,
    MapperEngine, Placement, Plan, RoutingStrategy, SegmentBuilder, SwapCost, lowest_free_node,
    odd_even_transposition_swaps, place_on_chain,
};
pub use mapping::Mapping;
pub use stats::{MapperStats, swap_depth};
pub use topology::CouplingMap;

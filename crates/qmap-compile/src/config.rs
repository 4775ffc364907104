//! Mapper configuration, loadable from JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::Engine;
use crate::error::{CompileError, CompileResult};
use crate::mapper::{GraphMapper, GridMapper, LinearMapper};
use crate::topology::CouplingMap;

/// Tuning knobs shared by every mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Buffered commands that trigger a remap cycle without a flush.
    pub buffer_capacity: usize,
    /// Matching orderings the grid mapper may try per remap.
    pub num_optimization_steps: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            num_optimization_steps: 50,
        }
    }
}

impl MapperConfig {
    /// Set the buffer capacity.
    #[must_use]
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Set the optimization step budget.
    #[must_use]
    pub fn with_num_optimization_steps(mut self, steps: usize) -> Self {
        self.num_optimization_steps = steps;
        self
    }

    /// Reject values no mapper can run with.
    pub fn validate(&self) -> CompileResult<()> {
        if self.buffer_capacity == 0 {
            return Err(CompileError::Configuration(
                "buffer_capacity must be at least 1".into(),
            ));
        }
        if self.num_optimization_steps == 0 {
            return Err(CompileError::Configuration(
                "num_optimization_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Shape of the target device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    /// A chain of qubits, optionally closed into a ring.
    Linear {
        /// Number of physical qubits.
        num_qubits: usize,
        /// Whether the last qubit is coupled to the first.
        #[serde(default)]
        cyclic: bool,
    },
    /// A rectangular grid with nearest-neighbour coupling.
    Grid {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        columns: usize,
        /// Row-major position → backend qubit id.
        #[serde(default)]
        relabel: Option<BTreeMap<u32, u32>>,
    },
    /// An arbitrary connected coupling graph.
    Graph {
        /// Number of physical qubits.
        num_qubits: u32,
        /// Coupled pairs.
        edges: Vec<(u32, u32)>,
    },
}

/// A complete mapper description.
///
/// ```
/// use qmap_compile::MapperSetup;
///
/// let setup = MapperSetup::from_json(
///     r#"{ "topology": { "kind": "linear", "num_qubits": 4, "cyclic": true } }"#,
/// )
/// .unwrap();
/// assert_eq!(setup.mapper.buffer_capacity, 1000);
/// let mapper = setup.build().unwrap();
/// assert_eq!(mapper.name(), "LinearMapper");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperSetup {
    /// Target device shape.
    pub topology: TopologyConfig,
    /// Mapper tuning.
    #[serde(default)]
    pub mapper: MapperConfig,
}

impl MapperSetup {
    /// Parse a setup from JSON.
    pub fn from_json(json: &str) -> CompileResult<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::Configuration(e.to_string()))
    }

    /// Build the described mapper stage.
    pub fn build(&self) -> CompileResult<Box<dyn Engine>> {
        build_mapper(&self.topology, self.mapper)
    }
}

/// Build a mapper stage for a topology.
pub fn build_mapper(topology: &TopologyConfig, config: MapperConfig) -> CompileResult<Box<dyn Engine>> {
    let engine: Box<dyn Engine> = match topology {
        TopologyConfig::Linear { num_qubits, cyclic } => {
            Box::new(LinearMapper::linear(*num_qubits, *cyclic)?.with_config(config)?)
        }
        TopologyConfig::Grid {
            rows,
            columns,
            relabel,
        } => {
            let mapper = match relabel {
                Some(relabel) => GridMapper::grid_with_relabel(*rows, *columns, relabel)?,
                None => GridMapper::grid(*rows, *columns)?,
            };
            Box::new(mapper.with_config(config)?)
        }
        TopologyConfig::Graph { num_qubits, edges } => {
            let coupling = CouplingMap::from_edges(*num_qubits, edges.iter().copied())?;
            Box::new(GraphMapper::graph(coupling)?.with_config(config)?)
        }
    };
    Ok(engine)
}

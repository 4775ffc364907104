//! Per-mapper diagnostics.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counters collected by one mapper instance.
///
/// Only remap cycles that emitted at least one swap are counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperStats {
    /// Number of remap cycles that moved qubits.
    pub num_mappings: usize,
    /// Histogram: swap-network depth → number of cycles.
    pub depth_of_swaps: BTreeMap<usize, usize>,
    /// Histogram: swap count → number of cycles.
    pub num_of_swaps_per_mapping: BTreeMap<usize, usize>,
}

impl MapperStats {
    /// Record the swaps emitted by one remap cycle.
    pub fn record(&mut self, swaps: &[(u32, u32)]) {
        if swaps.is_empty() {
            return;
        }
        self.num_mappings += 1;
        *self.depth_of_swaps.entry(swap_depth(swaps)).or_default() += 1;
        *self.num_of_swaps_per_mapping.entry(swaps.len()).or_default() += 1;
    }

    /// Total number of swaps emitted.
    pub fn total_swaps(&self) -> usize {
        self.num_of_swaps_per_mapping
            .iter()
            .map(|(swaps, cycles)| swaps * cycles)
            .sum()
    }
}

impl fmt::Display for MapperStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of mappings: {}", self.num_mappings)?;
        writeln!(f, "Depth of swaps:")?;
        for (depth, count) in &self.depth_of_swaps {
            writeln!(f, "  {depth:>3}: {count}")?;
        }
        writeln!(f, "Number of swaps per mapping:")?;
        for (swaps, count) in &self.num_of_swaps_per_mapping {
            writeln!(f, "  {swaps:>3}: {count}")?;
        }
        Ok(())
    }
}

/// Depth of a swap list when swaps on disjoint qubits run in parallel.
pub fn swap_depth(swaps: &[(u32, u32)]) -> usize {
    let mut depth: FxHashMap<u32, usize> = FxHashMap::default();
    let mut max_depth = 0;
    for &(a, b) in swaps {
        let layer = depth
            .get(&a)
            .copied()
            .unwrap_or(0)
            .max(depth.get(&b).copied().unwrap_or(0))
            + 1;
        depth.insert(a, layer);
        depth.insert(b, layer);
        max_depth = max_depth.max(layer);
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_depth() {
        assert_eq!(swap_depth(&[]), 0);
        assert_eq!(swap_depth(&[(0, 1), (2, 3)]), 1);
        assert_eq!(swap_depth(&[(0, 1), (1, 2), (2, 3)]), 3);
        assert_eq!(swap_depth(&[(0, 1), (2, 3), (1, 2)]), 2);
    }

    #[test]
    fn test_record_skips_empty_cycles() {
        let mut stats = MapperStats::default();
        stats.record(&[]);
        assert_eq!(stats.num_mappings, 0);

        stats.record(&[(0, 1), (2, 3)]);
        stats.record(&[(1, 2)]);
        assert_eq!(stats.num_mappings, 2);
        assert_eq!(stats.depth_of_swaps.get(&1), Some(&2));
        assert_eq!(stats.num_of_swaps_per_mapping.get(&2), Some(&1));
        assert_eq!(stats.total_swaps(), 3);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = MapperStats::default();
        stats.record(&[(0, 1)]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["num_mappings"], 1);
        assert!(stats.to_string().starts_with("Number of mappings: 1"));
    }
}

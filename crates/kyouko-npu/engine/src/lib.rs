// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Kyouko Processing Engine
//!
//! Per-cycle algorithms over one segment:
//! - **Forward** ([`forward`]): neuron state machine and chain propagation
//!   with lazy synapse growth
//! - **Backward** ([`backward`]): delta propagation and weight descent
//! - **Pruning** ([`pruning`]): decay and release of unused synapses
//!
//! The engine is single-threaded per segment and never blocks. Parallelism
//! comes from processing different segments on different workers.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backward;
pub mod forward;
pub mod pruning;
pub mod random_pool;
pub mod stats;

use std::sync::Arc;

use kyouko_npu_segment::SegmentBuffer;
use serde::{Deserialize, Serialize};

pub use backward::{output_error, process_segment_backward};
pub use forward::{
    process_segment_forward, CHAIN_CONTINUE_THRESHOLD, INITIAL_WEIGHT_SCALE, MIN_BORDER_SHARE,
};
pub use pruning::reduce_segment;
pub use random_pool::{RandomValuePool, DEFAULT_RANDOM_POOL_SIZE};
pub use stats::CycleStats;

/// Engine-wide parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub random_pool_size: usize,
    pub random_seed: u64,
    /// Run a pruning pass every N forward cycles (0 disables pruning)
    pub pruning_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            random_pool_size: DEFAULT_RANDOM_POOL_SIZE,
            random_seed: 0,
            pruning_interval: 100,
        }
    }
}

/// Shared, stateless entry point for segment processing
///
/// Cheap to clone; all clones share one random value pool.
#[derive(Debug, Clone)]
pub struct ProcessingEngine {
    config: EngineConfig,
    pool: Arc<RandomValuePool>,
}

impl ProcessingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pool: Arc::new(RandomValuePool::new(config.random_pool_size, config.random_seed)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &RandomValuePool {
        &self.pool
    }

    /// Forward cycle number `cycle`, pruning afterwards when it is due
    pub fn forward(&self, segment: &mut SegmentBuffer, cycle: u64) -> CycleStats {
        let mut stats = process_segment_forward(segment, &self.pool);
        if self.pruning_due(cycle) {
            stats += reduce_segment(segment);
        }
        stats
    }

    pub fn backward(&self, segment: &mut SegmentBuffer, expected: Option<&[f32]>) -> CycleStats {
        process_segment_backward(segment, expected)
    }

    fn pruning_due(&self, cycle: u64) -> bool {
        self.config.pruning_interval > 0 && cycle > 0 && cycle % self.config.pruning_interval == 0
    }
}

impl Default for ProcessingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pruning_schedule() {
        let engine = ProcessingEngine::new(EngineConfig {
            pruning_interval: 3,
            random_pool_size: 16,
            random_seed: 0,
        });
        let due: Vec<u64> = (0..10).filter(|&c| engine.pruning_due(c)).collect();
        assert_eq!(due, vec![3, 6, 9]);

        let disabled = ProcessingEngine::new(EngineConfig {
            pruning_interval: 0,
            ..EngineConfig::default()
        });
        assert!(!(0..10).any(|c| disabled.pruning_due(c)));
    }
}

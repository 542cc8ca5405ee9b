// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Kyouko - Segment-Based Spiking Network Engine
//!
//! Kyouko stores a spiking network as segments: fixed static regions for
//! neurons, bricks and border buffers plus a growable arena of synapse
//! sections. Synapses are created lazily while activity flows along a
//! neuron's chain and pruned again when they stop being used.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! kyouko = "0.3"  # Default: cluster + observability
//! ```
//!
//! ## Feature Flags
//!
//! - **`cluster`** (default): task queue, cycle scheduler, worker pool
//! - **`observability`** (default): logging initialisation and debug flags
//! - **`file-logging`**: per-run JSON log files
//!
//! ## Usage Examples
//!
//! ### One segment, driven directly
//!
//! ```rust,no_run
//! use kyouko::prelude::*;
//!
//! let descriptor = SegmentDescriptor::new(vec![
//!     BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
//!     BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 8),
//!     BrickDescriptor::new(BrickType::Output, [2, 0, 0], 2),
//! ]);
//! let mut segment = init_segment(&descriptor, 42)?;
//! let engine = ProcessingEngine::default();
//!
//! segment.write_inputs(&[1.0; 4])?;
//! let stats = engine.forward(&mut segment, 1);
//! println!("{} neurons fired", stats.neurons_fired);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### A configured cluster
//!
//! ```rust,no_run
//! use kyouko::prelude::*;
//!
//! let config = load_config(None, None)?;
//! let descriptor = kyouko::segment_descriptor(&config, vec![
//!     BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
//!     BrickDescriptor::new(BrickType::Output, [1, 0, 0], 2),
//! ]);
//! let mut cluster = Cluster::new(&[descriptor], &[], ClusterConfig::from(&config))?;
//! cluster.start_workers()?;
//! let outputs = cluster.request(vec![1.0; 4], 4, 1, None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: kyouko-config                              │
//! │  (TOML + environment + CLI overrides)                   │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Memory: kyouko-npu-segment                             │
//! │  (region layout, synapse-section arena, bricks)         │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Algorithms: kyouko-npu-engine                          │
//! │  (forward, backward, pruning)                           │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Scheduling: kyouko-cluster                             │
//! │  (tasks, cycle barrier, border exchange, workers)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

pub use kyouko_config as config;
pub use kyouko_npu_engine as engine;
pub use kyouko_npu_segment as segment;

#[cfg(feature = "cluster")]
pub use kyouko_cluster as cluster;

#[cfg(feature = "observability")]
pub use kyouko_observability as observability;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Segment descriptor whose settings come from the `[segment]` section
pub fn segment_descriptor(
    config: &config::KyoukoConfig,
    bricks: Vec<segment::BrickDescriptor>,
) -> segment::SegmentDescriptor {
    let defaults = &config.segment;
    segment::SegmentDescriptor::new(bricks).with_settings(segment::SettingsDescriptor {
        max_synapse_sections: defaults.max_synapse_sections,
        cool_down: defaults.cool_down,
        potential_overflow: defaults.potential_overflow,
        sign_neg: defaults.sign_neg,
        synapse_segmentation: defaults.synapse_segmentation,
        learn_rate: defaults.learn_rate,
        neuron_border: defaults.neuron_border,
        refraction_time: defaults.refraction_time,
        max_active_counter: defaults.max_active_counter,
        min_active_counter: defaults.min_active_counter,
        do_learn: defaults.do_learn,
    })
}

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::config::{load_config, validate_config, KyoukoConfig};
    pub use crate::engine::{CycleStats, EngineConfig, ProcessingEngine, RandomValuePool};
    pub use crate::segment::{
        init_segment, BrickDescriptor, BrickType, SectionId, SegmentBuffer, SegmentDescriptor,
        SegmentError, SettingsDescriptor,
    };

    #[cfg(feature = "cluster")]
    pub use crate::cluster::{
        Cluster, ClusterConfig, ClusterError, ClusterMode, SegmentLink, TaskId, TaskProgress,
        TaskResult, TaskState,
    };

    #[cfg(feature = "observability")]
    pub use crate::observability::{init_logging, parse_debug_flags, CrateDebugFlags};
}

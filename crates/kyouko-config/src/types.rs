// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `kyouko_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KyoukoConfig {
    pub system: SystemConfig,
    pub cluster: ClusterSection,
    pub engine: EngineSection,
    pub segment: SegmentDefaults,
    pub snapshot: SnapshotSection,
}

/// System-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    pub data_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Cluster scheduling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Worker threads pulling ready segments (0 = auto-detect)
    pub worker_threads: usize,
    /// Error bound above which a learn cycle runs a backward pass
    pub max_output_error: f32,
    /// Timeout of a synchronous request in milliseconds
    pub request_timeout_ms: u64,
    /// Idle wait of a worker on an empty ready queue
    pub poll_interval_ms: u64,
    /// Finished tasks kept for result retrieval before the oldest is dropped
    pub finished_task_retention: usize,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_output_error: 0.1,
            request_timeout_ms: 10_000,
            poll_interval_ms: 10,
            finished_task_retention: 1024,
        }
    }
}

/// Processing engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub random_pool_size: usize,
    pub random_seed: u64,
    /// Pruning pass every N forward cycles (0 = never)
    pub pruning_interval: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            random_pool_size: 1 << 16,
            random_seed: 0,
            pruning_interval: 100,
        }
    }
}

/// Defaults for segment settings not given by a descriptor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SegmentDefaults {
    pub max_synapse_sections: u64,
    pub cool_down: f32,
    pub potential_overflow: f32,
    pub sign_neg: f32,
    pub synapse_segmentation: f32,
    pub learn_rate: f32,
    pub neuron_border: f32,
    pub refraction_time: u32,
    pub max_active_counter: u32,
    pub min_active_counter: u32,
    pub do_learn: bool,
}

impl Default for SegmentDefaults {
    fn default() -> Self {
        Self {
            max_synapse_sections: 100_000,
            cool_down: 100.0,
            potential_overflow: 1.0,
            sign_neg: 0.5,
            synapse_segmentation: 10.0,
            learn_rate: 0.1,
            neuron_border: 0.5,
            refraction_time: 1,
            max_active_counter: 100,
            min_active_counter: 1,
            do_learn: true,
        }
    }
}

/// Snapshot transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotSection {
    /// Payload bytes per snapshot frame
    pub frame_size: usize,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            frame_size: 128 * 1024,
        }
    }
}

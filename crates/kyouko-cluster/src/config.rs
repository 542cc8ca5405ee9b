// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Runtime cluster configuration, derived from [`KyoukoConfig`]

use std::time::Duration;

use kyouko_config::KyoukoConfig;
use kyouko_npu_engine::EngineConfig;
use kyouko_npu_segment::DEFAULT_FRAME_SIZE;

use crate::task_queue::DEFAULT_FINISHED_RETENTION;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Threads started by `Cluster::start_workers` (0 = available parallelism)
    pub worker_threads: usize,
    pub max_output_error: f32,
    pub request_timeout: Duration,
    /// Idle wait of a worker on an empty ready queue
    pub poll_interval: Duration,
    pub snapshot_frame_size: usize,
    /// Uncollected finished tasks kept before the oldest is dropped
    pub finished_task_retention: usize,
    pub engine: EngineConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_output_error: 0.1,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            snapshot_frame_size: DEFAULT_FRAME_SIZE,
            finished_task_retention: DEFAULT_FINISHED_RETENTION,
            engine: EngineConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Effective worker count
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

impl From<&KyoukoConfig> for ClusterConfig {
    fn from(config: &KyoukoConfig) -> Self {
        Self {
            worker_threads: config.cluster.worker_threads,
            max_output_error: config.cluster.max_output_error,
            request_timeout: Duration::from_millis(config.cluster.request_timeout_ms),
            poll_interval: Duration::from_millis(config.cluster.poll_interval_ms),
            snapshot_frame_size: config.snapshot.frame_size,
            finished_task_retention: config.cluster.finished_task_retention,
            engine: EngineConfig {
                random_pool_size: config.engine.random_pool_size,
                random_seed: config.engine.random_seed,
                pruning_interval: config.engine.pruning_interval,
            },
        }
    }
}

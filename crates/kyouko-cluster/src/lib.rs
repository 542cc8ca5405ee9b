// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Kyouko Cluster
//!
//! Runs tasks over an ordered set of segments:
//! - **Task queue** ([`task_queue`]): learn, request and snapshot tasks, one
//!   active at a time
//! - **Scheduler** ([`scheduler`]): `NORMAL` / `LEARN_FORWARD` /
//!   `LEARN_BACKWARD` phases separated by a cycle barrier
//! - **Border exchange** ([`border`]): the only data shared between segments
//! - **Worker pool** ([`worker_pool`]): threads processing ready segments
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kyouko_cluster::{Cluster, ClusterConfig};
//! use kyouko_npu_segment::{BrickDescriptor, BrickType, SegmentDescriptor};
//!
//! let segment = SegmentDescriptor::new(vec![
//!     BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
//!     BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 16),
//!     BrickDescriptor::new(BrickType::Output, [2, 0, 0], 2),
//! ]);
//! let cluster = Cluster::new(&[segment], &[], ClusterConfig::default()).unwrap();
//! let outputs = cluster.request(vec![1.0; 4], 4, 1, None).unwrap();
//! assert_eq!(outputs.len(), 2);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod border;
pub mod cluster;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod task_queue;
pub mod worker_pool;

pub use border::{BorderExchange, LinkRoute};
pub use cluster::{Cluster, SegmentLink};
pub use config::ClusterConfig;
pub use error::{ClusterError, Result};
pub use scheduler::CycleBarrier;
pub use state::{ClusterMode, PassDirection};
pub use task::{SegmentSnapshot, Task, TaskId, TaskProgress, TaskResult, TaskState, TaskType};
pub use task_queue::TaskQueue;
pub use worker_pool::WorkerPool;

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cluster error types

use std::time::Duration;

use kyouko_npu_segment::SegmentError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    #[error("Invalid task input: {0}")]
    InvalidTaskInput(String),

    #[error("Task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Task {0} was aborted")]
    TaskAborted(Uuid),

    #[error("Cluster needs at least one segment")]
    NoSegments,

    #[error("Invalid segment link: {0}")]
    InvalidLink(String),

    #[error("Cluster is busy: {0}")]
    Busy(String),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

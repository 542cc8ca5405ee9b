// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for segment operations

use super::ids::SectionId;

/// Errors surfaced by the segment memory engine
///
/// Allocation exhaustion is deliberately absent: `reserve()` reports it as
/// `None` so the processing engine can skip synapse growth for the cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentError {
    #[error("Invalid segment descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Unknown brick type: {0}")]
    UnknownBrickType(String),

    #[error("Invalid synapse section id {id}: item count is {item_count}")]
    InvalidSectionId { id: SectionId, item_count: u64 },

    #[error("Synapse section {0} is already deleted")]
    SectionAlreadyDeleted(SectionId),

    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("Region layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Snapshot stream is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for SegmentError {
    fn from(err: bincode::Error) -> Self {
        SegmentError::Serialization(err.to_string())
    }
}

/// Result type for segment operations
pub type Result<T> = core::result::Result<T, SegmentError>;

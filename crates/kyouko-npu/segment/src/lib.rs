// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Kyouko Segment Memory Engine
//!
//! One segment is a sub-network of neurons grouped into spatial bricks,
//! stored in two regions:
//! - **Static region**: header, settings, border slots, input/output transfer
//!   buffers, brick table, brick order and neuron table at offsets computed by
//!   the [`layout`] builder
//! - **Synapse-section arena**: growable item buffer with tombstone free list
//!   ([`arena`])
//!
//! All records are `#[repr(C)]` `Pod` types ([`records`]), so the buffers are
//! exactly what a device kernel would map.
//!
//! ## Modules
//! - [`layout`]: region layout builder and header verification
//! - [`buffer`]: owned segment buffer and typed views
//! - [`arena`]: synapse-section allocator
//! - [`connectivity`]: 12-side brick grid and target-brick sampling
//! - [`descriptor`] / [`init`]: building a segment from a description
//! - [`snapshot`]: byte stream and transport frames

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod arena;
pub mod buffer;
pub mod connectivity;
pub mod descriptor;
pub mod init;
pub mod layout;
pub mod records;
pub mod snapshot;
pub mod types;

pub use arena::{ArenaState, Slot, SynapseSectionArena, ARENA_BLOCK_SIZE};
pub use buffer::{RegionHandle, SegmentBuffer, SegmentViewsMut};
pub use connectivity::{link_neighbors, neighbor_position, opposite_side, sample_target_bricks};
pub use descriptor::{BrickDescriptor, BrickType, SegmentDescriptor, SettingsDescriptor};
pub use init::init_segment;
pub use layout::{build_header, verify_header, SegmentCounts, StaticRegion};
pub use records::{
    Brick, Neuron, Position, SegmentHeader, SegmentSettings, SegmentSlot, Synapse, SynapseSection,
    NUMBER_OF_POSSIBLE_TARGETS, NUMBER_OF_SIDES, SEGMENT_SLOT_COUNT, SYNAPSES_PER_SECTION,
};
pub use snapshot::{SnapshotAssembler, SnapshotFrame, SnapshotWriter, DEFAULT_FRAME_SIZE};
pub use types::{
    BrickId, NeuronId, Result, SectionId, SegmentError, UNINIT_STATE_32, UNINIT_STATE_64,
};

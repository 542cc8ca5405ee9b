// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-buffer record layouts
//!
//! Every record here is `#[repr(C)]` and `Pod`: the segment buffer is a plain
//! byte arena and these structs are views onto it. The layout is the one a
//! device kernel receives, so field order and sizes are part of the format.
//! Sizes are pinned by the compile-time assertions at the bottom of the file.

use bytemuck::{Pod, Zeroable};

use crate::types::{BrickId, NeuronId, SectionId, UNINIT_STATE_32, UNINIT_STATE_64};

/// Bytes reserved for the segment header; settings always start here
pub const HEADER_SLOT_SIZE: usize = 256;

/// Number of directional neighbours of a brick
pub const NUMBER_OF_SIDES: usize = 12;

/// Size of the cached target-brick sample list of every brick
pub const NUMBER_OF_POSSIBLE_TARGETS: usize = 1000;

/// Fixed synapse capacity of one synapse section
pub const SYNAPSES_PER_SECTION: usize = 30;

/// Number of border slots every segment carries
pub const SEGMENT_SLOT_COUNT: usize = 16;

/// Segment type tag written into the header
pub const DYNAMIC_SEGMENT: u32 = 1;

/// Current on-buffer format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Section status: slot holds a live section
pub const SECTION_ACTIVE: u8 = 1;

/// Section status: slot is a tombstone linked into the free list
pub const SECTION_DELETED: u8 = 2;

/// Slot direction: the slot receives data from an upstream segment
pub const SLOT_DIRECTION_INPUT: u8 = 0;

/// Slot direction: the slot sends data to a downstream segment
pub const SLOT_DIRECTION_OUTPUT: u8 = 1;

/// 3D grid position
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl From<[i32; 3]> for Position {
    fn from(value: [i32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

/// `{count, byte offset}` pair describing one sub-region
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RegionDescriptor {
    pub count: u64,
    pub byte_pos: u64,
}

/// Fixed record at byte 0 of the static region
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SegmentHeader {
    pub segment_type: u32,
    pub version: u32,
    pub position: Position,
    pub _padding: u32,
    /// Total size of the static region (header slot included)
    pub static_data_size: u64,

    pub settings: RegionDescriptor,
    pub slot_list: RegionDescriptor,
    pub input_transfers: RegionDescriptor,
    pub output_transfers: RegionDescriptor,
    pub bricks: RegionDescriptor,
    pub brick_order: RegionDescriptor,
    pub neurons: RegionDescriptor,
    /// Lives in the separate item buffer: `count` is the capacity in items,
    /// `byte_pos` is always 0
    pub synapse_sections: RegionDescriptor,
}

/// Global per-segment processing settings
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SegmentSettings {
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
    pub do_learn: u32,
}

impl Default for SegmentSettings {
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
            do_learn: 1,
        }
    }
}

/// Border slot connecting this segment to a neighbouring one
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SegmentSlot {
    pub target_segment_id: u32,
    pub target_slot_id: u32,
    pub number_of_items: u32,
    pub in_use: u8,
    pub input_ready: u8,
    pub direction: u8,
    pub _padding: u8,
}

impl SegmentSlot {
    pub const fn unused() -> Self {
        Self {
            target_segment_id: UNINIT_STATE_32,
            target_slot_id: UNINIT_STATE_32,
            number_of_items: 0,
            in_use: 0,
            input_ready: 0,
            direction: SLOT_DIRECTION_INPUT,
            _padding: 0,
        }
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn is_input_ready(&self) -> bool {
        self.input_ready != 0
    }

    #[inline]
    pub fn is_input_direction(&self) -> bool {
        self.direction == SLOT_DIRECTION_INPUT
    }
}

/// Spatial group of neurons with its neighbour links and sampled targets
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Brick {
    pub brick_id: u32,
    pub is_input_brick: u8,
    pub is_output_brick: u8,
    pub _padding: [u8; 2],
    pub position: Position,
    pub neuron_pos: u32,
    pub number_of_neurons: u32,
    pub neighbors: [u32; NUMBER_OF_SIDES],
    /// Valid entries in `possible_target_brick_ids` (0 for output bricks)
    pub number_of_targets: u32,
    pub possible_target_brick_ids: [u32; NUMBER_OF_POSSIBLE_TARGETS],
}

impl Brick {
    pub fn new(brick_id: BrickId, position: Position) -> Self {
        let mut brick: Brick = Zeroable::zeroed();
        brick.brick_id = brick_id.0;
        brick.position = position;
        brick.neighbors = [UNINIT_STATE_32; NUMBER_OF_SIDES];
        brick.possible_target_brick_ids = [UNINIT_STATE_32; NUMBER_OF_POSSIBLE_TARGETS];
        brick
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        self.is_input_brick != 0
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.is_output_brick != 0
    }

    #[inline]
    pub fn neighbor(&self, side: usize) -> Option<BrickId> {
        BrickId::from_raw(self.neighbors[side])
    }

    /// Neuron ids owned by this brick
    pub fn neuron_range(&self) -> core::ops::Range<u32> {
        self.neuron_pos..self.neuron_pos + self.number_of_neurons
    }
}

/// One neuron of the neuron table
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Neuron {
    pub potential: f32,
    pub border: f32,
    pub input: f32,
    pub delta: f32,
    pub target_section_id: u32,
    pub target_border_id: u32,
    pub brick_id: u32,
    pub refraction_counter: u16,
    pub active: u8,
    pub _padding: u8,
}

impl Neuron {
    pub fn new(brick_id: BrickId, border: f32) -> Self {
        Self {
            border,
            target_section_id: UNINIT_STATE_32,
            target_border_id: UNINIT_STATE_32,
            brick_id: brick_id.0,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    #[inline]
    pub fn target_section(&self) -> Option<SectionId> {
        SectionId::from_raw(self.target_section_id)
    }
}

/// One synapse inside a section
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Synapse {
    pub weight: f32,
    /// Share of the weight budget this synapse consumes on every traversal
    pub border: f32,
    /// 0.0 (fully plastic) .. 1.0 (frozen)
    pub hardening: f32,
    pub target_neuron_id: u32,
    pub active_counter: u16,
    pub _padding: [u8; 2],
}

impl Default for Synapse {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Synapse {
    pub const EMPTY: Synapse = Synapse {
        weight: 0.0,
        border: 0.0,
        hardening: 0.0,
        target_neuron_id: UNINIT_STATE_32,
        active_counter: 0,
        _padding: [0; 2],
    };

    #[inline]
    pub fn target(&self) -> Option<NeuronId> {
        NeuronId::from_raw(self.target_neuron_id)
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.target_neuron_id != UNINIT_STATE_32
    }
}

/// Fixed-capacity block of synapses, chained through `next`
///
/// For a live section `next` holds the id of the continuation section. For a
/// tombstone it holds the byte offset of the next free slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SynapseSection {
    pub status: u8,
    pub active: u8,
    pub _padding: [u8; 2],
    /// Cursor into the random value pool
    pub random_pos: u32,
    pub next: u64,
    pub synapses: [Synapse; SYNAPSES_PER_SECTION],
}

impl Default for SynapseSection {
    fn default() -> Self {
        Self::new()
    }
}

impl SynapseSection {
    pub const fn new() -> Self {
        Self {
            status: SECTION_ACTIVE,
            active: 1,
            _padding: [0; 2],
            random_pos: 0,
            next: UNINIT_STATE_64,
            synapses: [Synapse::EMPTY; SYNAPSES_PER_SECTION],
        }
    }

    /// Tombstone written over a deleted slot
    pub const fn tombstone() -> Self {
        Self {
            status: SECTION_DELETED,
            active: 0,
            _padding: [0; 2],
            random_pos: 0,
            next: UNINIT_STATE_64,
            synapses: [Synapse::EMPTY; SYNAPSES_PER_SECTION],
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.status == SECTION_DELETED
    }

    #[inline]
    pub fn next_section(&self) -> Option<SectionId> {
        if self.next == UNINIT_STATE_64 {
            None
        } else {
            Some(SectionId(self.next as u32))
        }
    }

    #[inline]
    pub fn set_next_section(&mut self, next: Option<SectionId>) {
        self.next = next.map_or(UNINIT_STATE_64, |id| id.0 as u64);
    }

    pub fn live_synapses(&self) -> usize {
        self.synapses.iter().filter(|s| s.is_live()).count()
    }
}

const _: () = assert!(core::mem::size_of::<SegmentHeader>() <= HEADER_SLOT_SIZE);
const _: () = assert!(core::mem::size_of::<SegmentHeader>() == 160);
const _: () = assert!(core::mem::size_of::<SegmentSettings>() == 48);
const _: () = assert!(core::mem::size_of::<SegmentSlot>() == 16);
const _: () = assert!(core::mem::size_of::<Brick>() == 4080);
const _: () = assert!(core::mem::size_of::<Neuron>() == 32);
const _: () = assert!(core::mem::size_of::<Synapse>() == 20);
const _: () = assert!(core::mem::size_of::<SynapseSection>() == 616);

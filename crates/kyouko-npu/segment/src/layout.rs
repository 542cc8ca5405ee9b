// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Region Layout Builder
//!
//! Computes the byte offsets of every sub-region of a segment from a handful
//! of counts. The static region is laid out as:
//!
//! ```text
//! 0      256                                                          static_data_size
//! ┌──────┬──────────┬───────┬──────────┬───────────┬────────┬─────────────┬─────────┐
//! │header│ settings │ slots │ input tx │ output tx │ bricks │ brick order │ neurons │
//! └──────┴──────────┴───────┴──────────┴───────────┴────────┴─────────────┴─────────┘
//! ```
//!
//! Synapse sections live in a separate item buffer so the arena can grow
//! without moving any static offset. [`build_header`] is pure and
//! deterministic: it runs at creation and again, with the stored counts, to
//! validate a restored segment.

use core::mem::size_of;

use crate::records::{
    Brick, Neuron, RegionDescriptor, SegmentHeader, SegmentSettings, SegmentSlot, SynapseSection,
    DYNAMIC_SEGMENT, HEADER_SLOT_SIZE, SEGMENT_FORMAT_VERSION, SEGMENT_SLOT_COUNT,
};
use crate::types::{Result, SegmentError};

/// Every region starts on this byte boundary
pub const REGION_ALIGNMENT: u64 = 8;

/// Inputs of the layout computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCounts {
    pub number_of_bricks: u32,
    pub number_of_neurons: u32,
    pub number_of_input_transfers: u32,
    pub number_of_output_transfers: u32,
    pub max_synapse_sections: u64,
}

impl SegmentCounts {
    /// Recover the counts a header was built from
    pub fn from_header(header: &SegmentHeader) -> Self {
        Self {
            number_of_bricks: header.bricks.count as u32,
            number_of_neurons: header.neurons.count as u32,
            number_of_input_transfers: header.input_transfers.count as u32,
            number_of_output_transfers: header.output_transfers.count as u32,
            max_synapse_sections: header.synapse_sections.count,
        }
    }
}

/// Which static region a descriptor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRegion {
    Settings,
    SlotList,
    InputTransfers,
    OutputTransfers,
    Bricks,
    BrickOrder,
    Neurons,
}

impl StaticRegion {
    /// Regions in on-buffer order
    pub const ALL: [StaticRegion; 7] = [
        StaticRegion::Settings,
        StaticRegion::SlotList,
        StaticRegion::InputTransfers,
        StaticRegion::OutputTransfers,
        StaticRegion::Bricks,
        StaticRegion::BrickOrder,
        StaticRegion::Neurons,
    ];

    /// Size in bytes of one element of the region
    pub const fn stride(self) -> usize {
        match self {
            StaticRegion::Settings => size_of::<SegmentSettings>(),
            StaticRegion::SlotList => size_of::<SegmentSlot>(),
            StaticRegion::InputTransfers | StaticRegion::OutputTransfers => size_of::<f32>(),
            StaticRegion::Bricks => size_of::<Brick>(),
            StaticRegion::BrickOrder => size_of::<u32>(),
            StaticRegion::Neurons => size_of::<Neuron>(),
        }
    }

    pub fn descriptor(self, header: &SegmentHeader) -> RegionDescriptor {
        match self {
            StaticRegion::Settings => header.settings,
            StaticRegion::SlotList => header.slot_list,
            StaticRegion::InputTransfers => header.input_transfers,
            StaticRegion::OutputTransfers => header.output_transfers,
            StaticRegion::Bricks => header.bricks,
            StaticRegion::BrickOrder => header.brick_order,
            StaticRegion::Neurons => header.neurons,
        }
    }

    fn descriptor_mut(self, header: &mut SegmentHeader) -> &mut RegionDescriptor {
        match self {
            StaticRegion::Settings => &mut header.settings,
            StaticRegion::SlotList => &mut header.slot_list,
            StaticRegion::InputTransfers => &mut header.input_transfers,
            StaticRegion::OutputTransfers => &mut header.output_transfers,
            StaticRegion::Bricks => &mut header.bricks,
            StaticRegion::BrickOrder => &mut header.brick_order,
            StaticRegion::Neurons => &mut header.neurons,
        }
    }
}

/// Padded byte size of a region holding `count` elements of `stride` bytes
#[inline]
pub const fn region_size(count: u64, stride: usize) -> u64 {
    let raw = count * stride as u64;
    (raw + REGION_ALIGNMENT - 1) / REGION_ALIGNMENT * REGION_ALIGNMENT
}

/// Compute the segment header for the given counts
///
/// Offsets are monotonically increasing and non-overlapping; settings always
/// start at [`HEADER_SLOT_SIZE`].
pub fn build_header(counts: &SegmentCounts) -> SegmentHeader {
    let mut header = SegmentHeader {
        segment_type: DYNAMIC_SEGMENT,
        version: SEGMENT_FORMAT_VERSION,
        ..Default::default()
    };

    let element_counts = [
        1,
        SEGMENT_SLOT_COUNT as u64,
        counts.number_of_input_transfers as u64,
        counts.number_of_output_transfers as u64,
        counts.number_of_bricks as u64,
        counts.number_of_bricks as u64,
        counts.number_of_neurons as u64,
    ];

    let mut byte_pos = HEADER_SLOT_SIZE as u64;
    for (region, count) in StaticRegion::ALL.into_iter().zip(element_counts) {
        let descriptor = region.descriptor_mut(&mut header);
        descriptor.count = count;
        descriptor.byte_pos = byte_pos;
        byte_pos += region_size(count, region.stride());
    }
    header.static_data_size = byte_pos;

    header.synapse_sections = RegionDescriptor {
        count: counts.max_synapse_sections,
        byte_pos: 0,
    };

    header
}

/// Byte size of one synapse section in the item buffer
pub const fn item_size() -> usize {
    size_of::<SynapseSection>()
}

/// Check that a header matches the layout its own counts produce
///
/// Used when restoring a segment from persisted bytes.
pub fn verify_header(header: &SegmentHeader) -> Result<()> {
    if header.segment_type != DYNAMIC_SEGMENT {
        return Err(SegmentError::LayoutMismatch(format!(
            "unexpected segment type {}",
            header.segment_type
        )));
    }
    if header.version != SEGMENT_FORMAT_VERSION {
        return Err(SegmentError::LayoutMismatch(format!(
            "unsupported format version {}",
            header.version
        )));
    }

    let expected = build_header(&SegmentCounts::from_header(header));
    for region in StaticRegion::ALL {
        let stored = region.descriptor(header);
        let computed = region.descriptor(&expected);
        if stored != computed {
            return Err(SegmentError::LayoutMismatch(format!(
                "{:?}: stored {:?}, computed {:?}",
                region, stored, computed
            )));
        }
    }
    if header.static_data_size != expected.static_data_size {
        return Err(SegmentError::LayoutMismatch(format!(
            "static data size: stored {}, computed {}",
            header.static_data_size, expected.static_data_size
        )));
    }
    Ok(())
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Segment Buffer
//!
//! Owns the two memory regions of a segment:
//!
//! - `static_data`: header slot plus every fixed-size region, allocated once
//!   from the header computed by [`build_header`](crate::layout::build_header)
//! - the synapse-section arena, which grows independently
//!
//! Typed access never stores addresses. Every accessor re-derives its slice
//! from the header offsets, so a buffer restored from bytes is usable as soon
//! as its header verifies. [`SegmentBuffer::views_mut`] carves the static
//! region into disjoint mutable slices for the processing engine.

use core::mem::size_of;

use bytemuck::Pod;

use crate::arena::SynapseSectionArena;
use crate::layout::{region_size, verify_header, StaticRegion};
use crate::records::{
    Brick, Neuron, SegmentHeader, SegmentSettings, SegmentSlot, HEADER_SLOT_SIZE,
};
use crate::types::{BrickId, NeuronId, Result, SegmentError};

/// Base offset, stride and element count of one static region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHandle {
    pub byte_pos: usize,
    pub stride: usize,
    pub count: usize,
}

impl RegionHandle {
    pub fn of(region: StaticRegion, header: &SegmentHeader) -> Self {
        let descriptor = region.descriptor(header);
        Self {
            byte_pos: descriptor.byte_pos as usize,
            stride: region.stride(),
            count: descriptor.count as usize,
        }
    }

    /// Unpadded byte range of the region inside the static data
    #[inline]
    pub fn byte_range(&self) -> core::ops::Range<usize> {
        self.byte_pos..self.byte_pos + self.stride * self.count
    }

    /// Byte range including alignment padding
    #[inline]
    pub fn padded_len(&self) -> usize {
        region_size(self.count as u64, self.stride) as usize
    }
}

/// Disjoint mutable views over a whole segment
pub struct SegmentViewsMut<'a> {
    pub header: &'a mut SegmentHeader,
    pub settings: &'a mut SegmentSettings,
    pub slots: &'a mut [SegmentSlot],
    pub input_transfers: &'a mut [f32],
    pub output_transfers: &'a mut [f32],
    pub bricks: &'a mut [Brick],
    pub brick_order: &'a mut [u32],
    pub neurons: &'a mut [Neuron],
    pub arena: &'a mut SynapseSectionArena,
}

/// One segment: static region plus synapse-section arena
#[derive(Debug, Clone)]
pub struct SegmentBuffer {
    static_data: Vec<u64>,
    arena: SynapseSectionArena,
}

impl SegmentBuffer {
    /// Allocate a zeroed segment for a verified header
    ///
    /// Writes the header, default settings and unused slots. Bricks and
    /// neurons are left zeroed for the initialiser to fill.
    pub fn allocate(header: SegmentHeader) -> Result<Self> {
        verify_header(&header)?;
        let words = (header.static_data_size as usize).div_ceil(size_of::<u64>());
        let mut buffer = Self {
            static_data: vec![0u64; words],
            arena: SynapseSectionArena::new(header.synapse_sections.count),
        };

        *buffer.header_mut() = header;
        *buffer.settings_mut() = SegmentSettings {
            max_synapse_sections: header.synapse_sections.count,
            ..Default::default()
        };
        buffer.slots_mut().fill(SegmentSlot::unused());
        Ok(buffer)
    }

    /// Reassemble a segment from restored parts
    pub(crate) fn from_parts(static_bytes: &[u8], arena: SynapseSectionArena) -> Result<Self> {
        if static_bytes.len() < HEADER_SLOT_SIZE || static_bytes.len() % size_of::<u64>() != 0 {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "static region of {} bytes",
                static_bytes.len()
            )));
        }
        let mut static_data = vec![0u64; static_bytes.len() / size_of::<u64>()];
        bytemuck::cast_slice_mut::<u64, u8>(&mut static_data).copy_from_slice(static_bytes);

        let buffer = Self { static_data, arena };
        let header = *buffer.header();
        verify_header(&header)?;
        if header.static_data_size as usize != static_bytes.len() {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "header expects {} static bytes, got {}",
                header.static_data_size,
                static_bytes.len()
            )));
        }
        if header.synapse_sections.count != buffer.arena.max_items() {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "arena capacity {} does not match header {}",
                buffer.arena.max_items(),
                header.synapse_sections.count
            )));
        }
        Ok(buffer)
    }

    /// Whole static region (header slot included)
    pub fn static_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.static_data)
    }

    pub fn header(&self) -> &SegmentHeader {
        bytemuck::from_bytes(&self.static_bytes()[..size_of::<SegmentHeader>()])
    }

    fn header_mut(&mut self) -> &mut SegmentHeader {
        bytemuck::from_bytes_mut(
            &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.static_data)
                [..size_of::<SegmentHeader>()],
        )
    }

    pub fn region(&self, region: StaticRegion) -> RegionHandle {
        RegionHandle::of(region, self.header())
    }

    fn region_slice<T: Pod>(&self, region: StaticRegion) -> &[T] {
        let handle = self.region(region);
        debug_assert_eq!(handle.stride, size_of::<T>());
        bytemuck::cast_slice(&self.static_bytes()[handle.byte_range()])
    }

    fn region_slice_mut<T: Pod>(&mut self, region: StaticRegion) -> &mut [T] {
        let handle = self.region(region);
        debug_assert_eq!(handle.stride, size_of::<T>());
        bytemuck::cast_slice_mut(
            &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.static_data)[handle.byte_range()],
        )
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.region_slice::<SegmentSettings>(StaticRegion::Settings)[0]
    }

    pub fn settings_mut(&mut self) -> &mut SegmentSettings {
        &mut self.region_slice_mut::<SegmentSettings>(StaticRegion::Settings)[0]
    }

    pub fn slots(&self) -> &[SegmentSlot] {
        self.region_slice(StaticRegion::SlotList)
    }

    pub fn slots_mut(&mut self) -> &mut [SegmentSlot] {
        self.region_slice_mut(StaticRegion::SlotList)
    }

    pub fn input_transfers(&self) -> &[f32] {
        self.region_slice(StaticRegion::InputTransfers)
    }

    pub fn input_transfers_mut(&mut self) -> &mut [f32] {
        self.region_slice_mut(StaticRegion::InputTransfers)
    }

    pub fn output_transfers(&self) -> &[f32] {
        self.region_slice(StaticRegion::OutputTransfers)
    }

    pub fn output_transfers_mut(&mut self) -> &mut [f32] {
        self.region_slice_mut(StaticRegion::OutputTransfers)
    }

    /// Copy external values into the front of the input transfer buffer
    pub fn write_inputs(&mut self, values: &[f32]) -> Result<()> {
        let transfers = self.input_transfers_mut();
        if values.len() > transfers.len() {
            return Err(SegmentError::CapacityExceeded {
                requested: values.len(),
                available: transfers.len(),
            });
        }
        transfers[..values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Copy external values into the front of the output transfer buffer
    pub fn write_outputs(&mut self, values: &[f32]) -> Result<()> {
        let transfers = self.output_transfers_mut();
        if values.len() > transfers.len() {
            return Err(SegmentError::CapacityExceeded {
                requested: values.len(),
                available: transfers.len(),
            });
        }
        transfers[..values.len()].copy_from_slice(values);
        Ok(())
    }

    pub fn bricks(&self) -> &[Brick] {
        self.region_slice(StaticRegion::Bricks)
    }

    pub fn brick(&self, id: BrickId) -> Option<&Brick> {
        self.bricks().get(id.index())
    }

    /// Brick ids in processing order
    pub fn brick_order(&self) -> &[u32] {
        self.region_slice(StaticRegion::BrickOrder)
    }

    pub fn neurons(&self) -> &[Neuron] {
        self.region_slice(StaticRegion::Neurons)
    }

    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons().get(id.index())
    }

    pub fn neurons_mut(&mut self) -> &mut [Neuron] {
        self.region_slice_mut(StaticRegion::Neurons)
    }

    pub fn arena(&self) -> &SynapseSectionArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut SynapseSectionArena {
        &mut self.arena
    }

    /// Split the segment into disjoint mutable views
    pub fn views_mut(&mut self) -> SegmentViewsMut<'_> {
        let header_copy = *self.header();
        let bytes = bytemuck::cast_slice_mut::<u64, u8>(&mut self.static_data);
        let (header_slot, mut rest) = bytes.split_at_mut(HEADER_SLOT_SIZE);
        let mut cursor = HEADER_SLOT_SIZE;

        let settings = take_region(&mut rest, &mut cursor, StaticRegion::Settings, &header_copy);
        let slots = take_region(&mut rest, &mut cursor, StaticRegion::SlotList, &header_copy);
        let input_transfers =
            take_region(&mut rest, &mut cursor, StaticRegion::InputTransfers, &header_copy);
        let output_transfers =
            take_region(&mut rest, &mut cursor, StaticRegion::OutputTransfers, &header_copy);
        let bricks = take_region(&mut rest, &mut cursor, StaticRegion::Bricks, &header_copy);
        let brick_order = take_region(&mut rest, &mut cursor, StaticRegion::BrickOrder, &header_copy);
        let neurons = take_region(&mut rest, &mut cursor, StaticRegion::Neurons, &header_copy);

        SegmentViewsMut {
            header: bytemuck::from_bytes_mut(&mut header_slot[..size_of::<SegmentHeader>()]),
            settings: bytemuck::from_bytes_mut(settings),
            slots: bytemuck::cast_slice_mut(slots),
            input_transfers: bytemuck::cast_slice_mut(input_transfers),
            output_transfers: bytemuck::cast_slice_mut(output_transfers),
            bricks: bytemuck::cast_slice_mut(bricks),
            brick_order: bytemuck::cast_slice_mut(brick_order),
            neurons: bytemuck::cast_slice_mut(neurons),
            arena: &mut self.arena,
        }
    }
}

/// Split the next region off `rest`, skipping any gap before it
fn take_region<'a>(
    rest: &mut &'a mut [u8],
    cursor: &mut usize,
    region: StaticRegion,
    header: &SegmentHeader,
) -> &'a mut [u8] {
    let handle = RegionHandle::of(region, header);
    let remaining = core::mem::take(rest);
    let (_, remaining) = remaining.split_at_mut(handle.byte_pos - *cursor);
    let (region_bytes, remaining) = remaining.split_at_mut(handle.padded_len());
    *rest = remaining;
    *cursor = handle.byte_pos + handle.padded_len();
    &mut region_bytes[..handle.stride * handle.count]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{build_header, SegmentCounts};
    use crate::types::UNINIT_STATE_32;

    fn small_buffer() -> SegmentBuffer {
        SegmentBuffer::allocate(build_header(&SegmentCounts {
            number_of_bricks: 3,
            number_of_neurons: 14,
            number_of_input_transfers: 4,
            number_of_output_transfers: 2,
            max_synapse_sections: 64,
        }))
        .unwrap()
    }

    #[test]
    fn test_allocate_sizes_regions() {
        let buffer = small_buffer();
        assert_eq!(buffer.static_bytes().len() as u64, buffer.header().static_data_size);
        assert_eq!(buffer.neurons().len(), 14);
        assert_eq!(buffer.bricks().len(), 3);
        assert_eq!(buffer.brick_order().len(), 3);
        assert_eq!(buffer.input_transfers().len(), 4);
        assert_eq!(buffer.output_transfers().len(), 2);
        assert_eq!(buffer.settings().max_synapse_sections, 64);
        assert!(buffer
            .slots()
            .iter()
            .all(|slot| slot.target_segment_id == UNINIT_STATE_32 && !slot.is_in_use()));
    }

    #[test]
    fn test_views_alias_accessors() {
        let mut buffer = small_buffer();
        {
            let views = buffer.views_mut();
            views.neurons[13].border = 0.75;
            views.output_transfers[1] = 2.5;
            views.brick_order[2] = 1;
            views.settings.learn_rate = 0.25;
            views.arena.reserve();
        }
        assert_eq!(buffer.neurons()[13].border, 0.75);
        assert_eq!(buffer.output_transfers()[1], 2.5);
        assert_eq!(buffer.brick_order()[2], 1);
        assert_eq!(buffer.settings().learn_rate, 0.25);
        assert_eq!(buffer.arena().item_count(), 1);
        // Header must stay intact after writes to every region
        assert!(verify_header(buffer.header()).is_ok());
    }

    #[test]
    fn test_write_inputs_checks_capacity() {
        let mut buffer = small_buffer();
        buffer.write_inputs(&[1.0, 2.0]).unwrap();
        assert_eq!(buffer.input_transfers(), &[1.0, 2.0, 0.0, 0.0]);
        assert_eq!(
            buffer.write_outputs(&[0.0; 3]),
            Err(SegmentError::CapacityExceeded {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_allocate_rejects_tampered_header() {
        let mut header = build_header(&SegmentCounts::default());
        header.static_data_size += 8;
        assert!(SegmentBuffer::allocate(header).is_err());
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Synapse-Section Arena
//!
//! Growable item buffer holding every synapse section of a segment.
//!
//! - `reserve()` pops the free list first and only grows the buffer (one
//!   block at a time) when no deleted slot is available.
//! - `delete()` overwrites the slot with a tombstone and appends it to the
//!   free list, which is threaded through the tombstones' `next` field as
//!   byte offsets (`UNINIT_STATE_64` terminates it).
//! - Capacity exhaustion is not an error: `reserve()` returns `None` and the
//!   caller skips synapse growth for the cycle.
//!
//! The arena assumes a single writer; the owning segment is never processed
//! by two threads at once.

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use crate::layout::item_size;
use crate::records::{SynapseSection, SECTION_DELETED};
use crate::types::{Result, SectionId, SegmentError, UNINIT_STATE_64};

/// Growth step of the item buffer in bytes
pub const ARENA_BLOCK_SIZE: usize = 4096;

const BLOCK_WORDS: usize = ARENA_BLOCK_SIZE / core::mem::size_of::<u64>();

/// Allocator bookkeeping, persisted next to the item bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ArenaState {
    pub item_size: u64,
    pub item_count: u64,
    pub deleted_count: u64,
    pub first_empty_offset: u64,
    pub last_empty_offset: u64,
    pub max_items: u64,
    pub number_of_blocks: u64,
}

/// Typed view of one arena slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot<'a> {
    Live(&'a SynapseSection),
    Free { next_free: Option<SectionId> },
}

/// Arena of synapse sections backed by 8-byte aligned words
#[derive(Debug, Clone)]
pub struct SynapseSectionArena {
    state: ArenaState,
    data: Vec<u64>,
}

impl SynapseSectionArena {
    /// Create an empty arena that may hold at most `max_items` sections
    pub fn new(max_items: u64) -> Self {
        Self {
            state: ArenaState {
                item_size: item_size() as u64,
                item_count: 0,
                deleted_count: 0,
                first_empty_offset: UNINIT_STATE_64,
                last_empty_offset: UNINIT_STATE_64,
                max_items,
                number_of_blocks: 0,
            },
            data: Vec::new(),
        }
    }

    /// Rebuild an arena from persisted state and item bytes
    pub fn from_parts(state: ArenaState, items: &[u8]) -> Result<Self> {
        if state.item_size != item_size() as u64 {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "item size {} does not match section size {}",
                state.item_size,
                item_size()
            )));
        }
        let used = state
            .item_count
            .checked_mul(state.item_size)
            .ok_or_else(|| {
                SegmentError::SnapshotCorrupt(format!("{} items overflow the arena", state.item_count))
            })?;
        if items.len() as u64 != used {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "arena holds {} bytes, state expects {}",
                items.len(),
                used
            )));
        }
        if state.deleted_count > state.item_count || state.item_count > state.max_items {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "inconsistent arena counters: {:?}",
                state
            )));
        }

        // Blocks are only ever added when the next item does not fit
        let blocks = used.div_ceil(ARENA_BLOCK_SIZE as u64);
        if state.number_of_blocks != blocks {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "{} blocks recorded for {} bytes of items, expected {}",
                state.number_of_blocks, used, blocks
            )));
        }
        let mut data = vec![0u64; blocks as usize * BLOCK_WORDS];
        bytemuck::cast_slice_mut::<u64, u8>(&mut data)[..items.len()].copy_from_slice(items);

        let arena = Self { state, data };
        arena.check_free_list()?;
        Ok(arena)
    }

    /// Walk the free list of a restored arena
    ///
    /// Every entry must be an aligned, in-range tombstone, the walk must end
    /// at the recorded tail, and it must visit exactly `deleted_count` slots.
    fn check_free_list(&self) -> Result<()> {
        let corrupt = |reason: String| Err(SegmentError::SnapshotCorrupt(reason));
        let used = self.state.item_count * self.state.item_size;
        let (first, last) = (self.state.first_empty_offset, self.state.last_empty_offset);

        if (first == UNINIT_STATE_64) != (last == UNINIT_STATE_64) {
            return corrupt(format!("free list head {} and tail {} disagree", first, last));
        }

        let mut visited = 0u64;
        let mut offset = first;
        let mut tail = UNINIT_STATE_64;
        while offset != UNINIT_STATE_64 {
            if offset % self.state.item_size != 0 || offset >= used {
                return corrupt(format!("free list offset {} outside the arena", offset));
            }
            visited += 1;
            if visited > self.state.deleted_count {
                return corrupt(format!(
                    "free list longer than {} deleted slots",
                    self.state.deleted_count
                ));
            }
            let section = self.item(self.id_from_offset(offset));
            if !section.is_deleted() {
                return corrupt(format!("free list offset {} is not a tombstone", offset));
            }
            tail = offset;
            offset = section.next;
        }

        if tail != last || visited != self.state.deleted_count {
            return corrupt(format!(
                "free list ends at {} after {} slots, state records {} and {}",
                tail, visited, last, self.state.deleted_count
            ));
        }
        Ok(())
    }

    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    /// Number of allocated slots, deleted ones included
    pub fn item_count(&self) -> u64 {
        self.state.item_count
    }

    pub fn deleted_count(&self) -> u64 {
        self.state.deleted_count
    }

    /// Number of sections currently in use
    pub fn live_count(&self) -> u64 {
        self.state.item_count - self.state.deleted_count
    }

    pub fn max_items(&self) -> u64 {
        self.state.max_items
    }

    /// Head of the free list as a byte offset
    pub fn first_empty_offset(&self) -> Option<u64> {
        (self.state.first_empty_offset != UNINIT_STATE_64).then_some(self.state.first_empty_offset)
    }

    /// Tail of the free list as a byte offset
    pub fn last_empty_offset(&self) -> Option<u64> {
        (self.state.last_empty_offset != UNINIT_STATE_64).then_some(self.state.last_empty_offset)
    }

    /// Bytes of all allocated slots, in id order
    pub fn as_bytes(&self) -> &[u8] {
        let used = (self.state.item_count * self.state.item_size) as usize;
        &bytemuck::cast_slice::<u64, u8>(&self.data)[..used]
    }

    /// Reserve a slot for a new section
    ///
    /// Returns `None` when the arena is at capacity or the backing buffer
    /// cannot grow. The returned slot holds an empty, unlinked section.
    pub fn reserve(&mut self) -> Option<SectionId> {
        let id = match self.reuse() {
            Some(id) => id,
            None => self.append()?,
        };
        *self.item_mut(id) = SynapseSection::new();
        trace!("[ARENA] reserved {}", id);
        Some(id)
    }

    /// Delete a section, linking its slot into the free list
    pub fn delete(&mut self, id: SectionId) -> Result<()> {
        self.check_id(id)?;
        if self.item(id).is_deleted() {
            return Err(SegmentError::SectionAlreadyDeleted(id));
        }

        *self.item_mut(id) = SynapseSection::tombstone();
        let offset = id.0 as u64 * self.state.item_size;

        if self.state.last_empty_offset != UNINIT_STATE_64 {
            let tail = self.id_from_offset(self.state.last_empty_offset);
            self.item_mut(tail).next = offset;
        }
        self.state.last_empty_offset = offset;
        if self.state.first_empty_offset == UNINIT_STATE_64 {
            self.state.first_empty_offset = offset;
        }
        self.state.deleted_count += 1;

        trace!("[ARENA] deleted {} (deleted count {})", id, self.state.deleted_count);
        Ok(())
    }

    /// Typed view of a slot
    pub fn slot(&self, id: SectionId) -> Result<Slot<'_>> {
        self.check_id(id)?;
        let section = self.item(id);
        if section.is_deleted() {
            let next_free = (section.next != UNINIT_STATE_64)
                .then(|| self.id_from_offset(section.next));
            Ok(Slot::Free { next_free })
        } else {
            Ok(Slot::Live(section))
        }
    }

    /// Live section by id, `None` if out of range or deleted
    pub fn section(&self, id: SectionId) -> Option<&SynapseSection> {
        if id.0 as u64 >= self.state.item_count {
            return None;
        }
        let section = self.item(id);
        (!section.is_deleted()).then_some(section)
    }

    /// Mutable live section by id, `None` if out of range or deleted
    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut SynapseSection> {
        if id.0 as u64 >= self.state.item_count {
            return None;
        }
        let section = self.item_mut(id);
        if section.is_deleted() {
            None
        } else {
            Some(section)
        }
    }

    /// Walk a chain starting at `head`
    ///
    /// Stops at the first missing or deleted link and never yields more ids
    /// than there are slots, so a corrupt cycle cannot spin forever.
    pub fn chain(&self, head: Option<SectionId>) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            next: head,
            remaining: self.state.item_count,
        }
    }

    /// Pop the head of the free list
    fn reuse(&mut self) -> Option<SectionId> {
        if self.state.first_empty_offset == UNINIT_STATE_64 {
            return None;
        }
        let offset = self.state.first_empty_offset;
        assert!(
            offset % self.state.item_size == 0,
            "[ARENA] free-list offset {} is not a multiple of item size {}",
            offset,
            self.state.item_size
        );
        let id = self.id_from_offset(offset);
        let tombstone = self.item(id);
        assert!(
            tombstone.status == SECTION_DELETED,
            "[ARENA] free-list entry {} is not a tombstone",
            id
        );

        let next = tombstone.next;
        self.state.first_empty_offset = next;
        if next == UNINIT_STATE_64 {
            self.state.last_empty_offset = UNINIT_STATE_64;
        }
        self.state.deleted_count -= 1;
        Some(id)
    }

    /// Append a new slot at the end, growing by one block if required
    fn append(&mut self) -> Option<SectionId> {
        if self.state.item_count >= self.state.max_items {
            debug!(
                "[ARENA] capacity reached ({} sections)",
                self.state.max_items
            );
            return None;
        }

        let required = (self.state.item_count + 1) * self.state.item_size;
        let available = self.data.len() as u64 * 8;
        if required > available {
            if self.data.try_reserve_exact(BLOCK_WORDS).is_err() {
                debug!("[ARENA] backing buffer cannot grow");
                return None;
            }
            self.data.resize(self.data.len() + BLOCK_WORDS, 0);
            self.state.number_of_blocks += 1;
        }

        let id = SectionId(self.state.item_count as u32);
        self.state.item_count += 1;
        Some(id)
    }

    fn check_id(&self, id: SectionId) -> Result<()> {
        if id.0 as u64 >= self.state.item_count {
            return Err(SegmentError::InvalidSectionId {
                id,
                item_count: self.state.item_count,
            });
        }
        Ok(())
    }

    #[inline]
    fn id_from_offset(&self, offset: u64) -> SectionId {
        SectionId((offset / self.state.item_size) as u32)
    }

    #[inline]
    fn byte_range(&self, id: SectionId) -> core::ops::Range<usize> {
        let start = id.index() * self.state.item_size as usize;
        start..start + self.state.item_size as usize
    }

    #[inline]
    fn item(&self, id: SectionId) -> &SynapseSection {
        let range = self.byte_range(id);
        bytemuck::from_bytes(&bytemuck::cast_slice::<u64, u8>(&self.data)[range])
    }

    #[inline]
    fn item_mut(&mut self, id: SectionId) -> &mut SynapseSection {
        let range = self.byte_range(id);
        bytemuck::from_bytes_mut(&mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.data)[range])
    }
}

/// Iterator over the section ids of one chain
pub struct ChainIter<'a> {
    arena: &'a SynapseSectionArena,
    next: Option<SectionId>,
    remaining: u64,
}

impl Iterator for ChainIter<'_> {
    type Item = SectionId;

    fn next(&mut self) -> Option<SectionId> {
        let current = self.next?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let section = self.arena.section(current)?;
        self.next = section.next_section();
        Some(current)
    }
}

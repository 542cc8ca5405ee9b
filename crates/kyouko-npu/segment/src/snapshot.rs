// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Snapshot Byte Stream
//!
//! A segment serialises to one linear byte stream:
//!
//! ```text
//! ┌──────────────────────────────┬─────────────┬─────────────────────┐
//! │ static region (header first) │ ArenaState  │ arena items         │
//! └──────────────────────────────┴─────────────┴─────────────────────┘
//! ```
//!
//! The stream is cut into [`SnapshotFrame`]s for transport. Frames carry
//! their byte position, so [`SnapshotAssembler`] accepts them in any order.
//! Restoring re-runs the layout builder on the stored counts and rejects the
//! stream if any offset differs.

use core::mem::size_of;
use std::collections::BTreeMap;

use bytemuck::Zeroable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arena::{ArenaState, SynapseSectionArena};
use crate::buffer::SegmentBuffer;
use crate::records::SegmentHeader;
use crate::types::{Result, SegmentError};

/// Default payload size of one snapshot frame
pub const DEFAULT_FRAME_SIZE: usize = 128 * 1024;

impl SegmentBuffer {
    /// Serialise the whole segment
    pub fn to_bytes(&self) -> Vec<u8> {
        let arena = self.arena();
        let mut bytes = Vec::with_capacity(
            self.static_bytes().len() + size_of::<ArenaState>() + arena.as_bytes().len(),
        );
        bytes.extend_from_slice(self.static_bytes());
        bytes.extend_from_slice(bytemuck::bytes_of(arena.state()));
        bytes.extend_from_slice(arena.as_bytes());
        bytes
    }

    /// Restore a segment serialised with [`SegmentBuffer::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < size_of::<SegmentHeader>() {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "{} bytes cannot hold a segment header",
                bytes.len()
            )));
        }
        let header: SegmentHeader =
            bytemuck::pod_read_unaligned(&bytes[..size_of::<SegmentHeader>()]);
        let static_size = header.static_data_size as usize;
        let state_end = static_size.saturating_add(size_of::<ArenaState>());
        if bytes.len() < state_end {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "stream of {} bytes ends before arena state at {}",
                bytes.len(),
                state_end
            )));
        }

        let mut state = ArenaState::zeroed();
        bytemuck::bytes_of_mut(&mut state).copy_from_slice(&bytes[static_size..state_end]);
        let arena = SynapseSectionArena::from_parts(state, &bytes[state_end..])?;
        SegmentBuffer::from_parts(&bytes[..static_size], arena)
    }
}

/// One transport frame of a snapshot stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub snapshot_id: Uuid,
    pub file_id: Uuid,
    pub byte_position: u64,
    pub data: Vec<u8>,
}

impl SnapshotFrame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Cuts a byte stream into frames
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    snapshot_id: Uuid,
    file_id: Uuid,
    frame_size: usize,
}

impl SnapshotWriter {
    pub fn new(snapshot_id: Uuid, file_id: Uuid, frame_size: usize) -> Self {
        Self {
            snapshot_id,
            file_id,
            frame_size: frame_size.max(1),
        }
    }

    pub fn frames(&self, bytes: &[u8]) -> Vec<SnapshotFrame> {
        bytes
            .chunks(self.frame_size)
            .enumerate()
            .map(|(index, chunk)| SnapshotFrame {
                snapshot_id: self.snapshot_id,
                file_id: self.file_id,
                byte_position: (index * self.frame_size) as u64,
                data: chunk.to_vec(),
            })
            .collect()
    }
}

/// Reassembles a byte stream from frames of one file
#[derive(Debug, Clone)]
pub struct SnapshotAssembler {
    file_id: Uuid,
    data: Vec<u8>,
    received: u64,
    /// Byte ranges written so far, `start -> end`
    written: BTreeMap<usize, usize>,
}

impl SnapshotAssembler {
    pub fn new(file_id: Uuid, total_size: usize) -> Self {
        Self {
            file_id,
            data: vec![0; total_size],
            received: 0,
            written: BTreeMap::new(),
        }
    }

    /// Range already written that intersects `start..end`
    fn overlap(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let (&written_start, &written_end) = self.written.range(..end).next_back()?;
        (written_end > start).then_some((written_start, written_end))
    }

    /// Write a frame's payload at its byte position
    pub fn accept(&mut self, frame: &SnapshotFrame) -> Result<()> {
        if frame.file_id != self.file_id {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "frame for file {} sent to assembler of {}",
                frame.file_id, self.file_id
            )));
        }
        let start = usize::try_from(frame.byte_position).unwrap_or(usize::MAX);
        let end = start.saturating_add(frame.data.len());
        if end > self.data.len() {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "frame {}..{} beyond stream size {}",
                start,
                end,
                self.data.len()
            )));
        }
        if frame.data.is_empty() {
            return Ok(());
        }
        if let Some((written_start, written_end)) = self.overlap(start, end) {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "frame {}..{} overlaps bytes {}..{} already received",
                start, end, written_start, written_end
            )));
        }
        self.data[start..end].copy_from_slice(&frame.data);
        self.written.insert(start, end);
        self.received += frame.data.len() as u64;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.data.len() as u64
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(SegmentError::SnapshotCorrupt(format!(
                "only {} of {} bytes received",
                self.received,
                self.data.len()
            )));
        }
        Ok(self.data)
    }
}

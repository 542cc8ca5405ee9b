// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Segment Types Module
//!
//! Identity types and errors shared by every part of the segment engine.

pub mod error;
pub mod ids;

pub use error::{Result, SegmentError};
pub use ids::{BrickId, NeuronId, SectionId, UNINIT_STATE_32, UNINIT_STATE_64};

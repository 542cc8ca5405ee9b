// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Identity types for bricks, neurons and synapse sections
//!
//! In-buffer records store raw `u32` ids with [`UNINIT_STATE_32`] as the
//! "absent" marker. The newtypes below are what the API hands out; use
//! `from_raw` / `raw_or_uninit` to cross the boundary.

use core::fmt;

/// Sentinel for an absent 32 bit id (neighbour, chain link, target neuron, ...)
pub const UNINIT_STATE_32: u32 = u32::MAX;

/// Sentinel for an absent 64 bit value (free-list byte offsets)
pub const UNINIT_STATE_64: u64 = u64::MAX;

macro_rules! raw_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Convert a raw record value, mapping the sentinel to `None`
            #[inline]
            pub const fn from_raw(raw: u32) -> Option<Self> {
                if raw == UNINIT_STATE_32 {
                    None
                } else {
                    Some(Self(raw))
                }
            }

            /// Raw record value for an optional id
            #[inline]
            pub const fn raw_or_uninit(id: Option<Self>) -> u32 {
                match id {
                    Some(id) => id.0,
                    None => UNINIT_STATE_32,
                }
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

raw_id!(
    /// Brick id (index into the segment's brick table)
    BrickId,
    "Brick"
);

raw_id!(
    /// Neuron id (index into the segment's neuron table)
    NeuronId,
    "Neuron"
);

raw_id!(
    /// Synapse section id (item index inside the section arena)
    SectionId,
    "Section"
);

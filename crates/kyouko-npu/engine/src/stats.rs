// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use core::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counters of one processing pass over a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub neurons_processed: u64,
    pub neurons_fired: u64,
    pub synapses_created: u64,
    pub sections_created: u64,
    /// Section reservations refused because the arena is full
    pub allocation_failures: u64,
    pub synapses_pruned: u64,
    pub sections_deleted: u64,
}

impl AddAssign for CycleStats {
    fn add_assign(&mut self, other: Self) {
        self.neurons_processed += other.neurons_processed;
        self.neurons_fired += other.neurons_fired;
        self.synapses_created += other.synapses_created;
        self.sections_created += other.sections_created;
        self.allocation_failures += other.allocation_failures;
        self.synapses_pruned += other.synapses_pruned;
        self.sections_deleted += other.sections_deleted;
    }
}

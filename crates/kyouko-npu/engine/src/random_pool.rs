// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pre-generated random values shared by all segments
//!
//! Synapse growth never calls an RNG directly. Each synapse section carries a
//! `random_pos` cursor into this pool, which keeps the forward pass
//! deterministic for a given seed and lets a device kernel consume the very
//! same values.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kyouko_npu_segment::SectionId;

/// Default number of values in the pool
pub const DEFAULT_RANDOM_POOL_SIZE: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct RandomValuePool {
    values: Vec<u32>,
}

impl RandomValuePool {
    pub fn new(size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let values = (0..size.max(1)).map(|_| rng.gen()).collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Initial cursor of a freshly reserved section
    pub fn start_position(&self, section: SectionId) -> u32 {
        (section.0.wrapping_mul(7919) as usize % self.values.len()) as u32
    }

    /// Value at the cursor, advancing it
    #[inline]
    pub fn next(&self, cursor: &mut u32) -> u32 {
        let index = *cursor as usize % self.values.len();
        *cursor = ((index + 1) % self.values.len()) as u32;
        self.values[index]
    }

    /// Uniform value in `[0, 1)`, advancing the cursor
    #[inline]
    pub fn next_unit(&self, cursor: &mut u32) -> f32 {
        // 24 bits fit the f32 mantissa exactly
        (self.next(cursor) >> 8) as f32 / (1u32 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_values() {
        let a = RandomValuePool::new(128, 3);
        let b = RandomValuePool::new(128, 3);
        assert_eq!(a.values(), b.values());
        assert_ne!(a.values(), RandomValuePool::new(128, 4).values());
    }

    #[test]
    fn test_cursor_wraps() {
        let pool = RandomValuePool::new(4, 1);
        let mut cursor = 3;
        assert_eq!(pool.next(&mut cursor), pool.values()[3]);
        assert_eq!(cursor, 0);
        assert_eq!(pool.next(&mut cursor), pool.values()[0]);
    }

    #[test]
    fn test_unit_range() {
        let pool = RandomValuePool::new(1000, 9);
        let mut cursor = 0;
        for _ in 0..1000 {
            let value = pool.next_unit(&mut cursor);
            assert!((0.0..1.0).contains(&value));
        }
    }
}

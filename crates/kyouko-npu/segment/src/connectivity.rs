// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Brick Connectivity & Target Sampling
//!
//! Bricks sit on a hex grid stacked along `z`. Every brick has 12 sides; side
//! `s` and side `11 - s` are opposite directions:
//!
//! | side | direction              | opposite |
//! |------|------------------------|----------|
//! | 0    | below (`z - 1`)        | 11       |
//! | 1    | left, below            | 10       |
//! | 2    | upper right, below     | 9        |
//! | 3    | upper left             | 8        |
//! | 4    | upper right            | 7        |
//! | 5    | left                   | 6        |
//!
//! Rows are indexed by `y`; odd rows are shifted half a cell to the right.
//!
//! After linking, every non-output brick samples [`NUMBER_OF_POSSIBLE_TARGETS`]
//! short random walks. The landing bricks form the cache that synapse growth
//! draws its target bricks from.

use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::records::{Brick, Position, NUMBER_OF_POSSIBLE_TARGETS, NUMBER_OF_SIDES};
use crate::types::{BrickId, UNINIT_STATE_32};

/// Maximum number of hops of one sampling walk
pub const MAX_SAMPLING_HOPS: usize = 2;

/// Sides a sampling walk may step through
pub const NEXT_SIDE_CANDIDATES: [usize; 7] = [2, 4, 6, 8, 10, 0, 11];

/// Side pointing the opposite way
#[inline]
pub const fn opposite_side(side: usize) -> usize {
    NUMBER_OF_SIDES - 1 - side
}

/// Grid position reached from `pos` by stepping through `side`
///
/// Pure function; `side` must be below [`NUMBER_OF_SIDES`].
pub fn neighbor_position(pos: Position, side: usize) -> Position {
    let odd_row = pos.y.rem_euclid(2) == 1;
    // Column shift of the diagonal neighbours: even rows lean left
    let (left_shift, right_shift) = if odd_row { (0, 1) } else { (-1, 0) };

    let Position { x, y, z } = pos;
    match side {
        0 => Position::new(x, y, z - 1),
        1 => Position::new(x - 1, y, z - 1),
        2 => Position::new(x + right_shift, y - 1, z - 1),
        3 => Position::new(x + left_shift, y - 1, z),
        4 => Position::new(x + right_shift, y - 1, z),
        5 => Position::new(x - 1, y, z),
        6 => Position::new(x + 1, y, z),
        7 => Position::new(x + left_shift, y + 1, z),
        8 => Position::new(x + right_shift, y + 1, z),
        9 => Position::new(x + left_shift, y + 1, z + 1),
        10 => Position::new(x + 1, y, z + 1),
        11 => Position::new(x, y, z + 1),
        _ => panic!("side {} out of range", side),
    }
}

/// Link every pair of bricks whose positions are adjacent
///
/// Both directions are written (`side` on the source, `11 - side` on the
/// target). Returns the number of links created.
pub fn link_neighbors(bricks: &mut [Brick]) -> usize {
    let by_position: AHashMap<Position, u32> = bricks
        .iter()
        .map(|brick| (brick.position, brick.brick_id))
        .collect();

    let mut links = 0;
    for index in 0..bricks.len() {
        let source = bricks[index].brick_id;
        let position = bricks[index].position;
        for side in 0..NUMBER_OF_SIDES {
            let Some(&target) = by_position.get(&neighbor_position(position, side)) else {
                continue;
            };
            if bricks[index].neighbors[side] == target {
                continue;
            }
            bricks[index].neighbors[side] = target;
            bricks[target as usize].neighbors[opposite_side(side)] = source;
            links += 1;
            trace!(
                "[CONNECTIVITY] {} side {} <-> {} side {}",
                BrickId(source),
                side,
                BrickId(target),
                opposite_side(side)
            );
        }
    }
    links
}

/// Neighbours a sampling walk may step into, per brick
type WalkTable = Vec<[Option<u32>; NUMBER_OF_SIDES]>;

/// Fill `possible_target_brick_ids` of every non-output brick
///
/// Input bricks are never landed on: their neurons are driven from the
/// transfer buffer and would ignore any synaptic input. Output bricks get an
/// empty cache. Returns the number of dead-end bricks (no usable neighbour),
/// which target only themselves.
pub fn sample_target_bricks(bricks: &mut [Brick], seed: u64) -> usize {
    let table: WalkTable = bricks
        .iter()
        .map(|brick| {
            let mut usable = [None; NUMBER_OF_SIDES];
            for (side, slot) in usable.iter_mut().enumerate() {
                *slot = brick
                    .neighbor(side)
                    .filter(|id| !bricks[id.index()].is_input())
                    .map(|id| id.0);
            }
            usable
        })
        .collect();

    bricks
        .par_iter_mut()
        .map(|brick| {
            if brick.is_output() {
                brick.number_of_targets = 0;
                brick.possible_target_brick_ids = [UNINIT_STATE_32; NUMBER_OF_POSSIBLE_TARGETS];
                return false;
            }

            let mut rng = StdRng::seed_from_u64(seed ^ brick.brick_id as u64);
            let dead_end = NEXT_SIDE_CANDIDATES
                .iter()
                .all(|&side| table[brick.brick_id as usize][side].is_none());
            if dead_end {
                debug!(
                    "[CONNECTIVITY] {} at {:?} has no reachable neighbour, targeting itself",
                    BrickId(brick.brick_id),
                    brick.position
                );
            }

            for target in brick.possible_target_brick_ids.iter_mut() {
                *target = go_to_next_init_brick(brick.brick_id, &table, &mut rng);
            }
            brick.number_of_targets = NUMBER_OF_POSSIBLE_TARGETS as u32;
            dead_end
        })
        .filter(|&dead_end| dead_end)
        .count()
}

/// One bounded random walk starting at `start`
///
/// Each hop scans the candidate sides from a random starting index and takes
/// the first usable neighbour; the walk ends early when none is found.
fn go_to_next_init_brick(start: u32, table: &WalkTable, rng: &mut impl Rng) -> u32 {
    let hops = rng.gen_range(1..=MAX_SAMPLING_HOPS);
    let mut current = start;
    for _ in 0..hops {
        let offset = rng.gen_range(0..NEXT_SIDE_CANDIDATES.len());
        let next = (0..NEXT_SIDE_CANDIDATES.len())
            .map(|i| NEXT_SIDE_CANDIDATES[(offset + i) % NEXT_SIDE_CANDIDATES.len()])
            .find_map(|side| table[current as usize][side]);
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

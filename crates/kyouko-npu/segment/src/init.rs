// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Segment initialisation from a descriptor

use tracing::info;

use crate::buffer::SegmentBuffer;
use crate::connectivity::{link_neighbors, sample_target_bricks};
use crate::descriptor::{BrickType, SegmentDescriptor};
use crate::layout::{build_header, SegmentCounts};
use crate::records::{Brick, Neuron, Position};
use crate::types::{BrickId, Result};

/// Processing order of brick types
fn type_rank(brick_type: BrickType) -> u8 {
    match brick_type {
        BrickType::Input => 0,
        BrickType::Normal => 1,
        BrickType::Output => 2,
    }
}

/// Build a ready-to-run segment
///
/// Brick ids follow descriptor order. The brick-order table lists input,
/// normal and output bricks in that order, each group sorted by position, and
/// neuron ranges are handed out in the same order. Input and output neurons
/// get consecutive transfer-buffer slots. `seed` drives target sampling.
pub fn init_segment(descriptor: &SegmentDescriptor, seed: u64) -> Result<SegmentBuffer> {
    descriptor.validate()?;

    let counts = SegmentCounts {
        number_of_bricks: descriptor.bricks.len() as u32,
        number_of_neurons: descriptor.total_neurons() as u32,
        number_of_input_transfers: descriptor.neurons_of(BrickType::Input) as u32,
        number_of_output_transfers: descriptor.neurons_of(BrickType::Output) as u32,
        max_synapse_sections: descriptor.settings.max_synapse_sections,
    };
    let mut header = build_header(&counts);
    header.position = descriptor.position();

    let mut buffer = SegmentBuffer::allocate(header)?;
    let views = buffer.views_mut();
    *views.settings = descriptor.settings.to_settings();

    let mut order: Vec<usize> = (0..descriptor.bricks.len()).collect();
    order.sort_by_key(|&index| {
        let brick = &descriptor.bricks[index];
        (
            type_rank(brick.brick_type),
            brick.position[0],
            brick.position[1],
            brick.position[2],
        )
    });

    let mut neuron_pos = 0u32;
    let mut next_input_border = 0u32;
    let mut next_output_border = 0u32;
    for (slot, &index) in order.iter().enumerate() {
        let source = &descriptor.bricks[index];
        let id = BrickId(index as u32);

        let mut brick = Brick::new(id, Position::from(source.position));
        brick.is_input_brick = (source.brick_type == BrickType::Input) as u8;
        brick.is_output_brick = (source.brick_type == BrickType::Output) as u8;
        brick.neuron_pos = neuron_pos;
        brick.number_of_neurons = source.number_of_neurons;

        for neuron_id in brick.neuron_range() {
            let mut neuron = Neuron::new(id, views.settings.neuron_border);
            match source.brick_type {
                BrickType::Input => {
                    neuron.target_border_id = next_input_border;
                    next_input_border += 1;
                }
                BrickType::Output => {
                    neuron.target_border_id = next_output_border;
                    next_output_border += 1;
                }
                BrickType::Normal => {}
            }
            views.neurons[neuron_id as usize] = neuron;
        }

        views.bricks[index] = brick;
        views.brick_order[slot] = id.0;
        neuron_pos += source.number_of_neurons;
    }

    let links = link_neighbors(views.bricks);
    let dead_ends = sample_target_bricks(views.bricks, seed);

    info!(
        "[SEGMENT-INIT] {} bricks, {} neurons ({} in / {} out), {} neighbour links, {} dead ends",
        counts.number_of_bricks,
        counts.number_of_neurons,
        counts.number_of_input_transfers,
        counts.number_of_output_transfers,
        links,
        dead_ends
    );
    Ok(buffer)
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Backpropagation
//!
//! Output neurons take their delta from the output transfer buffer; every
//! other neuron collects `Σ target.delta * weight` over its chain while the
//! weights descend along the same deltas. Bricks run in reverse brick order so
//! downstream deltas exist before their sources read them.
//!
//! Deltas are `output - expected`, which makes `weight -= rate * delta` a
//! descent step. Input neurons leave their delta in the input transfer buffer
//! for the upstream segment.

use std::f32::consts::LN_2;

use kyouko_npu_segment::{NeuronId, SegmentBuffer};
use tracing::trace;

use crate::forward::synapse_trace_cfg;
use crate::stats::CycleStats;

/// Error of an output vector against its expectation: `0.5 * Σ (o - e)²`
pub fn output_error(outputs: &[f32], expected: &[f32]) -> f32 {
    0.5 * outputs
        .iter()
        .zip(expected)
        .map(|(output, expected)| (output - expected).powi(2))
        .sum::<f32>()
}

/// Run one backward cycle over a segment
///
/// With `expected` the output delta is `output - expected`. Without it the
/// output transfer buffer already holds raw deltas handed down by the next
/// segment. Consumed output slots are cleared.
pub fn process_segment_backward(segment: &mut SegmentBuffer, expected: Option<&[f32]>) -> CycleStats {
    let mut stats = CycleStats::default();
    let views = segment.views_mut();
    let settings = *views.settings;
    let learn = settings.do_learn != 0;
    let max_counter = settings.max_active_counter.max(1) as f32;
    let trace_cfg = synapse_trace_cfg();

    // Output bricks first
    for &brick_id in views.brick_order.iter() {
        let brick = &views.bricks[brick_id as usize];
        if !brick.is_output() {
            continue;
        }
        for neuron_id in brick.neuron_range() {
            let neuron = &mut views.neurons[neuron_id as usize];
            let border_id = neuron.target_border_id as usize;
            let Some(slot) = views.output_transfers.get_mut(border_id) else {
                continue;
            };
            let target = expected.and_then(|values| values.get(border_id));
            neuron.delta = match target {
                Some(&target) => *slot - target,
                None => *slot,
            };
            *slot = 0.0;
            stats.neurons_processed += 1;
        }
    }

    for &brick_id in views.brick_order.iter().rev() {
        let brick = &views.bricks[brick_id as usize];
        if brick.is_output() {
            continue;
        }

        for neuron_id in brick.neuron_range() {
            let source = NeuronId(neuron_id);
            stats.neurons_processed += 1;
            views.neurons[source.index()].delta = 0.0;

            let neuron = views.neurons[source.index()];
            let mut delta = 0.0f32;
            if neuron.is_active() {
                let mut next = neuron.target_section();
                let mut remaining_hops = views.arena.item_count();
                while let Some(section_id) = next {
                    let Some(section) = views.arena.section_mut(section_id) else {
                        break;
                    };
                    for synapse in section.synapses.iter_mut().filter(|s| s.is_live()) {
                        let target_delta = views.neurons[synapse.target_neuron_id as usize].delta;
                        delta += target_delta * synapse.weight;
                        if learn {
                            let hardening = synapse.active_counter as f32 / max_counter;
                            synapse.hardening = hardening.min(1.0);
                            synapse.weight -=
                                settings.learn_rate * (1.0 - synapse.hardening) * target_delta;
                        }
                    }
                    next = section.next_section();
                    remaining_hops = remaining_hops.saturating_sub(1);
                    if remaining_hops == 0 {
                        break;
                    }
                }

                if !brick.is_input() {
                    // d/dp log2(p + 1) with p + 1 = 2^potential
                    delta /= neuron.potential.exp2() * LN_2;
                }
                stats.neurons_fired += 1;
            }

            views.neurons[source.index()].delta = delta;
            if brick.is_input() {
                if let Some(slot) = views.input_transfers.get_mut(neuron.target_border_id as usize) {
                    *slot = delta;
                }
            }
            if trace_cfg.traces(source) {
                trace!("[BACKWARD] {} delta={:.5}", source, delta);
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::process_segment_forward;
    use crate::random_pool::RandomValuePool;
    use kyouko_npu_segment::{init_segment, BrickDescriptor, BrickType, SegmentDescriptor};

    #[test]
    fn test_output_error() {
        assert_eq!(output_error(&[1.0, 0.0], &[0.0, 0.0]), 0.5);
        assert_eq!(output_error(&[0.25], &[0.25]), 0.0);
    }

    #[test]
    fn test_backward_clears_outputs_and_sets_input_deltas() {
        let mut segment = init_segment(
            &SegmentDescriptor::new(vec![
                BrickDescriptor::new(BrickType::Input, [0, 0, 0], 2),
                BrickDescriptor::new(BrickType::Output, [1, 0, 0], 1),
            ]),
            4,
        )
        .unwrap();
        let pool = RandomValuePool::new(4096, 4);
        segment.write_inputs(&[2.0, 2.0]).unwrap();
        process_segment_forward(&mut segment, &pool);
        process_segment_forward(&mut segment, &pool);
        let output = segment.output_transfers()[0];

        process_segment_backward(&mut segment, Some(&[output + 1.0]));
        assert_eq!(segment.output_transfers()[0], 0.0);
        assert!((segment.neurons()[2].delta + 1.0).abs() < 1e-6);
        // Active input neurons pass a delta upstream
        assert_eq!(segment.input_transfers()[0], segment.neurons()[0].delta);
    }

    #[test]
    fn test_weights_descend_on_error() {
        let mut descriptor = SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 1),
            BrickDescriptor::new(BrickType::Output, [1, 0, 0], 1),
        ]);
        descriptor.settings.learn_rate = 0.01;
        let mut segment = init_segment(&descriptor, 8).unwrap();
        let pool = RandomValuePool::new(4096, 8);
        segment.write_inputs(&[1.0]).unwrap();
        process_segment_forward(&mut segment, &pool);
        segment.write_inputs(&[1.0]).unwrap();
        process_segment_forward(&mut segment, &pool);

        let expected = 0.0;
        let before = output_error(segment.output_transfers(), &[expected]);
        for _ in 0..20 {
            process_segment_backward(&mut segment, Some(&[expected]));
            segment.write_inputs(&[1.0]).unwrap();
            process_segment_forward(&mut segment, &pool);
        }
        let after = output_error(segment.output_transfers(), &[expected]);
        assert!(after <= before, "error rose from {} to {}", before, after);
    }
}

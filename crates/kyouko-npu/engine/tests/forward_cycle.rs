// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Forward Cycle Integration Tests
//!
//! Full forward / backward / pruning passes over initialised segments.

use kyouko_npu_engine::*;
use kyouko_npu_segment::*;
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

fn three_brick_segment(seed: u64) -> SegmentBuffer {
    init_segment(
        &SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
            BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 8),
            BrickDescriptor::new(BrickType::Output, [2, 0, 0], 2),
        ]),
        seed,
    )
    .unwrap()
}

/// Live synapses of a neuron's chain in traversal order
fn chain_synapses(segment: &SegmentBuffer, neuron: usize) -> Vec<Synapse> {
    let head = segment.neurons()[neuron].target_section();
    segment
        .arena()
        .chain(head)
        .flat_map(|id| segment.arena().section(id).unwrap().synapses.to_vec())
        .filter(|synapse| synapse.is_live())
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Example scenarios
// ═══════════════════════════════════════════════════════════

#[test]
fn test_every_firing_neuron_gets_a_chain() {
    let mut segment = three_brick_segment(1);
    assert_eq!(segment.header().neurons.count, 14);

    let engine = ProcessingEngine::default();
    segment.write_inputs(&[1.0; 4]).unwrap();
    let stats = engine.forward(&mut segment, 1);

    assert_eq!(stats.neurons_processed, 14);
    assert!(stats.neurons_fired >= 4);
    for neuron in segment.neurons().iter().filter(|n| n.is_active()) {
        let head = neuron.target_section().expect("firing neuron without a section");
        assert!(segment.arena().section(head).is_some());
    }
    assert_eq!(segment.arena().first_empty_offset(), None);
    assert_eq!(segment.arena().deleted_count(), 0);
}

#[test]
fn test_neuron_below_border_never_grows() {
    let mut segment = three_brick_segment(2);
    let engine = ProcessingEngine::default();
    segment.write_inputs(&[0.2; 4]).unwrap();

    let stats = engine.forward(&mut segment, 1);
    assert_eq!(stats.neurons_fired, 0);
    assert_eq!(stats.sections_created, 0);
    for neuron in segment.neurons() {
        assert_eq!(neuron.target_section_id, UNINIT_STATE_32);
    }
    assert_eq!(segment.arena().item_count(), 0);
}

#[test]
fn test_repeated_cycles_reuse_existing_chains() {
    let mut segment = three_brick_segment(3);
    let engine = ProcessingEngine::new(EngineConfig {
        pruning_interval: 0,
        ..EngineConfig::default()
    });

    segment.write_inputs(&[1.0; 4]).unwrap();
    engine.forward(&mut segment, 1);
    let heads: Vec<u32> = segment.neurons()[..4].iter().map(|n| n.target_section_id).collect();
    let first_chain = chain_synapses(&segment, 0);

    segment.write_inputs(&[1.0; 4]).unwrap();
    let stats = engine.forward(&mut segment, 2);
    let second_chain = chain_synapses(&segment, 0);

    // Same budget: input chains neither grow nor move
    let heads_after: Vec<u32> = segment.neurons()[..4].iter().map(|n| n.target_section_id).collect();
    assert_eq!(heads, heads_after);
    assert_eq!(first_chain.len(), second_chain.len());
    for (a, b) in first_chain.iter().zip(&second_chain) {
        assert_eq!(a.target_neuron_id, b.target_neuron_id);
        assert_eq!(a.border, b.border);
        assert!(b.active_counter >= a.active_counter);
    }
    assert!(stats.neurons_processed == 14);
}

#[test]
fn test_pruning_releases_unused_chains() {
    let mut segment = three_brick_segment(4);
    let engine = ProcessingEngine::new(EngineConfig {
        pruning_interval: 1,
        ..EngineConfig::default()
    });
    // Cycle 0 never prunes
    segment.write_inputs(&[1.0; 4]).unwrap();
    engine.forward(&mut segment, 0);
    assert!(segment.arena().live_count() > 0);

    // Silence the inputs; every counter decays to zero
    for cycle in 1..10 {
        segment.write_inputs(&[0.0; 4]).unwrap();
        engine.forward(&mut segment, cycle);
    }
    assert_eq!(segment.arena().live_count(), 0);
    assert_eq!(segment.arena().deleted_count(), segment.arena().item_count());
    assert!(segment.neurons().iter().all(|n| n.target_section().is_none()));

    // Regrowth draws from the free list before appending
    let deleted = segment.arena().deleted_count();
    segment.write_inputs(&[1.0; 4]).unwrap();
    process_segment_forward(&mut segment, engine.pool());
    assert!(segment.arena().live_count() > 0);
    assert!(segment.arena().deleted_count() < deleted);
}

#[test]
fn test_backward_after_forward_passes_deltas_upstream() {
    let mut segment = three_brick_segment(5);
    let engine = ProcessingEngine::default();
    segment.write_inputs(&[1.0; 4]).unwrap();
    engine.forward(&mut segment, 1);
    segment.write_inputs(&[1.0; 4]).unwrap();
    engine.forward(&mut segment, 2);

    let outputs = segment.output_transfers().to_vec();
    let expected: Vec<f32> = outputs.iter().map(|o| o + 0.5).collect();
    engine.backward(&mut segment, Some(&expected));

    assert!(segment.output_transfers().iter().all(|&v| v == 0.0));
    for neuron in &segment.neurons()[12..14] {
        assert!((neuron.delta + 0.5).abs() < 1e-5);
    }
    let upstream = segment.input_transfers();
    assert!(upstream.iter().all(|d| d.is_finite()));
}

#[test]
fn test_large_budget_fills_several_sections_in_one_cycle() {
    let mut descriptor = SegmentDescriptor::new(vec![
        BrickDescriptor::new(BrickType::Input, [0, 0, 0], 1),
        BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 8),
    ]);
    // Every new synapse takes the minimum share of 0.01
    descriptor.settings.synapse_segmentation = 1e5;
    let mut segment = init_segment(&descriptor, 4).unwrap();
    segment.write_inputs(&[5.0]).unwrap();

    let stats = process_segment_forward(&mut segment, &RandomValuePool::new(8192, 4));
    assert_eq!(stats.allocation_failures, 0);

    let head = segment.neurons()[0].target_section();
    let sections: Vec<SectionId> = segment.arena().chain(head).collect();
    assert!(sections.len() >= 16, "chain has {} sections", sections.len());
    for id in &sections[..sections.len() - 1] {
        assert_eq!(
            segment.arena().section(*id).unwrap().live_synapses(),
            SYNAPSES_PER_SECTION
        );
    }

    let consumed: f32 = chain_synapses(&segment, 0).iter().map(|s| s.border).sum();
    assert!(consumed > 4.98 && consumed <= 5.0 + 1e-3, "consumed {}", consumed);
}

#[test]
fn test_traversed_synapses_add_their_full_weight() {
    let mut segment = init_segment(
        &SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 1),
            BrickDescriptor::new(BrickType::Output, [1, 0, 0], 1),
        ]),
        9,
    )
    .unwrap();
    let pool = RandomValuePool::new(4096, 9);

    segment.write_inputs(&[2.0]).unwrap();
    process_segment_forward(&mut segment, &pool);

    // A smaller budget stops inside the existing chain, usually partway
    // through the last synapse it reaches
    segment.write_inputs(&[0.6]).unwrap();
    process_segment_forward(&mut segment, &pool);

    let traversed: Vec<Synapse> = chain_synapses(&segment, 0)
        .into_iter()
        .filter(|s| s.active_counter == 2)
        .collect();
    assert!(!traversed.is_empty());
    let weights: f32 = traversed.iter().map(|s| s.weight).sum();
    let expected = segment.settings().potential_overflow * weights;
    assert!(
        (segment.output_transfers()[0] - expected).abs() < 1e-5,
        "output {} expected {}",
        segment.output_transfers()[0],
        expected
    );
}

// ═══════════════════════════════════════════════════════════
// Budget conservation
// ═══════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_chain_budget_is_conserved(
        first in 0.6f32..6.0,
        fraction in 0.1f32..1.0,
        seed in 0u64..1000,
    ) {
        let mut segment = three_brick_segment(seed);
        let pool = RandomValuePool::new(8192, seed);

        segment.write_inputs(&[first, 0.0, 0.0, 0.0]).unwrap();
        process_segment_forward(&mut segment, &pool);

        // Every share was drawn from what was left of the budget
        let created: f32 = chain_synapses(&segment, 0).iter().map(|s| s.border).sum();
        prop_assert!(created <= first + 1e-3, "created {} for budget {}", created, first);

        let second = (first * fraction).max(0.51);
        segment.write_inputs(&[second, 0.0, 0.0, 0.0]).unwrap();
        process_segment_forward(&mut segment, &pool);

        // Synapses traversed twice overshoot by at most one share
        let traversed: Vec<f32> = chain_synapses(&segment, 0)
            .iter()
            .filter(|s| s.active_counter >= 2)
            .map(|s| s.border)
            .collect();
        let consumed: f32 = traversed.iter().sum();
        let overshoot = traversed.iter().cloned().fold(0.0f32, f32::max);
        prop_assert!(
            consumed <= second + overshoot + 1e-3,
            "consumed {} for budget {} (max share {})",
            consumed,
            second,
            overshoot
        );
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Forward Processing
//!
//! One forward cycle walks the bricks in brick order:
//!
//! 1. **Input bricks**: potential comes from the input transfer buffer; a
//!    neuron above its border feeds its chain with the raw potential
//! 2. **Normal bricks**: cool-down, refraction, threshold and `log2`
//!    squashing; only active neurons feed their chain
//! 3. **Output bricks**: potential goes to the output transfer buffer
//!
//! ## Chain propagation
//! A firing neuron spends a weight budget `net_h` along its synapse chain.
//! Every synapse consumes its fixed `border` share on each traversal, empty
//! synapses are created lazily, and a new section is appended when the chain
//! is exhausted with budget left. Memory therefore grows with the weight that
//! actually fires. A refused reservation only stops growth for this neuron in
//! this cycle.

use std::sync::OnceLock;

use kyouko_npu_segment::{
    Brick, Neuron, NeuronId, SectionId, SegmentBuffer, SegmentSettings, Synapse,
    SynapseSectionArena,
};
use tracing::{trace, warn};

use crate::random_pool::RandomValuePool;
use crate::stats::CycleStats;

/// Remaining budget below which a chain is not extended
pub const CHAIN_CONTINUE_THRESHOLD: f32 = 0.01;

/// Lower bound of the budget share of a new synapse
pub const MIN_BORDER_SHARE: f32 = 0.01;

/// Upper bound of the magnitude of a new synapse's weight
pub const INITIAL_WEIGHT_SCALE: f32 = 1.0;

/// Runtime-gated tracing config for chain propagation.
/// Enable with:
/// - KYOUKO_TRACE_SYNAPSE=1
///   Optional filter:
/// - KYOUKO_TRACE_NEURON=<u32 source neuron id>
pub(crate) struct SynapseTraceCfg {
    enabled: bool,
    neuron_filter: Option<u32>,
}

impl SynapseTraceCfg {
    #[inline]
    pub(crate) fn traces(&self, neuron: NeuronId) -> bool {
        self.enabled && self.neuron_filter.map_or(true, |id| id == neuron.0)
    }
}

pub(crate) fn synapse_trace_cfg() -> &'static SynapseTraceCfg {
    static CFG: OnceLock<SynapseTraceCfg> = OnceLock::new();
    CFG.get_or_init(|| {
        let enabled = std::env::var("KYOUKO_TRACE_SYNAPSE")
            .ok()
            .as_deref()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let neuron_filter = std::env::var("KYOUKO_TRACE_NEURON")
            .ok()
            .and_then(|v| v.parse().ok());
        SynapseTraceCfg {
            enabled,
            neuron_filter,
        }
    })
}

/// Everything a chain walk touches
struct ChainContext<'a> {
    arena: &'a mut SynapseSectionArena,
    neurons: &'a mut [Neuron],
    bricks: &'a [Brick],
    settings: &'a SegmentSettings,
    pool: &'a RandomValuePool,
    stats: CycleStats,
    exhaustion_logged: bool,
}

impl ChainContext<'_> {
    /// Reserve a section, counting and logging refusals
    fn reserve_section(&mut self, cursor: Option<u32>) -> Option<SectionId> {
        let Some(id) = self.arena.reserve() else {
            self.stats.allocation_failures += 1;
            if !self.exhaustion_logged {
                warn!(
                    "[FORWARD] synapse-section arena full ({} sections), skipping growth this cycle",
                    self.arena.max_items()
                );
                self.exhaustion_logged = true;
            }
            return None;
        };
        let start = cursor.unwrap_or_else(|| self.pool.start_position(id));
        if let Some(section) = self.arena.section_mut(id) {
            section.random_pos = start;
        }
        self.stats.sections_created += 1;
        Some(id)
    }
}

/// Run one forward cycle over a segment
pub fn process_segment_forward(segment: &mut SegmentBuffer, pool: &RandomValuePool) -> CycleStats {
    let views = segment.views_mut();
    let settings = *views.settings;
    let bricks: &[Brick] = views.bricks;
    let input_transfers: &[f32] = views.input_transfers;
    let output_transfers = views.output_transfers;

    let mut ctx = ChainContext {
        arena: views.arena,
        neurons: views.neurons,
        bricks,
        settings: &settings,
        pool,
        stats: CycleStats::default(),
        exhaustion_logged: false,
    };

    for &brick_id in views.brick_order.iter() {
        let brick = &bricks[brick_id as usize];
        for neuron_id in brick.neuron_range() {
            let id = NeuronId(neuron_id);
            ctx.stats.neurons_processed += 1;

            let fire = if brick.is_input() {
                process_input_neuron(&mut ctx.neurons[id.index()], input_transfers)
            } else if brick.is_output() {
                process_output_neuron(&mut ctx.neurons[id.index()], &settings, output_transfers);
                None
            } else {
                process_normal_neuron(&mut ctx.neurons[id.index()], &settings)
            };

            if let Some(potential) = fire {
                ctx.stats.neurons_fired += 1;
                synapse_processing(&mut ctx, id, potential, potential);
            }
        }
    }

    ctx.stats
}

/// Load the external value; returns the budget to spend if the neuron fires
#[inline]
fn process_input_neuron(neuron: &mut Neuron, input_transfers: &[f32]) -> Option<f32> {
    neuron.potential = input_transfers
        .get(neuron.target_border_id as usize)
        .copied()
        .unwrap_or(0.0);
    neuron.input = 0.0;
    neuron.active = (neuron.potential > neuron.border) as u8;
    neuron.is_active().then_some(neuron.potential)
}

#[inline]
fn process_normal_neuron(neuron: &mut Neuron, settings: &SegmentSettings) -> Option<f32> {
    neuron.potential /= settings.cool_down;
    neuron.refraction_counter >>= 1;
    if neuron.refraction_counter == 0 {
        neuron.potential = settings.potential_overflow * neuron.input;
        neuron.refraction_counter = settings.refraction_time as u16;
    }
    neuron.potential -= neuron.border;
    neuron.active = (neuron.potential > 0.0) as u8;
    neuron.input = 0.0;
    neuron.potential = (neuron.potential.max(0.0) + 1.0).log2();
    neuron.is_active().then_some(neuron.potential)
}

#[inline]
fn process_output_neuron(neuron: &mut Neuron, settings: &SegmentSettings, output_transfers: &mut [f32]) {
    neuron.potential = settings.potential_overflow * neuron.input;
    neuron.input = 0.0;
    if let Some(slot) = output_transfers.get_mut(neuron.target_border_id as usize) {
        *slot = neuron.potential;
    }
}

/// Spend `net_h` along the chain of `source`
///
/// `out_h` is the neuron's full output and scales the share drawn for newly
/// created synapses.
fn synapse_processing(ctx: &mut ChainContext<'_>, source: NeuronId, mut net_h: f32, out_h: f32) {
    let bricks = ctx.bricks;
    let source_brick = &bricks[ctx.neurons[source.index()].brick_id as usize];
    if source_brick.number_of_targets == 0 {
        return;
    }
    let tracing_enabled = synapse_trace_cfg().traces(source);
    let max_counter = ctx.settings.max_active_counter.min(u16::MAX as u32) as u16;

    let mut section_id = match ctx.neurons[source.index()].target_section() {
        Some(id) => id,
        None => {
            let Some(id) = ctx.reserve_section(None) else {
                return;
            };
            ctx.neurons[source.index()].target_section_id = id.0;
            id
        }
    };

    // A chain can never be longer than the arena's capacity
    let mut remaining_hops = ctx.arena.max_items().max(ctx.arena.item_count());
    loop {
        let Some(section) = ctx.arena.section_mut(section_id) else {
            warn!("[FORWARD] {} links to missing {}", source, section_id);
            return;
        };

        for synapse in section.synapses.iter_mut() {
            if net_h <= 0.0 {
                break;
            }

            if synapse.is_live() {
                synapse.active_counter = synapse.active_counter.saturating_add(1).min(max_counter);
                synapse.hardening = synapse.active_counter as f32 / max_counter.max(1) as f32;
            } else {
                init_synapse(
                    synapse,
                    &mut section.random_pos,
                    ctx.pool,
                    ctx.settings,
                    bricks,
                    source_brick,
                    net_h,
                    out_h,
                );
                ctx.stats.synapses_created += 1;
            }

            ctx.neurons[synapse.target_neuron_id as usize].input += synapse.weight;
            net_h -= synapse.border;

            if tracing_enabled {
                trace!(
                    "[FORWARD-SYNAPSE] {} -> Neuron({}) weight={:.4} border={:.4} net_h={:.4}",
                    source,
                    synapse.target_neuron_id,
                    synapse.weight,
                    synapse.border,
                    net_h
                );
            }
        }

        if net_h <= CHAIN_CONTINUE_THRESHOLD {
            return;
        }

        let cursor = section.random_pos;
        section_id = match section.next_section() {
            Some(next) => next,
            None => {
                let Some(next) = ctx.reserve_section(Some(cursor)) else {
                    return;
                };
                if let Some(section) = ctx.arena.section_mut(section_id) {
                    section.set_next_section(Some(next));
                }
                next
            }
        };

        remaining_hops = remaining_hops.saturating_sub(1);
        if remaining_hops == 0 {
            warn!("[FORWARD] chain of {} does not terminate", source);
            return;
        }
    }
}

/// Materialise an empty synapse slot
#[allow(clippy::too_many_arguments)]
fn init_synapse(
    synapse: &mut Synapse,
    cursor: &mut u32,
    pool: &RandomValuePool,
    settings: &SegmentSettings,
    bricks: &[Brick],
    source_brick: &Brick,
    net_h: f32,
    out_h: f32,
) {
    let border = (out_h / settings.synapse_segmentation * pool.next_unit(cursor))
        .max(MIN_BORDER_SHARE)
        .min(net_h);

    let pick = pool.next(cursor) % source_brick.number_of_targets;
    let target_brick = &bricks[source_brick.possible_target_brick_ids[pick as usize] as usize];
    let target = target_brick.neuron_pos + pool.next(cursor) % target_brick.number_of_neurons.max(1);

    let mut weight = pool.next_unit(cursor) * INITIAL_WEIGHT_SCALE;
    if pool.next_unit(cursor) < settings.sign_neg {
        weight = -weight;
    }

    *synapse = Synapse {
        weight,
        border,
        hardening: 0.0,
        target_neuron_id: target,
        active_counter: 1,
        _padding: [0; 2],
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyouko_npu_segment::{
        init_segment, BrickDescriptor, BrickType, SegmentDescriptor, UNINIT_STATE_32,
    };

    fn segment() -> SegmentBuffer {
        init_segment(
            &SegmentDescriptor::new(vec![
                BrickDescriptor::new(BrickType::Input, [0, 0, 0], 2),
                BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 4),
                BrickDescriptor::new(BrickType::Output, [2, 0, 0], 1),
            ]),
            11,
        )
        .unwrap()
    }

    #[test]
    fn test_normal_neuron_squashes_potential() {
        let settings = SegmentSettings::default();
        let mut neuron = Neuron::new(kyouko_npu_segment::BrickId(0), 0.5);
        neuron.input = 1.5;
        let fired = process_normal_neuron(&mut neuron, &settings);

        // (1.0 * 1.5 - 0.5) + 1 = 2 -> log2 = 1
        assert_eq!(fired, Some(1.0));
        assert_eq!(neuron.input, 0.0);
        assert_eq!(neuron.refraction_counter, 1);
    }

    #[test]
    fn test_negative_potential_never_produces_nan() {
        let settings = SegmentSettings::default();
        let mut neuron = Neuron::new(kyouko_npu_segment::BrickId(0), 0.5);
        neuron.input = -3.0;
        assert_eq!(process_normal_neuron(&mut neuron, &settings), None);
        assert_eq!(neuron.potential, 0.0);
    }

    #[test]
    fn test_output_neuron_writes_transfer() {
        let settings = SegmentSettings::default();
        let mut neuron = Neuron::new(kyouko_npu_segment::BrickId(0), 0.5);
        neuron.target_border_id = 1;
        neuron.input = 0.7;
        let mut outputs = [0.0; 2];
        process_output_neuron(&mut neuron, &settings, &mut outputs);
        assert_eq!(outputs, [0.0, 0.7]);
        assert_eq!(neuron.input, 0.0);
    }

    #[test]
    fn test_firing_input_neuron_grows_chain() {
        let mut segment = segment();
        let pool = RandomValuePool::new(4096, 1);
        segment.write_inputs(&[2.0, 0.0]).unwrap();

        let stats = process_segment_forward(&mut segment, &pool);
        assert!(stats.neurons_fired >= 1);
        assert!(stats.synapses_created > 0);

        let head = segment.neurons()[0].target_section().unwrap();
        assert!(segment.arena().section(head).unwrap().live_synapses() > 0);
        assert_eq!(segment.neurons()[1].target_section_id, UNINIT_STATE_32);
        assert_eq!(segment.arena().first_empty_offset(), None);
    }

    #[test]
    fn test_targets_stay_inside_sampled_bricks() {
        let mut segment = segment();
        let pool = RandomValuePool::new(4096, 2);
        segment.write_inputs(&[3.0, 3.0]).unwrap();
        process_segment_forward(&mut segment, &pool);

        // Input bricks only sample the normal and output bricks (neurons 2..7)
        let head = segment.neurons()[0].target_section();
        for id in segment.arena().chain(head) {
            for synapse in segment.arena().section(id).unwrap().synapses.iter() {
                if synapse.is_live() {
                    assert!((2..7).contains(&synapse.target_neuron_id));
                }
            }
        }
    }

    #[test]
    fn test_exhausted_arena_skips_growth() {
        let mut descriptor = SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 3),
            BrickDescriptor::new(BrickType::Output, [1, 0, 0], 1),
        ]);
        descriptor.settings.max_synapse_sections = 1;
        let mut segment = init_segment(&descriptor, 3).unwrap();
        segment.write_inputs(&[5.0, 5.0, 5.0]).unwrap();

        let stats = process_segment_forward(&mut segment, &RandomValuePool::new(1024, 3));
        assert_eq!(segment.arena().item_count(), 1);
        assert!(stats.allocation_failures >= 2);
        let heads = segment
            .neurons()
            .iter()
            .filter(|n| n.target_section().is_some())
            .count();
        assert_eq!(heads, 1);
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pruning of decayed synapses
//!
//! Every pass decays the `active_counter` of each live synapse by one.
//! Synapses that fall below `min_active_counter` are retargeted to nothing
//! and become free for lazy re-creation. Empty sections at the end of a chain
//! go back to the arena, tail first.

use kyouko_npu_segment::{SectionId, SegmentBuffer, Synapse};
use tracing::{debug, error};

use crate::stats::CycleStats;

/// Run one pruning pass over every neuron's chain
pub fn reduce_segment(segment: &mut SegmentBuffer) -> CycleStats {
    let mut stats = CycleStats::default();
    let views = segment.views_mut();
    let min_counter = views.settings.min_active_counter.min(u16::MAX as u32) as u16;
    let mut chain: Vec<SectionId> = Vec::new();

    for neuron in views.neurons.iter_mut() {
        let Some(head) = neuron.target_section() else {
            continue;
        };
        stats.neurons_processed += 1;

        chain.clear();
        chain.extend(views.arena.chain(Some(head)));

        for &id in &chain {
            let Some(section) = views.arena.section_mut(id) else {
                continue;
            };
            for synapse in section.synapses.iter_mut().filter(|s| s.is_live()) {
                synapse.active_counter = synapse.active_counter.saturating_sub(1);
                if synapse.active_counter < min_counter {
                    *synapse = Synapse::EMPTY;
                    stats.synapses_pruned += 1;
                }
            }
        }

        // Release empty tails, walking back towards the head
        while let Some(&tail) = chain.last() {
            let empty = views
                .arena
                .section(tail)
                .map_or(false, |section| section.live_synapses() == 0);
            if !empty {
                break;
            }
            if let Err(err) = views.arena.delete(tail) {
                error!("[PRUNING] failed to release {}: {}", tail, err);
                break;
            }
            chain.pop();
            stats.sections_deleted += 1;

            match chain.last() {
                Some(&previous) => {
                    if let Some(section) = views.arena.section_mut(previous) {
                        section.set_next_section(None);
                    }
                }
                None => neuron.target_section_id = SectionId::raw_or_uninit(None),
            }
        }
    }

    if stats.sections_deleted > 0 {
        debug!(
            "[PRUNING] pruned {} synapses, released {} sections",
            stats.synapses_pruned, stats.sections_deleted
        );
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyouko_npu_segment::{
        init_segment, BrickDescriptor, BrickType, SegmentDescriptor, UNINIT_STATE_32,
    };

    fn segment_with_chain() -> SegmentBuffer {
        let mut segment = init_segment(
            &SegmentDescriptor::new(vec![
                BrickDescriptor::new(BrickType::Input, [0, 0, 0], 1),
                BrickDescriptor::new(BrickType::Output, [1, 0, 0], 1),
            ]),
            0,
        )
        .unwrap();
        let arena = segment.arena_mut();
        let head = arena.reserve().unwrap();
        let tail = arena.reserve().unwrap();
        let section = arena.section_mut(head).unwrap();
        section.set_next_section(Some(tail));
        section.synapses[0] = Synapse {
            target_neuron_id: 1,
            active_counter: 5,
            ..Synapse::EMPTY
        };
        arena.section_mut(tail).unwrap().synapses[0] = Synapse {
            target_neuron_id: 1,
            active_counter: 1,
            ..Synapse::EMPTY
        };
        segment.neurons_mut()[0].target_section_id = head.0;
        segment
    }

    #[test]
    fn test_decayed_tail_is_released() {
        let mut segment = segment_with_chain();
        let stats = reduce_segment(&mut segment);

        assert_eq!(stats.synapses_pruned, 1);
        assert_eq!(stats.sections_deleted, 1);
        assert_eq!(segment.arena().live_count(), 1);
        let head = segment.neurons()[0].target_section().unwrap();
        let section = segment.arena().section(head).unwrap();
        assert_eq!(section.next_section(), None);
        assert_eq!(section.synapses[0].active_counter, 4);
    }

    #[test]
    fn test_fully_decayed_chain_unlinks_neuron() {
        let mut segment = segment_with_chain();
        for _ in 0..5 {
            reduce_segment(&mut segment);
        }
        assert_eq!(segment.neurons()[0].target_section_id, UNINIT_STATE_32);
        assert_eq!(segment.arena().live_count(), 0);
        assert_eq!(segment.arena().deleted_count(), 2);
    }

    #[test]
    fn test_released_slots_are_reused() {
        let mut segment = segment_with_chain();
        reduce_segment(&mut segment);
        let freed = segment.arena().first_empty_offset();
        assert!(freed.is_some());
        assert_eq!(segment.arena_mut().reserve(), Some(SectionId(1)));
    }
}

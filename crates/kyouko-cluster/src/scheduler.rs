// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Cycle Scheduler
//!
//! One cycle of the active task runs as one or two phases:
//!
//! ```text
//! start_forward_cycle ──▶ N × update_state ──┬─▶ finish_cycle ──▶ next cycle / next task
//!                                            │
//!              (LEARN_FORWARD, error > bound)└─▶ start_backward_cycle ──▶ N × update_state ──▶ finish_cycle
//! ```
//!
//! Every finished segment calls [`ClusterCore::update_state`], which holds the
//! scheduler mutex for the whole count-check-transition sequence, so exactly
//! one caller per batch of N performs the transition.
//!
//! Lock order is scheduler, then segment, then border exchange. Workers
//! release their segment lock before calling `update_state`.

use std::sync::Arc;

use kyouko_npu_engine::{output_error, CycleStats};
use kyouko_npu_segment::{SegmentBuffer, SnapshotWriter};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::ClusterCore;
use crate::error::{ClusterError, Result};
use crate::state::{ClusterMode, PassDirection};
use crate::task::{SegmentSnapshot, TaskResult, TaskState, TaskType};
use crate::task_queue::TaskQueue;

/// Counts finished segments of the running phase
///
/// `arrive` returns true exactly once per `total` calls and resets itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleBarrier {
    total: usize,
    finished: usize,
}

impl CycleBarrier {
    pub fn new(total: usize) -> Self {
        Self {
            total: total.max(1),
            finished: 0,
        }
    }

    pub fn arrive(&mut self) -> bool {
        self.finished += 1;
        if self.finished < self.total {
            return false;
        }
        self.finished = 0;
        true
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn reset(&mut self) {
        self.finished = 0;
    }
}

/// One segment's share of a phase
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub segment: usize,
    pub direction: PassDirection,
    /// Forward cycle counter handed to the engine's pruning schedule
    pub forward_cycle: u64,
    /// Labels for the last segment of a backward phase
    pub expected: Option<Arc<[f32]>>,
}

/// Everything guarded by the scheduler mutex
#[derive(Debug)]
pub(crate) struct SchedulerState {
    pub mode: ClusterMode,
    pub barrier: CycleBarrier,
    pub queue: TaskQueue,
    pub forward_cycles: u64,
    pub last_output_error: f32,
    pub phase_stats: CycleStats,
}

impl SchedulerState {
    pub fn new(segment_count: usize, finished_retention: usize) -> Self {
        Self {
            mode: ClusterMode::Normal,
            barrier: CycleBarrier::new(segment_count),
            queue: TaskQueue::with_retention(finished_retention),
            forward_cycles: 0,
            last_output_error: 0.0,
            phase_stats: CycleStats::default(),
        }
    }
}

impl ClusterCore {
    /// Record one finished segment; the N-th call of a phase transitions
    pub(crate) fn update_state(&self, stats: CycleStats) {
        let mut state = self.scheduler.lock();
        state.phase_stats += stats;
        if !state.barrier.arrive() {
            return;
        }

        let phase_stats = std::mem::take(&mut state.phase_stats);
        debug!(
            "[SCHEDULER] {} phase done: {} fired, {} sections created, {} released",
            state.mode,
            phase_stats.neurons_fired,
            phase_stats.sections_created,
            phase_stats.sections_deleted
        );
        if phase_stats.allocation_failures > 0 {
            warn!(
                "[SCHEDULER] {} synapse allocations failed this phase",
                phase_stats.allocation_failures
            );
        }
        self.complete_phase(&mut state);
    }

    fn complete_phase(&self, state: &mut SchedulerState) {
        if state.mode == ClusterMode::LearnForward {
            let error = self.active_output_error(state);
            state.last_output_error = error;
            if error > self.config.max_output_error {
                debug!(
                    "[SCHEDULER] output error {:.5} above {:.5}, running backward pass",
                    error, self.config.max_output_error
                );
                if let Err(err) = self.start_backward_cycle(state) {
                    self.abort_active(state, err);
                    self.schedule_next(state);
                }
                return;
            }
        }
        self.finish_cycle(state);
    }

    fn active_output_error(&self, state: &SchedulerState) -> f32 {
        let Some(labels) = state
            .queue
            .active()
            .and_then(|task| task.labels_for_cycle(task.actual_cycle))
        else {
            return 0.0;
        };
        let last = self.segments[self.last_segment()].lock();
        output_error(last.output_transfers(), labels)
    }

    /// Close the cycle of the active task and move on
    fn finish_cycle(&self, state: &mut SchedulerState) {
        state.mode = ClusterMode::Normal;

        let request_outputs = match state.queue.active() {
            Some(task) if task.task_type == TaskType::Request => Some(
                self.segments[self.last_segment()]
                    .lock()
                    .output_transfers()
                    .to_vec(),
            ),
            _ => None,
        };

        let Some(task) = state.queue.active_mut() else {
            self.schedule_next(state);
            return;
        };
        if let Some(outputs) = request_outputs {
            match &mut task.result {
                TaskResult::Values(values) => values.extend_from_slice(&outputs),
                result => *result = TaskResult::Values(outputs),
            }
        }

        let done = task.advance_cycle();
        if done || task.state == TaskState::Aborted {
            state.queue.retire_active();
            self.task_done.notify_all();
            self.schedule_next(state);
            return;
        }

        if task.task_type == TaskType::Learn {
            state.mode = ClusterMode::LearnForward;
        }
        if let Err(err) = self.start_forward_cycle(state) {
            self.abort_active(state, err);
            self.schedule_next(state);
        }
    }

    /// Activate queued tasks until one starts a cycle or the queue is empty
    pub(crate) fn schedule_next(&self, state: &mut SchedulerState) {
        loop {
            let Some(task) = state.queue.start_next() else {
                state.mode = ClusterMode::Normal;
                return;
            };
            let (task_id, task_type) = (task.id, task.task_type);
            info!("[SCHEDULER] starting {:?} task {}", task_type, task_id);

            match task_type {
                TaskType::Snapshot => {
                    let snapshots = self.snapshot_segments(task_id);
                    if let Some(task) = state.queue.active_mut() {
                        task.result = TaskResult::Snapshot(snapshots);
                        task.advance_cycle();
                    }
                    state.queue.retire_active();
                    self.task_done.notify_all();
                }
                TaskType::Learn | TaskType::Request => {
                    state.mode = if task_type == TaskType::Learn {
                        ClusterMode::LearnForward
                    } else {
                        ClusterMode::Normal
                    };
                    match self.start_forward_cycle(state) {
                        Ok(()) => return,
                        Err(err) => self.abort_active(state, err),
                    }
                }
            }
        }
    }

    fn abort_active(&self, state: &mut SchedulerState, err: ClusterError) {
        if let Some(task) = state.queue.active_mut() {
            error!("[SCHEDULER] task {} failed: {}", task.id, err);
            task.state = TaskState::Aborted;
            task.error_message = Some(err.to_string());
        }
        state.queue.retire_active();
        state.mode = ClusterMode::Normal;
        self.task_done.notify_all();
    }

    /// Queue every segment for a forward pass of the active task's current cycle
    ///
    /// Input-direction slots wait for upstream data; all other slots are ready.
    pub(crate) fn start_forward_cycle(&self, state: &mut SchedulerState) -> Result<()> {
        let input = state
            .queue
            .active()
            .map(|task| task.input_for_cycle(task.actual_cycle).to_vec())
            .unwrap_or_default();

        state.barrier.reset();
        state.forward_cycles += 1;
        for link in self.links.iter() {
            link.exchange(PassDirection::Forward).reset();
        }

        for (index, segment) in self.segments.iter().enumerate() {
            let mut segment = segment.lock();
            set_slot_readiness(&mut segment, PassDirection::Forward);
            segment.input_transfers_mut().fill(0.0);
            if index == 0 {
                segment.write_inputs(&input)?;
            }
        }

        for segment in 0..self.segments.len() {
            self.enqueue(WorkItem {
                segment,
                direction: PassDirection::Forward,
                forward_cycle: state.forward_cycles,
                expected: None,
            });
        }
        Ok(())
    }

    /// Queue every segment for a backward pass, last segment first
    ///
    /// Output-direction slots wait for downstream deltas.
    pub(crate) fn start_backward_cycle(&self, state: &mut SchedulerState) -> Result<()> {
        let labels: Option<Arc<[f32]>> = state
            .queue
            .active()
            .and_then(|task| task.labels_for_cycle(task.actual_cycle))
            .map(Arc::from);
        if labels.is_none() {
            return Err(ClusterError::InvalidTaskInput(
                "backward pass without labels".to_string(),
            ));
        }

        state.mode = ClusterMode::LearnBackward;
        state.barrier.reset();
        for link in self.links.iter() {
            link.exchange(PassDirection::Backward).reset();
        }

        let last = self.last_segment();
        for (index, segment) in self.segments.iter().enumerate() {
            let mut segment = segment.lock();
            set_slot_readiness(&mut segment, PassDirection::Backward);
            if index != last {
                segment.output_transfers_mut().fill(0.0);
            }
        }

        for segment in (0..self.segments.len()).rev() {
            self.enqueue(WorkItem {
                segment,
                direction: PassDirection::Backward,
                forward_cycle: state.forward_cycles,
                expected: if segment == last { labels.clone() } else { None },
            });
        }
        Ok(())
    }

    fn snapshot_segments(&self, snapshot_id: Uuid) -> Vec<SegmentSnapshot> {
        self.segments
            .iter()
            .enumerate()
            .map(|(segment_index, segment)| {
                let bytes = segment.lock().to_bytes();
                let file_id = Uuid::new_v4();
                let frames = SnapshotWriter::new(snapshot_id, file_id, self.config.snapshot_frame_size)
                    .frames(&bytes);
                debug!(
                    "[SCHEDULER] segment {} snapshot: {} bytes in {} frames",
                    segment_index,
                    bytes.len(),
                    frames.len()
                );
                SegmentSnapshot {
                    segment_index,
                    file_id,
                    total_size: bytes.len(),
                    frames,
                }
            })
            .collect()
    }

    fn enqueue(&self, item: WorkItem) {
        if self.ready_tx.send(item).is_err() {
            error!("[SCHEDULER] ready queue disconnected");
        }
    }
}

/// Flag the slots that must receive data before the segment may run
fn set_slot_readiness(segment: &mut SegmentBuffer, direction: PassDirection) {
    for slot in segment.slots_mut().iter_mut().filter(|slot| slot.is_in_use()) {
        let waits = match direction {
            PassDirection::Forward => slot.is_input_direction(),
            PassDirection::Backward => !slot.is_input_direction(),
        };
        slot.input_ready = u8::from(!waits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_barrier_fires_on_last_arrival() {
        let mut barrier = CycleBarrier::new(3);
        assert!(!barrier.arrive());
        assert!(!barrier.arrive());
        assert!(barrier.arrive());
        assert_eq!(barrier.finished(), 0);
    }

    #[test]
    fn test_single_segment_barrier() {
        let mut barrier = CycleBarrier::new(1);
        assert!(barrier.arrive());
        assert!(barrier.arrive());
    }

    proptest! {
        #[test]
        fn prop_barrier_transitions_once_per_batch(
            segments in 1usize..12,
            batches in 1usize..6,
            order_seed in any::<u64>(),
        ) {
            let mut barrier = CycleBarrier::new(segments);
            for batch in 0..batches {
                // Arbitrary completion order within the batch
                let mut order: Vec<usize> = (0..segments).collect();
                let mut seed = order_seed.wrapping_add(batch as u64);
                for i in (1..order.len()).rev() {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    order.swap(i, (seed >> 33) as usize % (i + 1));
                }

                let transitions: Vec<usize> = order
                    .iter()
                    .enumerate()
                    .filter(|_| barrier.arrive())
                    .map(|(position, _)| position)
                    .collect();
                prop_assert_eq!(transitions, vec![segments - 1]);
            }
        }
    }
}

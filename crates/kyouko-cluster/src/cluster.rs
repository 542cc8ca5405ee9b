// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Cluster
//!
//! A cluster owns an ordered list of segments, the border links between
//! them and one task queue. Cluster input enters the first segment, cluster
//! output leaves the last one. Links always run from a lower to a higher
//! segment index, so the segment graph is acyclic and a forward pass in
//! index order (backward in reverse) never waits forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use kyouko_npu_engine::{CycleStats, ProcessingEngine};
use kyouko_npu_segment::records::{SLOT_DIRECTION_INPUT, SLOT_DIRECTION_OUTPUT};
use kyouko_npu_segment::{
    init_segment, SegmentBuffer, SegmentDescriptor, SegmentSlot, SnapshotAssembler,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::border::{LinkExchange, LinkRoute};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::scheduler::{SchedulerState, WorkItem};
use crate::state::{ClusterMode, PassDirection};
use crate::task::{SegmentSnapshot, Task, TaskId, TaskProgress, TaskResult, TaskState};
use crate::worker_pool::WorkerPool;

/// Connects `size` outputs of segment `source` to inputs of segment `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLink {
    pub source: usize,
    pub target: usize,
    pub size: usize,
}

impl SegmentLink {
    pub fn new(source: usize, target: usize, size: usize) -> Self {
        Self { source, target, size }
    }
}

/// State shared between the cluster handle and its workers
pub(crate) struct ClusterCore {
    pub(crate) config: ClusterConfig,
    pub(crate) engine: ProcessingEngine,
    pub(crate) segments: Vec<Mutex<SegmentBuffer>>,
    pub(crate) links: Vec<LinkExchange>,
    /// Link indices per segment, entering and leaving it
    inbound: Vec<Vec<usize>>,
    outbound: Vec<Vec<usize>>,
    pub(crate) scheduler: Mutex<SchedulerState>,
    pub(crate) task_done: Condvar,
    pub(crate) ready_tx: Sender<WorkItem>,
    pub(crate) ready_rx: Receiver<WorkItem>,
}

fn claim_slot(segment: &mut SegmentBuffer, slot: SegmentSlot, side: &str) -> Result<usize> {
    let slots = segment.slots_mut();
    let index = slots
        .iter()
        .position(|existing| !existing.is_in_use())
        .ok_or_else(|| ClusterError::InvalidLink(format!("{} segment has no free slot", side)))?;
    slots[index] = slot;
    Ok(index)
}

impl ClusterCore {
    fn new(
        descriptors: &[SegmentDescriptor],
        links: &[SegmentLink],
        config: ClusterConfig,
    ) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(ClusterError::NoSegments);
        }

        let mut segments = descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                init_segment(descriptor, config.engine.random_seed ^ index as u64)
            })
            .collect::<kyouko_npu_segment::Result<Vec<_>>>()?;

        let count = segments.len();
        let mut output_used = vec![0usize; count];
        let mut input_used = vec![0usize; count];
        let mut routes = Vec::with_capacity(links.len());

        for link in links {
            if link.source >= link.target || link.target >= count {
                return Err(ClusterError::InvalidLink(format!(
                    "{} -> {} must run forward between segments 0..{}",
                    link.source, link.target, count
                )));
            }
            if link.size == 0 {
                return Err(ClusterError::InvalidLink(format!(
                    "{} -> {} carries no values",
                    link.source, link.target
                )));
            }
            let source_offset = output_used[link.source];
            let target_offset = input_used[link.target];
            let output_len = segments[link.source].output_transfers().len();
            let input_len = segments[link.target].input_transfers().len();
            if source_offset + link.size > output_len || target_offset + link.size > input_len {
                return Err(ClusterError::InvalidLink(format!(
                    "{} -> {} of size {} exceeds the transfer buffers ({} outputs left, {} inputs left)",
                    link.source,
                    link.target,
                    link.size,
                    output_len - source_offset,
                    input_len - target_offset
                )));
            }

            let source_slot = claim_slot(
                &mut segments[link.source],
                SegmentSlot {
                    target_segment_id: link.target as u32,
                    number_of_items: link.size as u32,
                    in_use: 1,
                    input_ready: 1,
                    direction: SLOT_DIRECTION_OUTPUT,
                    ..SegmentSlot::unused()
                },
                "source",
            )?;
            let target_slot = claim_slot(
                &mut segments[link.target],
                SegmentSlot {
                    target_segment_id: link.source as u32,
                    target_slot_id: source_slot as u32,
                    number_of_items: link.size as u32,
                    in_use: 1,
                    input_ready: 1,
                    direction: SLOT_DIRECTION_INPUT,
                    ..SegmentSlot::unused()
                },
                "target",
            )?;
            segments[link.source].slots_mut()[source_slot].target_slot_id = target_slot as u32;

            output_used[link.source] += link.size;
            input_used[link.target] += link.size;
            routes.push(LinkRoute {
                source_segment: link.source,
                source_slot,
                source_offset,
                target_segment: link.target,
                target_slot,
                target_offset,
                size: link.size,
            });
        }

        let mut inbound = vec![Vec::new(); count];
        let mut outbound = vec![Vec::new(); count];
        for (index, route) in routes.iter().enumerate() {
            outbound[route.source_segment].push(index);
            inbound[route.target_segment].push(index);
        }

        let (ready_tx, ready_rx) = channel::unbounded();
        info!(
            "[CLUSTER] created cluster with {} segments and {} links",
            count,
            routes.len()
        );
        let retention = config.finished_task_retention;
        Ok(Self {
            engine: ProcessingEngine::new(config.engine),
            config,
            segments: segments.into_iter().map(Mutex::new).collect(),
            links: routes.into_iter().map(LinkExchange::new).collect(),
            inbound,
            outbound,
            scheduler: Mutex::new(SchedulerState::new(count, retention)),
            task_done: Condvar::new(),
            ready_tx,
            ready_rx,
        })
    }

    pub(crate) fn last_segment(&self) -> usize {
        self.segments.len() - 1
    }

    /// Run one queued work item; returns false if its segment was not ready
    /// and the item went back into the queue
    pub(crate) fn process_item(&self, item: WorkItem) -> bool {
        let stats = {
            let mut segment = self.segments[item.segment].lock();
            if !self.pull_borders(item.segment, item.direction, &mut segment) {
                drop(segment);
                if self.ready_tx.send(item).is_err() {
                    warn!("[CLUSTER] ready queue disconnected while re-queueing");
                }
                return false;
            }
            self.run_segment(&item, &mut segment)
        };
        self.update_state(stats);
        true
    }

    fn run_segment(&self, item: &WorkItem, segment: &mut SegmentBuffer) -> CycleStats {
        match item.direction {
            PassDirection::Forward => {
                let stats = self.engine.forward(segment, item.forward_cycle);
                for &link in &self.outbound[item.segment] {
                    let exchange = &self.links[link];
                    let route = exchange.route;
                    let outputs = &segment.output_transfers()
                        [route.source_offset..route.source_offset + route.size];
                    exchange.exchange(PassDirection::Forward).publish(outputs);
                }
                stats
            }
            PassDirection::Backward => {
                let stats = self.engine.backward(segment, item.expected.as_deref());
                for &link in &self.inbound[item.segment] {
                    let exchange = &self.links[link];
                    let route = exchange.route;
                    let deltas = &segment.input_transfers()
                        [route.target_offset..route.target_offset + route.size];
                    exchange.exchange(PassDirection::Backward).publish(deltas);
                }
                stats
            }
        }
    }

    /// Copy published border data into the segment's transfer buffers
    ///
    /// Returns true once every in-use slot is ready.
    fn pull_borders(
        &self,
        index: usize,
        direction: PassDirection,
        segment: &mut SegmentBuffer,
    ) -> bool {
        let incoming = match direction {
            PassDirection::Forward => &self.inbound[index],
            PassDirection::Backward => &self.outbound[index],
        };
        for &link in incoming {
            let exchange = &self.links[link];
            let route = exchange.route;
            let (slot, offset) = match direction {
                PassDirection::Forward => (route.target_slot, route.target_offset),
                PassDirection::Backward => (route.source_slot, route.source_offset),
            };
            if segment.slots()[slot].is_input_ready() {
                continue;
            }
            let target = match direction {
                PassDirection::Forward => segment.input_transfers_mut(),
                PassDirection::Backward => segment.output_transfers_mut(),
            };
            if exchange
                .exchange(direction)
                .take_into(&mut target[offset..offset + route.size])
            {
                segment.slots_mut()[slot].input_ready = 1;
            }
        }
        segment
            .slots()
            .iter()
            .all(|slot| !slot.is_in_use() || slot.is_input_ready())
    }

    /// Drain the ready queue on the calling thread
    pub(crate) fn run_pending(&self) -> usize {
        let mut processed = 0;
        while let Ok(item) = self.ready_rx.try_recv() {
            if self.process_item(item) {
                processed += 1;
            } else {
                std::thread::yield_now();
            }
        }
        processed
    }
}

/// Handle to a cluster of segments
///
/// Without started workers, tasks advance only through [`Cluster::run_pending`]
/// (which [`Cluster::request`] calls itself).
pub struct Cluster {
    core: Arc<ClusterCore>,
    workers: Option<WorkerPool>,
}

impl Cluster {
    /// Build all segments and their links
    ///
    /// # Errors
    ///
    /// `NoSegments`, `InvalidLink`, or the segment error of a bad descriptor
    pub fn new(
        descriptors: &[SegmentDescriptor],
        links: &[SegmentLink],
        config: ClusterConfig,
    ) -> Result<Self> {
        Ok(Self {
            core: Arc::new(ClusterCore::new(descriptors, links, config)?),
            workers: None,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.core.config
    }

    pub fn segment_count(&self) -> usize {
        self.core.segments.len()
    }

    /// Values consumed per cycle by the first segment
    pub fn input_size(&self) -> usize {
        self.core.segments[0].lock().input_transfers().len()
    }

    /// Values produced per cycle by the last segment
    pub fn output_size(&self) -> usize {
        self.core.segments[self.core.last_segment()]
            .lock()
            .output_transfers()
            .len()
    }

    pub fn mode(&self) -> ClusterMode {
        self.core.scheduler.lock().mode
    }

    /// Error of the latest learn forward pass
    pub fn last_output_error(&self) -> f32 {
        self.core.scheduler.lock().last_output_error
    }

    /// Inspect one segment under its lock
    pub fn with_segment<R>(&self, index: usize, f: impl FnOnce(&SegmentBuffer) -> R) -> Option<R> {
        self.core.segments.get(index).map(|segment| f(&*segment.lock()))
    }

    /// Spawn the worker pool
    pub fn start_workers(&mut self) -> Result<()> {
        if self.workers.is_some() {
            return Ok(());
        }
        let threads = self.core.config.resolved_worker_threads();
        self.workers = Some(WorkerPool::start(Arc::clone(&self.core), threads)?);
        Ok(())
    }

    pub fn stop_workers(&mut self) {
        if let Some(mut workers) = self.workers.take() {
            workers.stop();
        }
    }

    pub fn has_workers(&self) -> bool {
        self.workers.is_some()
    }

    /// Process queued segments on the calling thread until the queue is empty
    pub fn run_pending(&self) -> usize {
        self.core.run_pending()
    }

    fn check_input_size(&self, inputs_per_cycle: usize) -> Result<()> {
        let input_size = self.input_size();
        if inputs_per_cycle > input_size {
            return Err(ClusterError::InvalidTaskInput(format!(
                "{} inputs per cycle, first segment takes {}",
                inputs_per_cycle, input_size
            )));
        }
        Ok(())
    }

    pub fn add_learn_task(
        &self,
        inputs: Vec<f32>,
        labels: Vec<f32>,
        inputs_per_cycle: usize,
        outputs_per_cycle: usize,
        cycles: u64,
    ) -> Result<TaskId> {
        self.check_input_size(inputs_per_cycle)?;
        let output_size = self.output_size();
        if outputs_per_cycle != output_size {
            return Err(ClusterError::InvalidTaskInput(format!(
                "{} labels per cycle, last segment produces {}",
                outputs_per_cycle, output_size
            )));
        }
        let mut state = self.core.scheduler.lock();
        let id = state
            .queue
            .add_learn_task(inputs, labels, inputs_per_cycle, outputs_per_cycle, cycles)?;
        self.core.schedule_next(&mut state);
        Ok(id)
    }

    pub fn add_request_task(
        &self,
        inputs: Vec<f32>,
        inputs_per_cycle: usize,
        cycles: u64,
    ) -> Result<TaskId> {
        self.check_input_size(inputs_per_cycle)?;
        let mut state = self.core.scheduler.lock();
        let id = state.queue.add_request_task(inputs, inputs_per_cycle, cycles)?;
        self.core.schedule_next(&mut state);
        Ok(id)
    }

    pub fn add_snapshot_task(&self) -> TaskId {
        let mut state = self.core.scheduler.lock();
        let id = state.queue.add_snapshot_task();
        self.core.schedule_next(&mut state);
        id
    }

    pub fn get_progress(&self, id: TaskId) -> Option<TaskProgress> {
        self.core.scheduler.lock().queue.get_progress(id)
    }

    pub fn is_finished(&self, id: TaskId) -> bool {
        self.core.scheduler.lock().queue.is_finished(id)
    }

    /// Remove a queued task, abort the active one, or forget a finished one
    pub fn remove_task(&self, id: TaskId) -> Result<TaskState> {
        self.core.scheduler.lock().queue.remove_task(id)
    }

    /// Take the result of a finished task
    pub fn take_result(&self, id: TaskId) -> Result<TaskResult> {
        let mut state = self.core.scheduler.lock();
        let progress = state
            .queue
            .get_progress(id)
            .ok_or(ClusterError::TaskNotFound(id))?;
        if !progress.state.is_terminal() {
            return Err(ClusterError::Busy(format!("task {} is {}", id, progress.state)));
        }
        let task = state
            .queue
            .take_finished(id)
            .ok_or(ClusterError::TaskNotFound(id))?;
        finished_result(task)
    }

    /// Block until a task reaches a terminal state, then take it
    ///
    /// Without workers the pending work runs on this thread. On timeout the
    /// task is removed (or aborted if active).
    pub fn wait_for_task(&self, id: TaskId, timeout: Duration) -> Result<TaskResult> {
        let deadline = Instant::now() + timeout;
        if self.workers.is_none() {
            self.run_pending();
        }

        let mut state = self.core.scheduler.lock();
        loop {
            let progress = state
                .queue
                .get_progress(id)
                .ok_or(ClusterError::TaskNotFound(id))?;
            if progress.state.is_terminal() {
                let task = state
                    .queue
                    .take_finished(id)
                    .ok_or(ClusterError::TaskNotFound(id))?;
                return finished_result(task);
            }

            let now = Instant::now();
            if now >= deadline || self.workers.is_none() {
                let _ = state.queue.remove_task(id);
                warn!("[CLUSTER] task {} timed out after {:?}", id, timeout);
                return Err(ClusterError::Timeout(timeout));
            }
            self.core
                .task_done
                .wait_for(&mut state, deadline.saturating_duration_since(now));
        }
    }

    /// Run `cycles` forward cycles and return the outputs of every cycle
    ///
    /// Uses the configured request timeout when `timeout` is `None`.
    pub fn request(
        &self,
        inputs: Vec<f32>,
        inputs_per_cycle: usize,
        cycles: u64,
        timeout: Option<Duration>,
    ) -> Result<Vec<f32>> {
        let id = self.add_request_task(inputs, inputs_per_cycle, cycles)?;
        let timeout = timeout.unwrap_or(self.core.config.request_timeout);
        match self.wait_for_task(id, timeout)? {
            TaskResult::Values(values) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    /// Snapshot every segment between cycles
    pub fn snapshot(&self, timeout: Option<Duration>) -> Result<Vec<SegmentSnapshot>> {
        let id = self.add_snapshot_task();
        let timeout = timeout.unwrap_or(self.core.config.request_timeout);
        match self.wait_for_task(id, timeout)? {
            TaskResult::Snapshot(snapshots) => Ok(snapshots),
            _ => Ok(Vec::new()),
        }
    }

    /// Replace a segment with a snapshot taken from a compatible cluster
    ///
    /// # Errors
    ///
    /// `Busy` while tasks are queued or running, `InvalidLink` if the
    /// transfer sizes differ from the segment being replaced.
    pub fn restore_segment(&self, snapshot: &SegmentSnapshot) -> Result<()> {
        let state = self.core.scheduler.lock();
        if !state.queue.is_idle() {
            return Err(ClusterError::Busy(
                "segments can only be restored while no task is queued".to_string(),
            ));
        }
        let target = self
            .core
            .segments
            .get(snapshot.segment_index)
            .ok_or_else(|| {
                ClusterError::InvalidLink(format!("no segment {}", snapshot.segment_index))
            })?;

        let mut assembler = SnapshotAssembler::new(snapshot.file_id, snapshot.total_size);
        for frame in &snapshot.frames {
            assembler.accept(frame)?;
        }
        let restored = SegmentBuffer::from_bytes(&assembler.finish()?)?;

        let mut segment = target.lock();
        if restored.input_transfers().len() != segment.input_transfers().len()
            || restored.output_transfers().len() != segment.output_transfers().len()
        {
            return Err(ClusterError::InvalidLink(format!(
                "snapshot of segment {} has different transfer sizes",
                snapshot.segment_index
            )));
        }
        let slots = segment.slots().to_vec();
        *segment = restored;
        segment.slots_mut().copy_from_slice(&slots);
        debug!("[CLUSTER] restored segment {}", snapshot.segment_index);
        Ok(())
    }
}

fn finished_result(task: Task) -> Result<TaskResult> {
    match task.state {
        TaskState::Aborted => Err(ClusterError::TaskAborted(task.id)),
        _ => Ok(task.result),
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyouko_npu_segment::{BrickDescriptor, BrickType};

    fn descriptor(inputs: u32, outputs: u32) -> SegmentDescriptor {
        SegmentDescriptor::new(vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], inputs),
            BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 4),
            BrickDescriptor::new(BrickType::Output, [2, 0, 0], outputs),
        ])
    }

    #[test]
    fn test_links_claim_slots_on_both_sides() {
        let cluster = Cluster::new(
            &[descriptor(2, 3), descriptor(3, 1)],
            &[SegmentLink::new(0, 1, 3)],
            ClusterConfig::default(),
        )
        .unwrap();

        let source = cluster.with_segment(0, |s| s.slots()[0]).unwrap();
        let target = cluster.with_segment(1, |s| s.slots()[0]).unwrap();
        assert!(source.is_in_use() && !source.is_input_direction());
        assert!(target.is_in_use() && target.is_input_direction());
        assert_eq!(source.target_segment_id, 1);
        assert_eq!(target.target_slot_id, 0);
        assert_eq!(source.number_of_items, 3);
    }

    #[test]
    fn test_invalid_links_are_rejected() {
        let descriptors = [descriptor(2, 3), descriptor(3, 1)];
        let config = ClusterConfig::default;
        assert!(matches!(
            Cluster::new(&descriptors, &[SegmentLink::new(1, 0, 1)], config()),
            Err(ClusterError::InvalidLink(_))
        ));
        assert!(matches!(
            Cluster::new(&descriptors, &[SegmentLink::new(0, 1, 4)], config()),
            Err(ClusterError::InvalidLink(_))
        ));
        assert!(matches!(
            Cluster::new(&[], &[], config()),
            Err(ClusterError::NoSegments)
        ));
    }

    #[test]
    fn test_task_size_checks() {
        let cluster = Cluster::new(&[descriptor(2, 1)], &[], ClusterConfig::default()).unwrap();
        assert!(cluster.add_request_task(vec![0.0; 3], 3, 1).is_err());
        assert!(cluster.add_learn_task(vec![0.0; 2], vec![0.0; 2], 2, 2, 1).is_err());
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! FIFO task queue with a single active task
//!
//! The queue itself is not synchronised; the cluster keeps it behind the
//! scheduler mutex together with the cycle barrier.

use std::collections::VecDeque;

use ahash::AHashMap;
use chrono::Utc;
use tracing::{debug, info};

use crate::error::{ClusterError, Result};
use crate::task::{Task, TaskId, TaskProgress, TaskState, TaskType};

/// Finished tasks kept by default before the oldest is dropped
pub const DEFAULT_FINISHED_RETENTION: usize = 1024;

#[derive(Debug)]
pub struct TaskQueue {
    queued: VecDeque<Task>,
    active: Option<Task>,
    finished: AHashMap<TaskId, Task>,
    /// Retirement order of `finished`; may hold ids already taken
    finished_order: VecDeque<TaskId>,
    retention: usize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }
}

fn check_buffer(name: &str, len: usize, per_cycle: usize, cycles: u64) -> Result<()> {
    if per_cycle == 0 {
        return Err(ClusterError::InvalidTaskInput(format!(
            "{} per cycle must be > 0",
            name
        )));
    }
    let needed = (cycles as usize).checked_mul(per_cycle).ok_or_else(|| {
        ClusterError::InvalidTaskInput(format!("{} cycles overflow the {} buffer", cycles, name))
    })?;
    if len < needed {
        return Err(ClusterError::InvalidTaskInput(format!(
            "{} buffer holds {} values, {} cycles of {} need {}",
            name, len, cycles, per_cycle, needed
        )));
    }
    Ok(())
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that keeps at most `retention` uncollected finished tasks
    pub fn with_retention(retention: usize) -> Self {
        Self {
            queued: VecDeque::new(),
            active: None,
            finished: AHashMap::new(),
            finished_order: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    /// Queue a learn task
    ///
    /// # Errors
    ///
    /// `InvalidTaskInput` if a buffer is shorter than `cycles` times its per-cycle size
    pub fn add_learn_task(
        &mut self,
        inputs: Vec<f32>,
        labels: Vec<f32>,
        inputs_per_cycle: usize,
        outputs_per_cycle: usize,
        cycles: u64,
    ) -> Result<TaskId> {
        if cycles == 0 {
            return Err(ClusterError::InvalidTaskInput("cycles must be > 0".to_string()));
        }
        check_buffer("input", inputs.len(), inputs_per_cycle, cycles)?;
        check_buffer("label", labels.len(), outputs_per_cycle, cycles)?;

        let mut task = Task::new(TaskType::Learn, cycles);
        task.inputs = inputs;
        task.labels = labels;
        task.inputs_per_cycle = inputs_per_cycle;
        task.outputs_per_cycle = outputs_per_cycle;
        Ok(self.push(task))
    }

    /// Queue a request task
    pub fn add_request_task(
        &mut self,
        inputs: Vec<f32>,
        inputs_per_cycle: usize,
        cycles: u64,
    ) -> Result<TaskId> {
        if cycles == 0 {
            return Err(ClusterError::InvalidTaskInput("cycles must be > 0".to_string()));
        }
        check_buffer("input", inputs.len(), inputs_per_cycle, cycles)?;

        let mut task = Task::new(TaskType::Request, cycles);
        task.inputs = inputs;
        task.inputs_per_cycle = inputs_per_cycle;
        Ok(self.push(task))
    }

    pub fn add_snapshot_task(&mut self) -> TaskId {
        self.push(Task::new(TaskType::Snapshot, 1))
    }

    fn push(&mut self, task: Task) -> TaskId {
        let id = task.id;
        debug!("[TASK-QUEUE] queued {:?} task {}", task.task_type, id);
        self.queued.push_back(task);
        id
    }

    fn find(&self, id: TaskId) -> Option<&Task> {
        if let Some(task) = self.active.as_ref().filter(|task| task.id == id) {
            return Some(task);
        }
        self.finished
            .get(&id)
            .or_else(|| self.queued.iter().find(|task| task.id == id))
    }

    pub fn get_progress(&self, id: TaskId) -> Option<TaskProgress> {
        self.find(id).map(Task::progress)
    }

    pub fn is_finished(&self, id: TaskId) -> bool {
        self.find(id)
            .map_or(false, |task| task.state == TaskState::Finished)
    }

    /// Cancel or forget a task
    ///
    /// A queued task is removed, the active task is flagged `Aborted` and keeps
    /// running until its current cycle completes, a finished task is dropped.
    /// Returns the state the task had.
    pub fn remove_task(&mut self, id: TaskId) -> Result<TaskState> {
        if let Some(position) = self.queued.iter().position(|task| task.id == id) {
            self.queued.remove(position);
            info!("[TASK-QUEUE] removed queued task {}", id);
            return Ok(TaskState::Queued);
        }
        if let Some(task) = self.active.as_mut().filter(|task| task.id == id) {
            let previous = task.state;
            task.state = TaskState::Aborted;
            task.error_message = Some("aborted by caller".to_string());
            info!("[TASK-QUEUE] aborting active task {}", id);
            return Ok(previous);
        }
        self.finished
            .remove(&id)
            .map(|task| task.state)
            .ok_or(ClusterError::TaskNotFound(id))
    }

    /// Promote the oldest queued task to active
    ///
    /// Returns `None` if a task is already active or nothing is queued.
    pub fn start_next(&mut self) -> Option<&mut Task> {
        if self.active.is_some() {
            return None;
        }
        let mut task = self.queued.pop_front()?;
        task.state = TaskState::Active;
        task.started_at = Some(Utc::now());
        debug!("[TASK-QUEUE] activated {:?} task {}", task.task_type, task.id);
        self.active = Some(task);
        self.active.as_mut()
    }

    pub fn active(&self) -> Option<&Task> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Task> {
        self.active.as_mut()
    }

    /// Move the active task to the finished set
    ///
    /// An aborted task keeps its state; anything else becomes `Finished`.
    pub fn retire_active(&mut self) -> Option<TaskId> {
        let mut task = self.active.take()?;
        if task.state != TaskState::Aborted {
            task.state = TaskState::Finished;
        }
        task.finished_at = Some(Utc::now());
        let id = task.id;
        info!(
            "[TASK-QUEUE] task {} {} after {}/{} cycles",
            id, task.state, task.actual_cycle, task.number_of_cycles
        );
        self.finished.insert(id, task);
        self.finished_order.push_back(id);
        self.evict_finished();
        Some(id)
    }

    /// Drop the oldest finished tasks beyond the retention limit
    fn evict_finished(&mut self) {
        while self.finished.len() > self.retention {
            let Some(oldest) = self.finished_order.pop_front() else {
                break;
            };
            if self.finished.remove(&oldest).is_some() {
                debug!("[TASK-QUEUE] dropped uncollected task {}", oldest);
            }
        }
        if self.finished_order.len() > self.retention.saturating_mul(2) {
            let finished = &self.finished;
            self.finished_order.retain(|id| finished.contains_key(id));
        }
    }

    /// Remove and return a task that reached a terminal state
    pub fn take_finished(&mut self, id: TaskId) -> Option<Task> {
        self.finished.remove(&id)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queued.is_empty()
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tasks processed by a cluster
//!
//! A task lives through `Queued → Active → Finished`, or leaves early as
//! `Queued → removed` / `Active → Aborted`.

use std::fmt;

use chrono::{DateTime, Utc};
use kyouko_npu_segment::SnapshotFrame;
use serde::Serialize;
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskType {
    /// Forward cycles with labels, backward pass while the error is too high
    Learn,
    /// Forward cycles only, outputs collected per cycle
    Request,
    /// Snapshot of every segment between cycles
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Queued,
    Active,
    Finished,
    Aborted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Aborted)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "QUEUED"),
            TaskState::Active => write!(f, "ACTIVE"),
            TaskState::Finished => write!(f, "FINISHED"),
            TaskState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Snapshot stream of one segment, cut into transport frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSnapshot {
    pub segment_index: usize,
    pub file_id: Uuid,
    pub total_size: usize,
    pub frames: Vec<SnapshotFrame>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaskResult {
    #[default]
    None,
    /// Outputs of the last segment, `outputs_per_cycle` values per cycle
    Values(Vec<f32>),
    Snapshot(Vec<SegmentSnapshot>),
}

/// Externally visible task status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub actual_cycle: u64,
    pub number_of_cycles: u64,
    pub percentage_finished: f32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub inputs: Vec<f32>,
    pub labels: Vec<f32>,
    pub inputs_per_cycle: usize,
    pub outputs_per_cycle: usize,
    pub number_of_cycles: u64,
    pub actual_cycle: u64,
    pub percentage_finished: f32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: TaskResult,
    pub error_message: Option<String>,
}

impl Task {
    pub(crate) fn new(task_type: TaskType, number_of_cycles: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            state: TaskState::Queued,
            inputs: Vec::new(),
            labels: Vec::new(),
            inputs_per_cycle: 0,
            outputs_per_cycle: 0,
            number_of_cycles,
            actual_cycle: 0,
            percentage_finished: 0.0,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: TaskResult::None,
            error_message: None,
        }
    }

    /// Input values fed into the first segment in `cycle`
    pub fn input_for_cycle(&self, cycle: u64) -> &[f32] {
        slice_for_cycle(&self.inputs, self.inputs_per_cycle, cycle)
    }

    /// Expected outputs of `cycle`, learn tasks only
    pub fn labels_for_cycle(&self, cycle: u64) -> Option<&[f32]> {
        match self.task_type {
            TaskType::Learn => Some(slice_for_cycle(&self.labels, self.outputs_per_cycle, cycle)),
            _ => None,
        }
    }

    /// Count one completed cycle; true once every cycle ran
    pub fn advance_cycle(&mut self) -> bool {
        self.actual_cycle += 1;
        self.percentage_finished = if self.number_of_cycles == 0 {
            1.0
        } else {
            (self.actual_cycle as f32 / self.number_of_cycles as f32).min(1.0)
        };
        self.actual_cycle >= self.number_of_cycles
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            id: self.id,
            task_type: self.task_type,
            state: self.state,
            actual_cycle: self.actual_cycle,
            number_of_cycles: self.number_of_cycles,
            percentage_finished: self.percentage_finished,
            queued_at: self.queued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error_message: self.error_message.clone(),
        }
    }
}

fn slice_for_cycle(values: &[f32], per_cycle: usize, cycle: u64) -> &[f32] {
    let start = (cycle as usize).saturating_mul(per_cycle).min(values.len());
    let end = start.saturating_add(per_cycle).min(values.len());
    &values[start..end]
}

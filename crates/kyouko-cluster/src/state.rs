// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cluster processing modes and pass directions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the cluster's current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterMode {
    /// Forward only (request tasks, or idle)
    #[default]
    Normal,
    /// Forward pass of a learn cycle
    LearnForward,
    /// Backward pass of a learn cycle
    LearnBackward,
}

impl ClusterMode {
    pub fn direction(self) -> PassDirection {
        match self {
            ClusterMode::Normal | ClusterMode::LearnForward => PassDirection::Forward,
            ClusterMode::LearnBackward => PassDirection::Backward,
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterMode::Normal => write!(f, "NORMAL"),
            ClusterMode::LearnForward => write!(f, "LEARN_FORWARD"),
            ClusterMode::LearnBackward => write!(f, "LEARN_BACKWARD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassDirection {
    Forward,
    Backward,
}

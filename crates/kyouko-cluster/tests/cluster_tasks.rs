// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Cluster Task Integration Tests
//!
//! Request, learn and snapshot tasks driven on the calling thread and by the
//! worker pool.

use std::time::Duration;

use kyouko_cluster::*;
use kyouko_npu_segment::{BrickDescriptor, BrickType, SegmentDescriptor};

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

fn segment(inputs: u32, normals: u32, outputs: u32) -> SegmentDescriptor {
    SegmentDescriptor::new(vec![
        BrickDescriptor::new(BrickType::Input, [0, 0, 0], inputs),
        BrickDescriptor::new(BrickType::Normal, [1, 0, 0], normals),
        BrickDescriptor::new(BrickType::Output, [2, 0, 0], outputs),
    ])
}

fn two_segment_cluster(config: ClusterConfig) -> Cluster {
    Cluster::new(
        &[segment(4, 8, 3), segment(3, 8, 2)],
        &[SegmentLink::new(0, 1, 3)],
        config,
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════════
// Request tasks
// ═══════════════════════════════════════════════════════════

#[test]
fn test_request_returns_outputs_of_every_cycle() {
    let cluster = Cluster::new(&[segment(4, 8, 2)], &[], ClusterConfig::default()).unwrap();
    let outputs = cluster.request(vec![1.0; 12], 4, 3, None).unwrap();

    assert_eq!(outputs.len(), 3 * cluster.output_size());
    assert!(outputs.iter().all(|v| v.is_finite()));
    assert_eq!(cluster.mode(), ClusterMode::Normal);
}

#[test]
fn test_linked_segment_receives_upstream_outputs() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    cluster.request(vec![1.0; 8], 4, 2, None).unwrap();

    let upstream = cluster
        .with_segment(0, |s| s.output_transfers().to_vec())
        .unwrap();
    let downstream = cluster
        .with_segment(1, |s| s.input_transfers().to_vec())
        .unwrap();
    assert_eq!(&upstream[..3], &downstream[..3]);
}

#[test]
fn test_request_with_workers() {
    let mut cluster = two_segment_cluster(ClusterConfig {
        worker_threads: 2,
        ..ClusterConfig::default()
    });
    cluster.start_workers().unwrap();
    assert!(cluster.has_workers());

    let outputs = cluster
        .request(vec![0.8; 20], 4, 5, Some(Duration::from_secs(10)))
        .unwrap();
    assert_eq!(outputs.len(), 5 * 2);

    cluster.stop_workers();
    assert!(!cluster.has_workers());
}

// ═══════════════════════════════════════════════════════════
// Learn tasks
// ═══════════════════════════════════════════════════════════

#[test]
fn test_learn_task_runs_backward_when_error_is_high() {
    let cluster = two_segment_cluster(ClusterConfig {
        max_output_error: 0.0,
        ..ClusterConfig::default()
    });
    let id = cluster
        .add_learn_task(vec![1.0; 16], vec![5.0; 8], 4, 2, 4)
        .unwrap();
    assert_eq!(cluster.mode(), ClusterMode::LearnForward);

    cluster.run_pending();

    let progress = cluster.get_progress(id).unwrap();
    assert_eq!(progress.state, TaskState::Finished);
    assert_eq!(progress.actual_cycle, 4);
    assert_eq!(progress.percentage_finished, 1.0);
    assert!(cluster.is_finished(id));
    assert!(cluster.last_output_error() > 0.0);
    assert_eq!(cluster.mode(), ClusterMode::Normal);
    assert_eq!(cluster.take_result(id).unwrap(), TaskResult::None);
}

#[test]
fn test_learn_labels_must_match_output_size() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    let result = cluster.add_learn_task(vec![1.0; 4], vec![0.0; 3], 4, 3, 1);
    assert!(matches!(result, Err(ClusterError::InvalidTaskInput(_))));
}

// ═══════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════

#[test]
fn test_queued_task_is_removed_immediately() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    let active = cluster.add_request_task(vec![1.0; 4], 4, 1).unwrap();
    let queued = cluster.add_request_task(vec![1.0; 4], 4, 1).unwrap();
    assert_eq!(cluster.get_progress(queued).unwrap().state, TaskState::Queued);

    assert_eq!(cluster.remove_task(queued).unwrap(), TaskState::Queued);
    cluster.run_pending();

    assert!(cluster.get_progress(queued).is_none());
    assert!(cluster.is_finished(active));
}

#[test]
fn test_aborted_task_stops_after_its_current_cycle() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    let id = cluster.add_request_task(vec![1.0; 40], 4, 10).unwrap();
    assert_eq!(cluster.remove_task(id).unwrap(), TaskState::Active);

    cluster.run_pending();

    let progress = cluster.get_progress(id).unwrap();
    assert_eq!(progress.state, TaskState::Aborted);
    assert_eq!(progress.actual_cycle, 1);
    assert!(matches!(
        cluster.take_result(id),
        Err(ClusterError::TaskAborted(_))
    ));
}

#[test]
fn test_unknown_task() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        cluster.remove_task(id),
        Err(ClusterError::TaskNotFound(_))
    ));
    assert!(!cluster.is_finished(id));
}

// ═══════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════

#[test]
fn test_snapshot_restores_identical_segments() {
    let cluster = two_segment_cluster(ClusterConfig {
        snapshot_frame_size: 1024,
        ..ClusterConfig::default()
    });
    cluster.request(vec![1.0; 12], 4, 3, None).unwrap();
    let before: Vec<Vec<u8>> = (0..2)
        .map(|i| cluster.with_segment(i, |s| s.to_bytes()).unwrap())
        .collect();

    let snapshots = cluster.snapshot(None).unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[0].frames.len() > 1);

    // Grow the network further, then roll back
    cluster.request(vec![2.0; 12], 4, 3, None).unwrap();
    for snapshot in &snapshots {
        cluster.restore_segment(snapshot).unwrap();
    }
    for (index, bytes) in before.iter().enumerate() {
        assert_eq!(&cluster.with_segment(index, |s| s.to_bytes()).unwrap(), bytes);
    }
}

#[test]
fn test_restore_is_refused_while_busy() {
    let cluster = two_segment_cluster(ClusterConfig::default());
    let snapshots = cluster.snapshot(None).unwrap();
    cluster.add_request_task(vec![1.0; 4], 4, 1).unwrap();

    assert!(matches!(
        cluster.restore_segment(&snapshots[0]),
        Err(ClusterError::Busy(_))
    ));
    cluster.run_pending();
    assert!(cluster.restore_segment(&snapshots[0]).is_ok());
}

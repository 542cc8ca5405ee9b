// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # End-to-End Tests
//!
//! Configuration file → cluster → learn / request / snapshot.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use kyouko::prelude::*;

const CONFIG: &str = r#"
[cluster]
worker_threads = 2
max_output_error = 0.0
request_timeout_ms = 20000

[engine]
random_seed = 7
pruning_interval = 3

[segment]
learn_rate = 0.01

[snapshot]
frame_size = 4096
"#;

fn load_test_config() -> KyoukoConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kyouko_configuration.toml");
    fs::write(&path, CONFIG).unwrap();
    let mut cli = HashMap::new();
    cli.insert("pruning_interval".to_string(), "5".to_string());
    load_config(Some(&path), Some(&cli)).unwrap()
}

fn build_cluster(config: &KyoukoConfig) -> Cluster {
    let first = kyouko::segment_descriptor(
        config,
        vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
            BrickDescriptor::new(BrickType::Normal, [1, 0, 0], 16),
            BrickDescriptor::new(BrickType::Output, [2, 0, 0], 4),
        ],
    );
    let second = kyouko::segment_descriptor(
        config,
        vec![
            BrickDescriptor::new(BrickType::Input, [0, 0, 0], 4),
            BrickDescriptor::new(BrickType::Normal, [0, 1, 0], 16),
            BrickDescriptor::new(BrickType::Output, [0, 2, 0], 2),
        ],
    );
    Cluster::new(
        &[first, second],
        &[SegmentLink::new(0, 1, 4)],
        ClusterConfig::from(config),
    )
    .unwrap()
}

#[test]
fn test_configured_cluster_learns_and_answers() {
    let config = load_test_config();
    assert_eq!(config.engine.pruning_interval, 5);
    assert_eq!(config.segment.learn_rate, 0.01);

    let mut cluster = build_cluster(&config);
    cluster.start_workers().unwrap();

    let cycles = 6;
    let inputs: Vec<f32> = (0..cycles * 4).map(|i| (i % 4) as f32 * 0.5).collect();
    let labels = vec![0.25; cycles * 2];
    let task = cluster
        .add_learn_task(inputs.clone(), labels, 4, 2, cycles as u64)
        .unwrap();
    let result = cluster.wait_for_task(task, Duration::from_secs(20)).unwrap();
    assert_eq!(result, TaskResult::None);

    let outputs = cluster.request(inputs, 4, cycles as u64, None).unwrap();
    assert_eq!(outputs.len(), cycles * 2);
    assert!(outputs.iter().all(|v| v.is_finite()));

    cluster.stop_workers();
}

#[test]
fn test_snapshot_frames_survive_transport_encoding() {
    let config = load_test_config();
    let cluster = build_cluster(&config);
    cluster.request(vec![1.0; 8], 4, 2, None).unwrap();

    let snapshots = cluster.snapshot(None).unwrap();
    for snapshot in &snapshots {
        let mut decoded = snapshot.clone();
        decoded.frames = snapshot
            .frames
            .iter()
            .map(|frame| {
                let bytes = frame.encode().unwrap();
                kyouko::segment::SnapshotFrame::decode(&bytes).unwrap()
            })
            .rev()
            .collect();
        cluster.restore_segment(&decoded).unwrap();
    }
}

#[test]
fn test_debug_flags_build_filter() {
    let flags = CrateDebugFlags::from_args(vec!["--debug-kyouko-cluster".to_string()]);
    assert!(flags.to_filter_string("info").starts_with("kyouko_cluster=debug"));
}

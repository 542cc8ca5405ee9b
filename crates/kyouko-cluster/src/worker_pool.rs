// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Worker threads pulling ready segments from the cluster queue
//!
//! A segment whose border slots are not ready yet goes back into the queue.
//! Workers check the running flag at least every `poll_interval`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use crate::cluster::ClusterCore;
use crate::error::Result;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WorkerPool {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn start(core: Arc<ClusterCore>, threads: usize) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut pool = Self {
            running: Arc::clone(&running),
            handles: Vec::with_capacity(threads),
        };

        for index in 0..threads.max(1) {
            let core = Arc::clone(&core);
            let running = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name(format!("kyouko-worker-{}", index))
                .spawn(move || worker_loop(index, &core, &running));
            match handle {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    pool.stop();
                    return Err(err.into());
                }
            }
        }
        info!("[WORKER-POOL] started {} workers", pool.handles.len());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag and join every worker
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) && self.handles.is_empty() {
            return;
        }
        let started = Instant::now();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("kyouko-worker").to_string();
            if handle.join().is_err() {
                warn!("[WORKER-POOL] {} panicked during shutdown", name);
            }
        }
        let elapsed = started.elapsed();
        if elapsed > STOP_TIMEOUT {
            warn!("[WORKER-POOL] workers took {:?} to stop", elapsed);
        } else {
            info!("[WORKER-POOL] stopped cleanly");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(index: usize, core: &ClusterCore, running: &AtomicBool) {
    let poll_interval = core.config.poll_interval;
    let mut processed: u64 = 0;
    while running.load(Ordering::Acquire) {
        match core.ready_rx.recv_timeout(poll_interval) {
            Ok(item) => {
                if core.process_item(item) {
                    processed += 1;
                } else {
                    thread::yield_now();
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("[WORKER-POOL] worker {} exits after {} segments", index, processed);
}

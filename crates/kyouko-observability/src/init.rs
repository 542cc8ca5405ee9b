// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for Kyouko
//!
//! Console logging is always available. With the `file-logging` feature a
//! JSON log file is written into a timestamped run folder and old runs are
//! removed by a retention policy.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::CrateDebugFlags;

/// Build the filter for a base level plus per-crate debug flags
///
/// `RUST_LOG`, when set, replaces the computed directives.
pub fn build_env_filter(debug_flags: &CrateDebugFlags, base_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(debug_flags.to_filter_string(base_level)))
}

/// Initialize console logging
///
/// # Errors
///
/// Fails if a global subscriber is already installed
pub fn init_logging(debug_flags: &CrateDebugFlags, base_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(debug_flags, base_level))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("Failed to initialize logging: {}", err))
}

#[cfg(feature = "file-logging")]
pub use file::{init_file_logging, LoggingGuard};

#[cfg(feature = "file-logging")]
mod file {
    use std::path::{Path, PathBuf};

    use anyhow::{Context, Result};
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use tracing_appender::rolling;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{Layer, Registry};

    use super::build_env_filter;
    use crate::cli::CrateDebugFlags;

    const RUN_PREFIX: &str = "run_";
    const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// Keeps the non-blocking writer alive; logs flush on drop
    pub struct LoggingGuard {
        _file_guard: tracing_appender::non_blocking::WorkerGuard,
        log_dir: PathBuf,
    }

    impl LoggingGuard {
        /// Run folder receiving this process's logs
        pub fn log_dir(&self) -> &Path {
            &self.log_dir
        }
    }

    /// Initialize console logging plus a JSON log file
    ///
    /// Layout:
    /// ```text
    /// <log_dir>/
    ///   └── run_20250101_120000/
    ///       └── kyouko.log
    /// ```
    ///
    /// Runs beyond the `retention_runs` most recent ones are removed.
    pub fn init_file_logging(
        debug_flags: &CrateDebugFlags,
        base_level: &str,
        log_dir: &Path,
        retention_runs: usize,
    ) -> Result<LoggingGuard> {
        let run_folder = log_dir.join(format!(
            "{}{}",
            RUN_PREFIX,
            Utc::now().format(RUN_TIMESTAMP_FORMAT)
        ));
        std::fs::create_dir_all(&run_folder)
            .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
        cleanup_old_runs(log_dir, retention_runs)?;

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(build_env_filter(debug_flags, base_level));

        let appender = rolling::never(&run_folder, "kyouko.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(build_env_filter(debug_flags, base_level));

        Registry::default()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .context("Failed to initialize logging")?;

        Ok(LoggingGuard {
            _file_guard: guard,
            log_dir: run_folder,
        })
    }

    fn run_timestamp(path: &Path) -> Option<DateTime<Utc>> {
        let name = path.file_name()?.to_str()?;
        let stamp = name.strip_prefix(RUN_PREFIX)?;
        let naive = NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT).ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }

    /// Remove all but the newest `keep` run folders; returns how many were removed
    pub(crate) fn cleanup_old_runs(base_log_dir: &Path, keep: usize) -> Result<usize> {
        if !base_log_dir.exists() {
            return Ok(0);
        }

        let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
        for entry in std::fs::read_dir(base_log_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(stamp) = run_timestamp(&path) {
                runs.push((path, stamp));
            }
        }
        runs.sort_by_key(|(_, stamp)| *stamp);

        let excess = runs.len().saturating_sub(keep);
        let mut removed = 0;
        for (path, _) in runs.into_iter().take(excess) {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!(
                    "Warning: Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_cleanup_keeps_newest_runs() {
            let dir = tempfile::tempdir().unwrap();
            for stamp in ["20250101_120000", "20250102_120000", "20250103_120000"] {
                std::fs::create_dir_all(dir.path().join(format!("run_{}", stamp))).unwrap();
            }
            std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

            assert_eq!(cleanup_old_runs(dir.path(), 2).unwrap(), 1);
            assert!(!dir.path().join("run_20250101_120000").exists());
            assert!(dir.path().join("run_20250103_120000").exists());
            assert!(dir.path().join("unrelated").exists());
        }
    }
}

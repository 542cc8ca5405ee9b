// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # kyouko-observability
//!
//! Logging setup shared by every Kyouko binary and test harness, with
//! per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: timestamped per-run log folders with retention cleanup

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known Kyouko crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "kyouko",
    "kyouko-config",
    "kyouko-npu-segment",
    "kyouko-npu-engine",
    "kyouko-cluster",
];

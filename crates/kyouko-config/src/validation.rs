// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Every check pushes into one error list so a broken file reports all of its
//! problems at once.

use crate::{ConfigError, ConfigResult, KyoukoConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every violation
pub fn validate_config(config: &KyoukoConfig) -> ConfigResult<()> {
    let errors = collect_errors(config);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

/// All violations found in `config`
pub fn collect_errors(config: &KyoukoConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_required_fields(config, &mut errors);
    validate_cluster(config, &mut errors);
    validate_engine(config, &mut errors);
    validate_segment_defaults(config, &mut errors);
    errors
}

fn invalid(errors: &mut Vec<ConfigValidationError>, field: &str, reason: String) {
    errors.push(ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason,
    });
}

fn validate_required_fields(config: &KyoukoConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.system.log_level.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "system.log_level".to_string(),
        });
    }
}

fn validate_cluster(config: &KyoukoConfig, errors: &mut Vec<ConfigValidationError>) {
    let cluster = &config.cluster;
    if !(cluster.max_output_error >= 0.0) {
        invalid(
            errors,
            "cluster.max_output_error",
            format!("must be >= 0, got {}", cluster.max_output_error),
        );
    }
    if cluster.request_timeout_ms == 0 {
        invalid(errors, "cluster.request_timeout_ms", "must be > 0".to_string());
    }
    if cluster.poll_interval_ms == 0 {
        invalid(errors, "cluster.poll_interval_ms", "must be > 0".to_string());
    }
    if cluster.finished_task_retention == 0 {
        invalid(errors, "cluster.finished_task_retention", "must be > 0".to_string());
    }
    if config.snapshot.frame_size == 0 {
        invalid(errors, "snapshot.frame_size", "must be > 0".to_string());
    }
}

fn validate_engine(config: &KyoukoConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.engine.random_pool_size == 0 {
        invalid(errors, "engine.random_pool_size", "must be > 0".to_string());
    }
}

fn validate_segment_defaults(config: &KyoukoConfig, errors: &mut Vec<ConfigValidationError>) {
    let segment = &config.segment;
    if segment.max_synapse_sections == 0 {
        invalid(errors, "segment.max_synapse_sections", "must be > 0".to_string());
    }
    if !(segment.cool_down > 0.0) {
        invalid(
            errors,
            "segment.cool_down",
            format!("must be > 0, got {}", segment.cool_down),
        );
    }
    if !(segment.synapse_segmentation > 0.0) {
        invalid(
            errors,
            "segment.synapse_segmentation",
            format!("must be > 0, got {}", segment.synapse_segmentation),
        );
    }
    if !(0.0..=1.0).contains(&segment.sign_neg) {
        invalid(
            errors,
            "segment.sign_neg",
            format!("must be in [0, 1], got {}", segment.sign_neg),
        );
    }
    if segment.max_active_counter == 0 || segment.max_active_counter > u16::MAX as u32 {
        invalid(
            errors,
            "segment.max_active_counter",
            format!("must be in 1..={}, got {}", u16::MAX, segment.max_active_counter),
        );
    }
    if segment.min_active_counter > segment.max_active_counter {
        invalid(
            errors,
            "segment.min_active_counter",
            format!(
                "{} exceeds max_active_counter {}",
                segment.min_active_counter, segment.max_active_counter
            ),
        );
    }
}

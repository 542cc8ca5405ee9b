// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{validate_config, ConfigError, ConfigResult, KyoukoConfig, CONFIG_FILE_NAME};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Find the Kyouko configuration file
///
/// Search order:
/// 1. `KYOUKO_CONFIG_PATH` environment variable
/// 2. Current working directory: `./kyouko_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("KYOUKO_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by KYOUKO_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            let Some(parent) = current.parent() else {
                break;
            };
            search_paths.push(parent.join(CONFIG_FILE_NAME));
            current = parent;
        }
    }

    if let Some(path) = search_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Kyouko configuration file '{}' not found in any of these locations:\n{}\n\nSet KYOUKO_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found, contains invalid TOML, or fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<KyoukoConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: KyoukoConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    validate_config(&config)?;
    Ok(config)
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `KYOUKO_LOG_LEVEL` -> `system.log_level`
/// - `KYOUKO_DATA_DIR` -> `system.data_dir`
/// - `KYOUKO_WORKER_THREADS` -> `cluster.worker_threads`
/// - `KYOUKO_REQUEST_TIMEOUT_MS` -> `cluster.request_timeout_ms`
/// - `KYOUKO_MAX_OUTPUT_ERROR` -> `cluster.max_output_error`
/// - `KYOUKO_RANDOM_SEED` -> `engine.random_seed`
///
/// Unparsable numeric values are ignored.
pub fn apply_environment_overrides(config: &mut KyoukoConfig) {
    if let Ok(value) = env::var("KYOUKO_LOG_LEVEL") {
        config.system.log_level = value;
    }
    if let Ok(value) = env::var("KYOUKO_DATA_DIR") {
        config.system.data_dir = PathBuf::from(value);
    }
    if let Some(threads) = parse_env("KYOUKO_WORKER_THREADS") {
        config.cluster.worker_threads = threads;
    }
    if let Some(timeout) = parse_env("KYOUKO_REQUEST_TIMEOUT_MS") {
        config.cluster.request_timeout_ms = timeout;
    }
    if let Some(bound) = parse_env("KYOUKO_MAX_OUTPUT_ERROR") {
        config.cluster.max_output_error = bound;
    }
    if let Some(seed) = parse_env("KYOUKO_RANDOM_SEED") {
        config.engine.random_seed = seed;
    }
}

fn parse_cli<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

/// Apply CLI argument overrides to configuration
///
/// Keys are the flattened field names, e.g. `{"worker_threads": "4", "learn_rate": "0.05"}`.
/// Unknown keys are ignored.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` when a known key carries an unparsable value
pub fn apply_cli_overrides(
    config: &mut KyoukoConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in cli_args {
        match key.as_str() {
            "log_level" => config.system.log_level = value.clone(),
            "data_dir" => config.system.data_dir = PathBuf::from(value),
            "worker_threads" => config.cluster.worker_threads = parse_cli(key, value)?,
            "max_output_error" => config.cluster.max_output_error = parse_cli(key, value)?,
            "request_timeout_ms" => config.cluster.request_timeout_ms = parse_cli(key, value)?,
            "finished_task_retention" => {
                config.cluster.finished_task_retention = parse_cli(key, value)?
            }
            "random_seed" => config.engine.random_seed = parse_cli(key, value)?,
            "pruning_interval" => config.engine.pruning_interval = parse_cli(key, value)?,
            "learn_rate" => config.segment.learn_rate = parse_cli(key, value)?,
            "do_learn" => {
                config.segment.do_learn = value.eq_ignore_ascii_case("true") || value == "1"
            }
            "frame_size" => config.snapshot.frame_size = parse_cli(key, value)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: [&str; 6] = [
        "KYOUKO_LOG_LEVEL",
        "KYOUKO_DATA_DIR",
        "KYOUKO_WORKER_THREADS",
        "KYOUKO_REQUEST_TIMEOUT_MS",
        "KYOUKO_MAX_OUTPUT_ERROR",
        "KYOUKO_RANDOM_SEED",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("KYOUKO_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("KYOUKO_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("KYOUKO_CONFIG_PATH", "/nonexistent/kyouko.toml");
        let result = find_config_file();
        env::remove_var("KYOUKO_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[cluster]").unwrap();
        writeln!(file, "worker_threads = 4").unwrap();
        writeln!(file, "[engine]").unwrap();
        writeln!(file, "pruning_interval = 25").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.cluster.worker_threads, 4);
        assert_eq!(config.engine.pruning_interval, 25);
        assert_eq!(config.segment.neuron_border, 0.5);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[segment]\nsign_neg = 3.0\n").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = KyoukoConfig::default();

        env::set_var("KYOUKO_WORKER_THREADS", "6");
        env::set_var("KYOUKO_MAX_OUTPUT_ERROR", "0.02");
        env::set_var("KYOUKO_RANDOM_SEED", "not-a-number");

        apply_environment_overrides(&mut config);
        clear_env();

        assert_eq!(config.cluster.worker_threads, 6);
        assert_eq!(config.cluster.max_output_error, 0.02);
        assert_eq!(config.engine.random_seed, 0);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = KyoukoConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("learn_rate".to_string(), "0.05".to_string());
        cli_args.insert("do_learn".to_string(), "false".to_string());
        cli_args.insert("unknown".to_string(), "ignored".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.segment.learn_rate, 0.05);
        assert!(!config.segment.do_learn);
    }

    #[test]
    fn test_cli_override_rejects_garbage() {
        let mut config = KyoukoConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("worker_threads".to_string(), "many".to_string());

        let err = apply_cli_overrides(&mut config, &cli_args).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[cluster]").unwrap();
        writeln!(file, "worker_threads = 2").unwrap();
        writeln!(file, "request_timeout_ms = 500").unwrap();

        env::set_var("KYOUKO_WORKER_THREADS", "4");
        env::set_var("KYOUKO_REQUEST_TIMEOUT_MS", "900");

        let mut cli_args = HashMap::new();
        cli_args.insert("worker_threads".to_string(), "8".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();
        clear_env();

        // CLI wins for threads, env wins for the timeout (no CLI override)
        assert_eq!(config.cluster.worker_threads, 8);
        assert_eq!(config.cluster.request_timeout_ms, 900);
    }
}

//! Configuration Loader
//!
//! Reads run configurations from YAML files. Missing fields fall back to
//! their defaults so a file only needs to name what it changes.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::error::ConfigError;

use super::model::RunConfiguration;
use super::validator::validate_config;

/// Loads and validates a run configuration from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use dbstress::config::load_config;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("stress.yaml")?;
///     println!("{} workers against {}", config.workers, config.target);
///     Ok(())
/// }
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<RunConfiguration, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Reads a configuration file without validating it.
///
/// Used when command-line overrides are applied before validation.
pub fn read_config(path: impl AsRef<Path>) -> Result<RunConfiguration, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_config(&yaml_content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Parses YAML text into a configuration.
pub fn parse_config(yaml: &str) -> Result<RunConfiguration, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        return Ok(RunConfiguration::default());
    }
    serde_yaml::from_str(yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionStrategy, OperationKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let config = parse_config("workers: 8\nstrategy: preemptible\n").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.strategy, ExecutionStrategy::Preemptible);
        assert_eq!(config.slow_delay_secs, 10);
        assert_eq!(config.max_targets, 50);
    }

    #[test]
    fn test_parse_operation_by_name_and_code() {
        let config = parse_config("operation: slow").unwrap();
        assert_eq!(config.operation, OperationKind::SlowSimulation);

        let config = parse_config("operation: 32767").unwrap();
        assert_eq!(config.operation, OperationKind::WeightedMix);

        let config = parse_config("operation: 9").unwrap();
        assert_eq!(config.operation, OperationKind::Unknown(9));
    }

    #[test]
    fn test_parse_mix_weights() {
        let config = parse_config("operation: mix\nmix_weights:\n  fast: 3\n  noop: 0\n").unwrap();
        assert_eq!(config.mix_weights.fast, 3);
        assert_eq!(config.mix_weights.slow, 1);
        assert_eq!(config.mix_weights.noop, 0);
    }

    #[test]
    fn test_parse_empty_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config, RunConfiguration::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "workers: 4\nsingle_pass: true\ntarget: \"localhost:9000\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workers, 4);
        assert!(config.single_pass);
        assert_eq!(config.target, "localhost:9000");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/stress.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "workers: [not, a, number]").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "workers: 0").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid { field: "workers", .. })));
    }
}

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Input and output directories are not empty paths
/// - Input and output directories are distinct
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.directories.input.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "directories.input cannot be empty".to_string(),
        ));
    }
    if config.directories.output.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "directories.output cannot be empty".to_string(),
        ));
    }
    if config.directories.input == config.directories.output {
        return Err(ConfigError::ValidationError(
            "directories.input and directories.output must differ".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvertOptions, DirectoriesConfig};
    use std::path::PathBuf;

    fn config(input: &str, output: &str) -> Config {
        Config {
            directories: DirectoriesConfig {
                input: PathBuf::from(input),
                output: PathBuf::from(output),
            },
            convert: ConvertOptions::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&config("/data/in", "/data/out")).is_ok());
    }

    #[test]
    fn test_validate_empty_input_fails() {
        let result = validate_config(&config("", "/data/out"));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_same_directories_fails() {
        let result = validate_config(&config("/data", "/data"));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}

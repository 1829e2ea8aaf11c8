//! Checker configuration
//!
//! A [`CheckConfig`] is passed explicitly to [`crate::Owcty::new`]. It can be
//! built in code or read from a small TLC-style configuration file:
//!
//! ```text
//! \* two workers, no trace
//! WORKERS 2
//! COUNTEREXAMPLE FALSE
//! POR FALSE
//! ```

use std::path::Path;
use thiserror::Error;

/// Configuration parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Malformed directive
    #[error("config line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The worker count must be positive
    #[error("config line {line}: WORKERS must be at least 1")]
    NoWorkers { line: usize },

    /// Reading the configuration file failed
    #[error("cannot read config file: {0}")]
    Read(String),
}

/// Parameters of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    /// Number of workers (state-space partitions)
    pub workers: usize,
    /// Whether to reconstruct a counterexample when the property fails
    pub counterexample: bool,
    /// Whether to expand states through the graph's partial-order reduction hook
    pub por: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, |p| p.get()),
            counterexample: true,
            por: false,
        }
    }
}

impl CheckConfig {
    /// Set the worker count. Zero is raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable or disable counterexample reconstruction.
    pub fn with_counterexample(mut self, enabled: bool) -> Self {
        self.counterexample = enabled;
        self
    }

    /// Enable or disable partial-order reduction.
    pub fn with_por(mut self, enabled: bool) -> Self {
        self.por = enabled;
        self
    }

    /// Parse configuration text. Unspecified settings keep their defaults.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut config = CheckConfig::default();

        for (line_num, raw_line) in input.lines().enumerate() {
            let line_num = line_num + 1;
            let line = match raw_line.find("\\*") {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let mut words = line.split_whitespace();
            let directive = words.next().unwrap_or_default();
            let value = words.next().ok_or_else(|| ConfigError::Syntax {
                line: line_num,
                message: format!("{} requires a value", directive),
            })?;
            if let Some(extra) = words.next() {
                return Err(ConfigError::Syntax {
                    line: line_num,
                    message: format!("unexpected '{}' after {} {}", extra, directive, value),
                });
            }

            match directive {
                "WORKERS" => {
                    let workers: usize = value.parse().map_err(|_| ConfigError::Syntax {
                        line: line_num,
                        message: format!("WORKERS expects a number, got '{}'", value),
                    })?;
                    if workers == 0 {
                        return Err(ConfigError::NoWorkers { line: line_num });
                    }
                    config.workers = workers;
                }
                "COUNTEREXAMPLE" => config.counterexample = parse_bool(value, line_num)?,
                "POR" => config.por = parse_bool(value, line_num)?,
                other => {
                    return Err(ConfigError::Syntax {
                        line: line_num,
                        message: format!("unknown directive '{}'", other),
                    })
                }
            }
        }

        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&text)
    }
}

fn parse_bool(value: &str, line: usize) -> Result<bool, ConfigError> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(ConfigError::Syntax {
            line,
            message: format!("expected TRUE or FALSE, got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_directives() {
        let config = CheckConfig::parse(
            "\\* comment\n\
             WORKERS 3\n\
             \n\
             COUNTEREXAMPLE FALSE \\* no trace\n\
             POR TRUE\n",
        )
        .unwrap();
        assert_eq!(
            config,
            CheckConfig {
                workers: 3,
                counterexample: false,
                por: true
            }
        );
    }

    #[test]
    fn test_parse_keeps_defaults() {
        let config = CheckConfig::parse("WORKERS 2\n").unwrap();
        assert_eq!(config.workers, 2);
        assert!(config.counterexample);
        assert!(!config.por);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            CheckConfig::parse("WORKERS 0\n").unwrap_err(),
            ConfigError::NoWorkers { line: 1 }
        );
        assert!(matches!(
            CheckConfig::parse("WORKERS many\n").unwrap_err(),
            ConfigError::Syntax { line: 1, .. }
        ));
        assert!(matches!(
            CheckConfig::parse("\nPOR\n").unwrap_err(),
            ConfigError::Syntax { line: 2, .. }
        ));
        assert!(matches!(
            CheckConfig::parse("POR yes\n").unwrap_err(),
            ConfigError::Syntax { line: 1, .. }
        ));
        assert!(matches!(
            CheckConfig::parse("DEADLOCK TRUE\n").unwrap_err(),
            ConfigError::Syntax { line: 1, .. }
        ));
    }

    #[test]
    fn test_builders() {
        let config = CheckConfig::default()
            .with_workers(0)
            .with_counterexample(false)
            .with_por(true);
        assert_eq!(config.workers, 1);
        assert!(!config.counterexample);
        assert!(config.por);
    }
}

//! Configuration errors
//!
//! Parse and semantic errors carry the line number they were detected on;
//! line 0 stands for a command-line option. The file path is attached by the
//! top-level loader when it reports the failure.

use std::fmt;
use std::path::PathBuf;

use crate::common::ProxyError;

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// Error opening or reading a configuration file
    File(PathBuf, String),

    /// Unknown directive name
    UnknownOption { name: String, line: u32 },

    /// Directive given without a value
    MissingValue { name: String, line: u32 },

    /// Malformed or out-of-range value
    InvalidValue {
        name: String,
        value: String,
        expected: String,
        line: u32,
    },

    /// Structurally valid input that violates a semantic constraint
    /// (user predicate without UserAuth, nested Include, ...)
    Semantic { msg: String, line: u32 },

    /// Include directive inside an included file
    NestedInclude { path: String, line: u32 },

    /// Error reported from inside an include file
    Include { path: String, line: u32 },

    /// Other error
    Other(String),
}

impl ConfigError {
    pub(crate) fn invalid<V: fmt::Display, E: fmt::Display>(
        name: &str,
        value: V,
        expected: E,
        line: u32,
    ) -> Self {
        ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
            line,
        }
    }

    pub(crate) fn semantic<M: fmt::Display>(msg: M, line: u32) -> Self {
        ConfigError::Semantic {
            msg: msg.to_string(),
            line,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::File(path, err) => {
                write!(f, "Error opening conf file '{}': {}", path.display(), err)
            }
            ConfigError::UnknownOption { name, line } => {
                write!(f, "Unknown option '{}' on line {}", name, line)
            }
            ConfigError::MissingValue { name, line } => {
                write!(f, "No value assigned for {} on line {}", name, line)
            }
            ConfigError::InvalidValue {
                name,
                value,
                expected,
                line,
            } => write!(
                f,
                "Invalid {} '{}' on line {}, use {}",
                name, value, line, expected
            ),
            ConfigError::Semantic { msg, line } => write!(f, "{} on line {}", msg, line),
            ConfigError::NestedInclude { path, line } => write!(
                f,
                "Include option not allowed in include files '{}' on line {}",
                path, line
            ),
            ConfigError::Include { path, line } => {
                write!(f, "Error in include file '{}' on line {}", path, line)
            }
            ConfigError::Other(msg) => write!(f, "Error in conf: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<ProxyError> for ConfigError {
    fn from(err: ProxyError) -> Self {
        ConfigError::Other(err.to_string())
    }
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

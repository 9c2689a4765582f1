//! Error types for persistent-etc-files

use thiserror::Error;

/// Main error type for stack synthesis and bootstrap operations
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid CIDR '{cidr}': {message}")]
    Cidr { cidr: String, message: String },

    #[error("Network layout error: {0}")]
    Network(String),

    #[error("Duplicate logical id: {0}")]
    DuplicateResource(String),

    #[error("Resource '{resource}' references unknown logical id '{target}'")]
    DanglingReference { resource: String, target: String },

    #[error("Dependency cycle between resources: {0}")]
    DependencyCycle(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Step in section '{section}' failed: {message}")]
    Step { section: String, message: String },

    #[error("Command execution failed: {0}")]
    Command(String),
}

impl StackError {
    /// Create a CIDR error
    pub fn cidr(cidr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cidr {
            cidr: cidr.into(),
            message: message.into(),
        }
    }

    /// Create a step error
    pub fn step(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            section: section.into(),
            message: message.into(),
        }
    }
}

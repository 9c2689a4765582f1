//! Stack configuration loader
//!
//! Reads an optional YAML/JSON file and layers command-line overrides on top.

use super::StackConfig;
use crate::StackError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Load a stack configuration file, picking the format from its extension
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<StackConfig, StackError> {
    let path = path.as_ref();

    let content = fs::read_to_string(path).await.map_err(|e| {
        StackError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;

    let config = StackConfig::parse_for_path(path, &content)?;
    debug!("Loaded stack config from {}", path.display());
    Ok(config)
}

/// Configuration loader builder
#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    stack_name: Option<String>,
    region: Option<String>,
    max_azs: Option<usize>,
}

impl ConfigLoader {
    /// Create a loader that starts from the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file before applying overrides
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Read this file if one is given
    pub fn with_optional_file(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.path = path.map(Into::into);
        self
    }

    /// Override the stack name
    pub fn with_stack_name(mut self, name: Option<String>) -> Self {
        self.stack_name = name;
        self
    }

    /// Override the region
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Override the zone count
    pub fn with_max_azs(mut self, max_azs: Option<usize>) -> Self {
        self.max_azs = max_azs;
        self
    }

    /// Load, apply overrides and validate
    pub async fn load(self) -> Result<StackConfig, StackError> {
        let mut config = match &self.path {
            Some(path) => load_config_file(path).await?,
            None => StackConfig::default(),
        };

        if let Some(name) = self.stack_name {
            config.stack_name = name;
        }
        if let Some(region) = self.region {
            config.region = Some(region);
        }
        if let Some(max_azs) = self.max_azs {
            config.network.max_azs = max_azs;
        }

        config.validate()?;
        info!(
            "Stack config '{}' ready ({} zone(s))",
            config.stack_name,
            config.network.zone_count()
        );
        Ok(config)
    }
}

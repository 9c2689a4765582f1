//! Fixed metadata
//!
//! Used when the values are already known (command-line flags) and in tests.

use async_trait::async_trait;

use super::{InstanceMetadata, MetadataSource};
use crate::StackError;

/// Metadata source returning preconfigured values
///
/// # Example
/// ```
/// use persistent_etc_files::datasources::StaticMetadata;
///
/// let source = StaticMetadata::new().with_region("us-east-1");
/// ```
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    available: bool,
    metadata: InstanceMetadata,
    error: Option<String>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self {
            available: true,
            metadata: InstanceMetadata::default(),
            error: None,
        }
    }

    pub fn with_metadata(mut self, metadata: InstanceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.metadata.region = Some(region.into());
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Configure to return an error for metadata
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

impl Default for StaticMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    fn name(&self) -> &'static str {
        "Static"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn get_metadata(&self) -> Result<InstanceMetadata, StackError> {
        if let Some(error) = &self.error {
            return Err(StackError::Metadata(error.clone()));
        }
        Ok(self.metadata.clone())
    }
}

//! Instance metadata sources
//!
//! The boot runner needs the region to build the file system DNS name. When
//! it is not given on the command line it is read from instance metadata.

pub mod ec2;
pub mod mock;

pub use ec2::Ec2Metadata;
pub use mock::StaticMetadata;

use crate::StackError;
use async_trait::async_trait;

/// Metadata about the running instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub instance_id: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
}

impl InstanceMetadata {
    /// Region, falling back to the availability zone minus its letter suffix
    pub fn region(&self) -> Option<String> {
        self.region
            .clone()
            .or_else(|| self.availability_zone.as_deref().and_then(region_from_zone))
    }
}

/// Region of an availability zone (`us-east-1a` -> `us-east-1`)
pub fn region_from_zone(zone: &str) -> Option<String> {
    let region = zone.trim_end_matches(|c: char| c.is_ascii_lowercase());
    if region.is_empty() || region.len() == zone.len() {
        None
    } else {
        Some(region.to_string())
    }
}

/// Source of instance metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Name of this source (e.g., "EC2", "Static")
    fn name(&self) -> &'static str;

    /// Quick reachability check
    async fn is_available(&self) -> bool;

    async fn get_metadata(&self) -> Result<InstanceMetadata, StackError>;

    /// Region of the instance, or an error when it cannot be determined
    async fn region(&self) -> Result<String, StackError> {
        self.get_metadata().await?.region().ok_or_else(|| {
            StackError::Metadata(format!("{} metadata carries no region", self.name()))
        })
    }
}

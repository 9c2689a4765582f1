//! EC2 instance metadata service (IMDS)
//!
//! Supports both IMDSv2 (preferred) and IMDSv1.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{InstanceMetadata, MetadataSource, region_from_zone};
use crate::StackError;

/// EC2 metadata service base URL (link-local address)
pub const IMDS_BASE_URL: &str = "http://169.254.169.254";

/// IMDSv2 token TTL in seconds
const TOKEN_TTL_SECONDS: u32 = 300;

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Metadata read from the EC2 instance metadata service
pub struct Ec2Metadata {
    client: Client,
    base_url: String,
}

impl Ec2Metadata {
    pub fn new() -> Result<Self, StackError> {
        Self::with_base_url(IMDS_BASE_URL)
    }

    /// Point at a different endpoint (used by tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, StackError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get IMDSv2 token for authenticated requests
    async fn get_imdsv2_token(&self) -> Option<String> {
        let url = format!("{}/latest/api/token", self.base_url);
        let response = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS.to_string())
            .send()
            .await
            .ok()?;

        if response.status().is_success() {
            response.text().await.ok()
        } else {
            None
        }
    }

    /// Fetch a metadata path, trying IMDSv2 first then falling back to IMDSv1
    pub async fn fetch_metadata_path(&self, path: &str) -> Result<String, StackError> {
        let url = format!("{}/latest/meta-data/{}", self.base_url, path);

        if let Some(token) = self.get_imdsv2_token().await {
            debug!("Using IMDSv2 for {}", path);
            let response = self
                .client
                .get(&url)
                .header(TOKEN_HEADER, &token)
                .send()
                .await?;

            if response.status().is_success() {
                return Ok(response.text().await?.trim().to_string());
            }
        }

        debug!("Falling back to IMDSv1 for {}", path);
        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            Ok(response.text().await?.trim().to_string())
        } else {
            Err(StackError::Metadata(format!(
                "Failed to fetch {}: {}",
                path,
                response.status()
            )))
        }
    }
}

#[async_trait]
impl MetadataSource for Ec2Metadata {
    fn name(&self) -> &'static str {
        "EC2"
    }

    async fn is_available(&self) -> bool {
        self.fetch_metadata_path("instance-id").await.is_ok()
    }

    async fn get_metadata(&self) -> Result<InstanceMetadata, StackError> {
        debug!("Fetching EC2 instance metadata");

        let mut metadata = InstanceMetadata::default();

        // Individual items are optional
        if let Ok(instance_id) = self.fetch_metadata_path("instance-id").await {
            metadata.instance_id = Some(instance_id);
        }

        if let Ok(region) = self.fetch_metadata_path("placement/region").await {
            metadata.region = Some(region);
        }

        if let Ok(zone) = self.fetch_metadata_path("placement/availability-zone").await {
            if metadata.region.is_none() {
                metadata.region = region_from_zone(&zone);
            }
            metadata.availability_zone = Some(zone);
        }

        if metadata == InstanceMetadata::default() {
            return Err(StackError::Metadata(format!(
                "no instance metadata available at {}",
                self.base_url
            )));
        }

        Ok(metadata)
    }
}

//! Shared file store (managed NFS file system)
//!
//! Reachable only from inside the VPC: one mount target per private subnet,
//! each guarded by the stack's security group.

use crate::StackError;
use crate::network::{SubnetType, Vpc};
use crate::synth::{Construct, Resource, SynthContext, Template, intrinsic};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tracing::debug;

/// DNS suffix of file system endpoints
pub const DNS_SUFFIX: &str = "amazonaws.com";

/// When idle files move to the infrequent-access storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecyclePolicy {
    #[serde(rename = "AFTER_1_DAY")]
    After1Day,
    #[serde(rename = "AFTER_7_DAYS")]
    After7Days,
    #[serde(rename = "AFTER_14_DAYS")]
    After14Days,
    #[serde(rename = "AFTER_30_DAYS")]
    After30Days,
    #[serde(rename = "AFTER_60_DAYS")]
    After60Days,
    #[serde(rename = "AFTER_90_DAYS")]
    After90Days,
    #[serde(rename = "AFTER_180_DAYS")]
    After180Days,
    #[serde(rename = "AFTER_270_DAYS")]
    After270Days,
    #[serde(rename = "AFTER_365_DAYS")]
    After365Days,
}

impl LifecyclePolicy {
    pub fn days(&self) -> u32 {
        match self {
            Self::After1Day => 1,
            Self::After7Days => 7,
            Self::After14Days => 14,
            Self::After30Days => 30,
            Self::After60Days => 60,
            Self::After90Days => 90,
            Self::After180Days => 180,
            Self::After270Days => 270,
            Self::After365Days => 365,
        }
    }

    /// Value expected by the `TransitionToIA` property
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::After1Day => "AFTER_1_DAY",
            Self::After7Days => "AFTER_7_DAYS",
            Self::After14Days => "AFTER_14_DAYS",
            Self::After30Days => "AFTER_30_DAYS",
            Self::After60Days => "AFTER_60_DAYS",
            Self::After90Days => "AFTER_90_DAYS",
            Self::After180Days => "AFTER_180_DAYS",
            Self::After270Days => "AFTER_270_DAYS",
            Self::After365Days => "AFTER_365_DAYS",
        }
    }
}

impl fmt::Display for LifecyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceMode {
    #[default]
    GeneralPurpose,
    MaxIo,
}

impl PerformanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralPurpose => "generalPurpose",
            Self::MaxIo => "maxIO",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThroughputMode {
    #[default]
    Bursting,
    Elastic,
}

impl ThroughputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bursting => "bursting",
            Self::Elastic => "elastic",
        }
    }
}

/// What happens to the file system when it leaves the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
}

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
        }
    }
}

/// The file system and its mount targets
#[derive(Debug, Clone)]
pub struct FileSystem {
    id: String,
    lifecycle: LifecyclePolicy,
    encrypted: bool,
    performance_mode: PerformanceMode,
    throughput_mode: ThroughputMode,
    removal_policy: RemovalPolicy,
    security_group: Value,
    mount_subnets: Vec<String>,
}

impl FileSystem {
    /// Place mount targets in every private subnet of `vpc`
    pub fn new(
        id: impl Into<String>,
        config: &crate::config::FileSystemConfig,
        vpc: &Vpc,
        security_group: Value,
    ) -> Self {
        Self {
            id: id.into(),
            lifecycle: config.transition_to_ia,
            encrypted: config.encrypted,
            performance_mode: config.performance_mode,
            throughput_mode: config.throughput_mode,
            removal_policy: config.removal_policy,
            security_group,
            mount_subnets: vpc
                .subnets_of(SubnetType::PrivateWithEgress)
                .map(|s| s.logical_id())
                .collect(),
        }
    }

    /// `Fn::GetAtt` for the file system ARN
    pub fn arn(&self) -> Value {
        intrinsic::get_att(&self.id, "Arn")
    }

    pub fn mount_target_id(&self, index: usize) -> String {
        format!("{}EfsMountTarget{}", self.id, index)
    }

    pub fn mount_subnets(&self) -> &[String] {
        &self.mount_subnets
    }
}

/// Regional DNS name of a file system
pub fn dns_name(file_system_id: &str, region: &str) -> String {
    format!("{}.efs.{}.{}", file_system_id, region, DNS_SUFFIX)
}

impl Construct for FileSystem {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        if self.mount_subnets.is_empty() {
            return Err(StackError::Network(
                "file system needs at least one private subnet".into(),
            ));
        }
        debug!(
            "File system {} moves idle files to infrequent access after {} day(s)",
            self.id,
            self.lifecycle.days()
        );

        template.add_resource(
            &self.id,
            Resource::new("AWS::EFS::FileSystem")
                .property("Encrypted", self.encrypted)
                .property(
                    "LifecyclePolicies",
                    json!([{ "TransitionToIA": self.lifecycle.as_str() }]),
                )
                .property("PerformanceMode", self.performance_mode.as_str())
                .property("ThroughputMode", self.throughput_mode.as_str())
                .property("FileSystemTags", ctx.tags_named(&self.id))
                .removal_policy(self.removal_policy.as_str()),
        )?;

        for (i, subnet) in self.mount_subnets.iter().enumerate() {
            template.add_resource(
                self.mount_target_id(i + 1),
                Resource::new("AWS::EFS::MountTarget")
                    .property("FileSystemId", intrinsic::reference(&self.id))
                    .property("SecurityGroups", json!([self.security_group]))
                    .property("SubnetId", intrinsic::reference(subnet)),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileSystemConfig, NetworkConfig};
    use std::collections::BTreeMap;

    fn file_system(max_azs: usize) -> FileSystem {
        let vpc = Vpc::new(
            "Vpc",
            &NetworkConfig {
                max_azs,
                ..Default::default()
            },
        )
        .unwrap();
        FileSystem::new(
            "EfsFileSystem",
            &FileSystemConfig::default(),
            &vpc,
            intrinsic::get_att("SecurityGroup", "GroupId"),
        )
    }

    #[test]
    fn test_lifecycle_serde() {
        let policy: LifecyclePolicy = serde_yaml::from_str("AFTER_90_DAYS").unwrap();
        assert_eq!(policy, LifecyclePolicy::After90Days);
        assert_eq!(policy.days(), 90);
        assert_eq!(LifecyclePolicy::After14Days.to_string(), "AFTER_14_DAYS");
    }

    #[test]
    fn test_tokens() {
        let fs = file_system(1);
        assert_eq!(fs.arn(), json!({"Fn::GetAtt": ["EfsFileSystem", "Arn"]}));
        assert_eq!(
            dns_name("fs-12345678", "us-east-1"),
            "fs-12345678.efs.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn test_mount_targets_follow_private_subnets() {
        let fs = file_system(2);
        assert_eq!(
            fs.mount_subnets(),
            &["VpcPrivateSubnet1Subnet".to_string(), "VpcPrivateSubnet2Subnet".to_string()]
        );

        let mut template = Template::new();
        fs.synthesize(&SynthContext::new("Stack", BTreeMap::new()), &mut template)
            .unwrap();
        assert_eq!(template.resources_of_type("AWS::EFS::MountTarget").count(), 2);

        let target = template.resource("EfsFileSystemEfsMountTarget2").unwrap();
        assert_eq!(target.get("SubnetId"), Some(&json!({"Ref": "VpcPrivateSubnet2Subnet"})));
    }

    #[test]
    fn test_synthesize_file_system() {
        let fs = file_system(1);
        let mut template = Template::new();
        fs.synthesize(&SynthContext::new("Stack", BTreeMap::new()), &mut template)
            .unwrap();

        let resource = template.resource("EfsFileSystem").unwrap();
        assert_eq!(
            resource.get("LifecyclePolicies"),
            Some(&json!([{"TransitionToIA": "AFTER_14_DAYS"}]))
        );
        assert_eq!(resource.get("Encrypted"), Some(&json!(true)));
        assert_eq!(resource.deletion_policy.as_deref(), Some("Delete"));
    }
}

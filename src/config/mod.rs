//! Stack configuration parsing and types
//!
//! Every field is optional. An empty document yields the reference stack:
//! one availability zone, a `t3a.micro` instance on Amazon Linux 2023, a file
//! system that moves data to infrequent access after 14 days, and an hourly
//! sync of `passwd`, `group` and `shadow`.

pub mod loader;

pub use loader::ConfigLoader;

use crate::StackError;
use crate::compute::{InstanceType, MachineImage};
use crate::network::Ipv4Cidr;
use crate::storage::{LifecyclePolicy, PerformanceMode, RemovalPolicy, ThroughputMode};
use crate::userdata::{MountWait, NfsMountOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default stack name
pub const DEFAULT_STACK_NAME: &str = "PersistentEtcFilesStack";

/// Smallest VPC prefix the platform accepts
pub const MIN_VPC_PREFIX: u8 = 16;

/// Largest VPC or subnet prefix the platform accepts
pub const MAX_PREFIX: u8 = 28;

/// Top-level stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Stack name, also used as the prefix of `Name` tags
    pub stack_name: String,

    /// Template description
    pub description: Option<String>,

    /// Deployment region, only needed when rendering concrete user-data
    pub region: Option<String>,

    /// Tags applied to every taggable resource
    pub tags: BTreeMap<String, String>,

    pub network: NetworkConfig,
    pub security: SecurityConfig,
    pub file_system: FileSystemConfig,
    pub instance: InstanceConfig,
    pub bootstrap: BootstrapConfig,

    /// Emit `FileSystemId` and `InstanceId` outputs
    pub outputs: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            description: None,
            region: None,
            tags: BTreeMap::new(),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            file_system: FileSystemConfig::default(),
            instance: InstanceConfig::default(),
            bootstrap: BootstrapConfig::default(),
            outputs: true,
        }
    }
}

/// Virtual network layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// VPC address range
    pub cidr: String,

    /// Maximum number of availability zones to spread subnets over
    pub max_azs: usize,

    /// Explicit zone names; when empty, zones are picked with `Fn::GetAZs`
    pub availability_zones: Vec<String>,

    /// NAT gateways to create (defaults to one per zone)
    pub nat_gateways: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 1,
            availability_zones: Vec::new(),
            nat_gateways: None,
        }
    }
}

impl NetworkConfig {
    /// Number of zones the VPC will actually span
    pub fn zone_count(&self) -> usize {
        if self.availability_zones.is_empty() {
            self.max_azs
        } else {
            self.availability_zones.len().min(self.max_azs)
        }
    }

    /// Number of NAT gateways the VPC will actually create
    pub fn nat_gateway_count(&self) -> usize {
        self.nat_gateways.unwrap_or_else(|| self.zone_count())
    }
}

/// Additional rules for the security group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Extra inbound TCP rules on top of SSH and NFS
    pub extra_ingress: Vec<IngressConfig>,
}

/// One extra inbound TCP rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    pub port: u16,
    /// Source range (defaults to any IPv4 address)
    pub cidr: Option<String>,
    pub description: Option<String>,
}

/// Shared file store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    pub transition_to_ia: LifecyclePolicy,
    pub encrypted: bool,
    pub performance_mode: PerformanceMode,
    pub throughput_mode: ThroughputMode,
    pub removal_policy: RemovalPolicy,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            transition_to_ia: LifecyclePolicy::After14Days,
            encrypted: true,
            performance_mode: PerformanceMode::default(),
            throughput_mode: ThroughputMode::default(),
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

/// Compute instance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Instance type in `class.size` form
    pub instance_type: String,
    pub machine_image: MachineImage,
    /// Grant Session Manager access through `AmazonSSMManagedInstanceCore`
    pub ssm_session_permissions: bool,
    /// Optional EC2 key pair for SSH
    pub key_name: Option<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3a.micro".to_string(),
            machine_image: MachineImage::default(),
            ssm_session_permissions: true,
            key_name: None,
        }
    }
}

/// Bootstrap script settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Where the shared file system is mounted
    pub mount_point: String,

    /// Local configuration directory holding the credential files
    pub etc_dir: String,

    /// Credential files synchronized between `etc_dir` and the share
    pub files: Vec<String>,

    /// Cron schedule for copying the files back to the share
    pub schedule: String,

    pub mount_wait: MountWait,

    /// Re-export the mounted share through a local NFS server
    pub nfs_reexport: bool,

    pub mount_options: NfsMountOptions,

    /// Shell commands appended after the generated steps, emitted verbatim
    pub extra_commands: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            mount_point: "/mnt/efs".to_string(),
            etc_dir: "/etc".to_string(),
            files: vec![
                "passwd".to_string(),
                "group".to_string(),
                "shadow".to_string(),
            ],
            schedule: "0 * * * *".to_string(),
            mount_wait: MountWait::default(),
            nfs_reexport: true,
            mount_options: NfsMountOptions::default(),
            extra_commands: Vec::new(),
        }
    }
}

impl StackConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, StackError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, StackError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a configuration, picking the format from the file extension
    pub fn parse_for_path(path: &Path, content: &str) -> Result<Self, StackError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(content),
            _ => Self::from_yaml(content),
        }
    }

    /// Check the configuration for values the platform would reject
    pub fn validate(&self) -> Result<(), StackError> {
        validate_stack_name(&self.stack_name)?;
        self.validate_network()?;

        for rule in &self.security.extra_ingress {
            if rule.port == 0 {
                return Err(StackError::Config("ingress port must be non-zero".into()));
            }
            if let Some(cidr) = &rule.cidr {
                cidr.parse::<Ipv4Cidr>()?;
            }
        }

        self.instance.instance_type.parse::<InstanceType>()?;
        if let MachineImage::Ami { id } = &self.instance.machine_image {
            if !id.starts_with("ami-") {
                return Err(StackError::Config(format!("invalid AMI id '{}'", id)));
            }
        }

        self.validate_bootstrap()
    }

    fn validate_network(&self) -> Result<(), StackError> {
        let cidr: Ipv4Cidr = self.network.cidr.parse()?;
        if cidr.prefix() < MIN_VPC_PREFIX || cidr.prefix() > MAX_PREFIX {
            return Err(StackError::cidr(
                &self.network.cidr,
                format!("VPC prefix must be between /{} and /{}", MIN_VPC_PREFIX, MAX_PREFIX),
            ));
        }

        let zones = self.network.zone_count();
        if zones == 0 {
            return Err(StackError::Network("at least one availability zone is required".into()));
        }

        let nat = self.network.nat_gateway_count();
        if nat == 0 || nat > zones {
            return Err(StackError::Network(format!(
                "nat_gateways must be between 1 and {} (private subnets need egress)",
                zones
            )));
        }
        Ok(())
    }

    fn validate_bootstrap(&self) -> Result<(), StackError> {
        let boot = &self.bootstrap;

        validate_shell_path("mount_point", &boot.mount_point)?;
        validate_shell_path("etc_dir", &boot.etc_dir)?;

        if boot.files.is_empty() {
            return Err(StackError::Config("bootstrap.files must not be empty".into()));
        }
        for file in &boot.files {
            let safe = !file.is_empty()
                && file != "."
                && file != ".."
                && file
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !safe {
                return Err(StackError::Config(format!("unsafe file name '{}'", file)));
            }
        }

        let fields: Vec<&str> = boot.schedule.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(StackError::Config(format!(
                "cron schedule '{}' must have five fields",
                boot.schedule
            )));
        }
        // Names such as `mon` or `jan` are allowed, shell syntax is not
        let field_ok = |field: &&str| {
            field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-'))
        };
        if !fields.iter().all(field_ok) {
            return Err(StackError::Config(format!(
                "cron schedule '{}' contains invalid characters",
                boot.schedule
            )));
        }

        let version = &boot.mount_options.nfs_version;
        let version_ok = version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
        if !version_ok {
            return Err(StackError::Config(format!("invalid NFS version '{}'", version)));
        }

        boot.mount_wait.validate()
    }
}

fn validate_stack_name(name: &str) -> Result<(), StackError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        && name.len() <= 128;
    if valid {
        Ok(())
    } else {
        Err(StackError::Config(format!("invalid stack name '{}'", name)))
    }
}

fn validate_shell_path(field: &str, path: &str) -> Result<(), StackError> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '$' | '\\' | ';'));
    if valid {
        Ok(())
    } else {
        Err(StackError::Config(format!(
            "{} must be an absolute path without shell metacharacters: '{}'",
            field, path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = StackConfig::from_yaml("").unwrap();
        assert_eq!(config.stack_name, DEFAULT_STACK_NAME);
        assert_eq!(config.network.max_azs, 1);
        assert_eq!(config.instance.instance_type, "t3a.micro");
        assert_eq!(config.bootstrap.files, vec!["passwd", "group", "shadow"]);
        assert_eq!(config.file_system.transition_to_ia, LifecyclePolicy::After14Days);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
stack_name: etc-sync
network:
  max_azs: 2
file_system:
  transition_to_ia: AFTER_30_DAYS
bootstrap:
  mount_wait:
    strategy: poll
    interval_secs: 5
    timeout_secs: 120
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stack_name, "etc-sync");
        assert_eq!(config.network.zone_count(), 2);
        assert_eq!(config.network.nat_gateway_count(), 2);
        assert_eq!(config.file_system.transition_to_ia, LifecyclePolicy::After30Days);
        assert_eq!(
            config.bootstrap.mount_wait,
            MountWait::Poll {
                interval_secs: 5,
                timeout_secs: 120
            }
        );
        // Untouched sections keep their defaults
        assert_eq!(config.bootstrap.mount_point, "/mnt/efs");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let config = StackConfig::from_json(r#"{"region": "eu-west-1", "outputs": false}"#).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(!config.outputs);
    }

    #[test]
    fn test_explicit_zones_are_capped_by_max_azs() {
        let mut network = NetworkConfig::default();
        network.availability_zones = vec!["us-east-1a".into(), "us-east-1b".into()];
        assert_eq!(network.zone_count(), 1);
        network.max_azs = 3;
        assert_eq!(network.zone_count(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_network() {
        let mut config = StackConfig::default();
        config.network.cidr = "10.0.0.0/8".into();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.network.max_azs = 0;
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.network.nat_gateways = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsafe_files() {
        for bad in ["../shadow", "", "pass wd", ".."] {
            let mut config = StackConfig::default();
            config.bootstrap.files = vec![bad.to_string()];
            assert!(config.validate().is_err(), "accepted {:?}", bad);
        }

        let mut config = StackConfig::default();
        config.bootstrap.files.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_paths_and_schedule() {
        let mut config = StackConfig::default();
        config.bootstrap.mount_point = "mnt/efs".into();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.bootstrap.etc_dir = "/etc; rm -rf /".into();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.bootstrap.schedule = "@hourly".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shell_in_schedule_and_nfs_version() {
        let mut config = StackConfig::default();
        config.bootstrap.schedule = "0 * * * \"$(reboot)\"".into();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.bootstrap.schedule = "*/15 0-6 1,15 jan mon-fri".into();
        config.validate().unwrap();

        for bad in ["4.1\"; reboot; echo \"", "", "4.", "v4"] {
            let mut config = StackConfig::default();
            config.bootstrap.mount_options.nfs_version = bad.to_string();
            assert!(config.validate().is_err(), "accepted {:?}", bad);
        }

        let mut config = StackConfig::default();
        config.bootstrap.mount_options.nfs_version = "4".into();
        config.validate().unwrap();
    }

    #[test]
    fn test_removal_policy_values() {
        let config = StackConfig::from_yaml("file_system:\n  removal_policy: retain\n").unwrap();
        assert_eq!(config.file_system.removal_policy, RemovalPolicy::Retain);

        let result = StackConfig::from_yaml("file_system:\n  removal_policy: snapshot\n");
        assert!(matches!(result, Err(StackError::Yaml(_))));
    }

    #[test]
    fn test_validate_rejects_bad_instance() {
        let mut config = StackConfig::default();
        config.instance.instance_type = "micro".into();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.instance.machine_image = MachineImage::Ami {
            id: "img-123".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_stack_name() {
        assert!(validate_stack_name("Etc-Files-1").is_ok());
        assert!(validate_stack_name("1stack").is_err());
        assert!(validate_stack_name("stack_name").is_err());
        assert!(validate_stack_name("").is_err());
    }
}

//! Compute instance
//!
//! One instance in the first private subnet. It carries the bootstrap script as
//! user data and runs under a role that the stack's policies attach to.

use crate::StackError;
use crate::iam::Role;
use crate::network::{Subnet, Vpc};
use crate::synth::{Construct, Parameter, Resource, SynthContext, Template, intrinsic};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// Logical id of the machine-image parameter
pub const IMAGE_PARAMETER_ID: &str = "LatestAmiId";

/// Service principal for instance roles
pub const EC2_SERVICE: &str = "ec2.amazonaws.com";

/// Instance type such as `t3a.micro`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType {
    class: String,
    size: String,
}

impl InstanceType {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn size(&self) -> &str {
        &self.size
    }
}

impl FromStr for InstanceType {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StackError::Config(format!("invalid instance type '{}'", s));

        let (class, size) = s.split_once('.').ok_or_else(invalid)?;
        let class_ok = class.chars().next().is_some_and(|c| c.is_ascii_lowercase())
            && class
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let size_ok = !size.is_empty() && size.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !class_ok || !size_ok {
            return Err(invalid());
        }

        Ok(Self {
            class: class.to_string(),
            size: size.to_string(),
        })
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.size)
    }
}

/// CPU architecture of the machine image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[default]
    X86_64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Machine image selection
///
/// Written as a map with a `kind` field, e.g. `{ kind: ami, id: ami-0abc }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineImage {
    /// Latest Amazon Linux 2023, resolved from the public SSM parameter at deploy time
    LatestAmazonLinux2023 {
        #[serde(default)]
        arch: Arch,
    },
    /// A fixed AMI id
    Ami { id: String },
}

impl Default for MachineImage {
    fn default() -> Self {
        Self::LatestAmazonLinux2023 { arch: Arch::default() }
    }
}

impl MachineImage {
    /// Public SSM parameter path, if the image is resolved at deploy time
    pub fn ssm_parameter(&self) -> Option<String> {
        match self {
            Self::LatestAmazonLinux2023 { arch } => Some(format!(
                "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-{}",
                arch.as_str()
            )),
            Self::Ami { .. } => None,
        }
    }

    fn image_id(&self) -> Value {
        match self {
            Self::LatestAmazonLinux2023 { .. } => intrinsic::reference(IMAGE_PARAMETER_ID),
            Self::Ami { id } => json!(id),
        }
    }
}

/// The instance, its role and its instance profile
#[derive(Debug, Clone)]
pub struct Instance {
    id: String,
    instance_type: InstanceType,
    image: MachineImage,
    subnet: Subnet,
    security_group: Value,
    key_name: Option<String>,
    user_data: Value,
    role: Role,
}

impl Instance {
    /// Place an instance in the first private subnet of `vpc`
    ///
    /// `user_data` is the already-encoded `UserData` property value.
    pub fn new(
        id: impl Into<String>,
        config: &crate::config::InstanceConfig,
        vpc: &Vpc,
        security_group: Value,
        user_data: Value,
    ) -> Result<Self, StackError> {
        let id = id.into();
        let role = Role::new(format!("{}InstanceRole", id), EC2_SERVICE);
        Ok(Self {
            instance_type: config.instance_type.parse()?,
            image: config.machine_image.clone(),
            subnet: vpc.primary_private_subnet()?.clone(),
            security_group,
            key_name: config.key_name.clone(),
            user_data,
            role,
            id,
        })
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn role_mut(&mut self) -> &mut Role {
        &mut self.role
    }

    pub fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    pub fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    pub fn profile_id(&self) -> String {
        format!("{}InstanceProfile", self.id)
    }
}

impl Construct for Instance {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        if let Some(path) = self.image.ssm_parameter() {
            if !template.parameters.contains_key(IMAGE_PARAMETER_ID) {
                template.add_parameter(
                    IMAGE_PARAMETER_ID,
                    Parameter {
                        parameter_type: "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>".into(),
                        default: Some(path),
                        description: Some("Machine image for the instance".into()),
                    },
                )?;
            }
        }

        self.role.synthesize(ctx, template)?;

        template.add_resource(
            self.profile_id(),
            Resource::new("AWS::IAM::InstanceProfile")
                .property("Roles", json!([intrinsic::reference(self.role.id())])),
        )?;

        let mut instance = Resource::new("AWS::EC2::Instance")
            .property("AvailabilityZone", self.subnet.zone.to_value())
            .property("IamInstanceProfile", intrinsic::reference(&self.profile_id()))
            .property("ImageId", self.image.image_id())
            .property("InstanceType", self.instance_type.to_string())
            .property("SecurityGroupIds", json!([self.security_group]))
            .property("SubnetId", intrinsic::reference(&self.subnet.logical_id()))
            .property("UserData", self.user_data.clone())
            .property("Tags", ctx.tags_named(&self.id))
            .depends_on(self.role.id());
        if let Some(key) = &self.key_name {
            instance = instance.property("KeyName", key.as_str());
        }

        template.add_resource(&self.id, instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, NetworkConfig};
    use std::collections::BTreeMap;

    fn instance(config: &InstanceConfig) -> Instance {
        let vpc = Vpc::new("Vpc", &NetworkConfig::default()).unwrap();
        Instance::new(
            "Instance",
            config,
            &vpc,
            intrinsic::get_att("SecurityGroup", "GroupId"),
            intrinsic::base64(intrinsic::sub("#!/bin/bash")),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_instance_type() {
        let t: InstanceType = "t3a.micro".parse().unwrap();
        assert_eq!(t.class(), "t3a");
        assert_eq!(t.size(), "micro");
        assert_eq!(t.to_string(), "t3a.micro");

        assert!("t3a".parse::<InstanceType>().is_err());
        assert!("T3.micro".parse::<InstanceType>().is_err());
        assert!("t3.".parse::<InstanceType>().is_err());
    }

    #[test]
    fn test_machine_image_config() {
        let image: MachineImage =
            serde_yaml::from_str("kind: latest_amazon_linux2023\narch: arm64\n").unwrap();
        assert_eq!(
            image.ssm_parameter().as_deref(),
            Some("/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-arm64")
        );

        let image: MachineImage = serde_yaml::from_str("kind: ami\nid: ami-0abc\n").unwrap();
        assert_eq!(image.ssm_parameter(), None);
        assert_eq!(image.image_id(), json!("ami-0abc"));

        let image: MachineImage = serde_yaml::from_str("kind: latest_amazon_linux2023\n").unwrap();
        assert_eq!(image, MachineImage::default());
    }

    #[test]
    fn test_instance_in_private_subnet() {
        let instance = instance(&InstanceConfig::default());
        assert_eq!(instance.subnet().logical_id(), "VpcPrivateSubnet1Subnet");

        let mut template = Template::new();
        instance
            .synthesize(&SynthContext::new("Stack", BTreeMap::new()), &mut template)
            .unwrap();

        let resource = template.resource("Instance").unwrap();
        assert_eq!(resource.get("InstanceType"), Some(&json!("t3a.micro")));
        assert_eq!(resource.get("ImageId"), Some(&json!({"Ref": IMAGE_PARAMETER_ID})));
        assert_eq!(resource.depends_on, vec!["InstanceInstanceRole"]);
        assert!(resource.get("KeyName").is_none());
        assert!(template.parameters.contains_key(IMAGE_PARAMETER_ID));
        assert!(template.resource("InstanceInstanceProfile").is_some());
    }

    #[test]
    fn test_explicit_ami_and_key() {
        let config = InstanceConfig {
            machine_image: MachineImage::Ami {
                id: "ami-0123456789abcdef0".into(),
            },
            key_name: Some("ops".into()),
            ..Default::default()
        };
        let instance = instance(&config);

        let mut template = Template::new();
        instance
            .synthesize(&SynthContext::new("Stack", BTreeMap::new()), &mut template)
            .unwrap();

        let resource = template.resource("Instance").unwrap();
        assert_eq!(resource.get("ImageId"), Some(&json!("ami-0123456789abcdef0")));
        assert_eq!(resource.get("KeyName"), Some(&json!("ops")));
        assert!(template.parameters.is_empty());
    }
}

//! End-to-end synthesis tests

use persistent_etc_files::checks::check_template;
use persistent_etc_files::config::ConfigLoader;
use persistent_etc_files::synth::{deployment_order, graph};
use persistent_etc_files::{Stack, StackConfig, Template, synth_stack};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_test::assert_ok;

fn default_template() -> Template {
    synth_stack(StackConfig::default()).unwrap()
}

fn user_data(template: &Template) -> String {
    template.resource("Instance").unwrap().get("UserData").unwrap()["Fn::Base64"]["Fn::Sub"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_default_resource_inventory() {
    let template = default_template();

    for id in [
        "Vpc",
        "VpcPublicSubnet1Subnet",
        "VpcPublicSubnet1NATGateway",
        "VpcPrivateSubnet1Subnet",
        "VpcPrivateSubnet1DefaultRoute",
        "VpcIGW",
        "VpcVPCGW",
        "SecurityGroup",
        "EfsFileSystem",
        "EfsFileSystemEfsMountTarget1",
        "Instance",
        "InstanceInstanceRole",
        "InstanceInstanceProfile",
        "EfsPolicy",
    ] {
        assert!(template.resource(id).is_some(), "missing {}", id);
    }

    assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 2);
    assert_eq!(template.resources_of_type("AWS::EFS::MountTarget").count(), 1);
    assert!(template.parameters.contains_key("LatestAmiId"));
}

#[test]
fn test_single_zone_cidrs() {
    let template = default_template();
    let cidr = |id: &str| template.resource(id).unwrap().get("CidrBlock").cloned();

    assert_eq!(cidr("Vpc"), Some(json!("10.0.0.0/16")));
    assert_eq!(cidr("VpcPublicSubnet1Subnet"), Some(json!("10.0.0.0/17")));
    assert_eq!(cidr("VpcPrivateSubnet1Subnet"), Some(json!("10.0.128.0/17")));
}

#[test]
fn test_instance_properties() {
    let template = default_template();
    let instance = template.resource("Instance").unwrap();

    assert_eq!(instance.get("InstanceType"), Some(&json!("t3a.micro")));
    assert_eq!(
        instance.get("SubnetId"),
        Some(&json!({ "Ref": "VpcPrivateSubnet1Subnet" }))
    );
    assert_eq!(
        instance.get("SecurityGroupIds"),
        Some(&json!([{ "Fn::GetAtt": ["SecurityGroup", "GroupId"] }]))
    );
    assert_eq!(instance.depends_on, vec!["InstanceInstanceRole".to_string()]);
}

#[test]
fn test_user_data_references_file_system() {
    let template = default_template();
    let script = user_data(&template);

    assert!(script.starts_with("#!/bin/bash\nyum update -y\n"));
    assert!(script.contains(
        "echo \"${EfsFileSystem}.efs.${AWS::Region}.amazonaws.com:/ /mnt/efs nfs4 nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2,noresvport,_netdev 0 0\" | tee -a /etc/fstab"
    ));
    assert!(script.ends_with("systemctl restart crond"));
    assert_eq!(graph::sub_placeholders(&script), vec!["EfsFileSystem"]);
}

#[test]
fn test_file_system_properties() {
    let template = default_template();
    let fs = template.resource("EfsFileSystem").unwrap();

    assert_eq!(fs.get("Encrypted"), Some(&json!(true)));
    assert_eq!(
        fs.get("LifecyclePolicies"),
        Some(&json!([{ "TransitionToIA": "AFTER_14_DAYS" }]))
    );
    assert_eq!(fs.deletion_policy.as_deref(), Some("Delete"));
    assert_eq!(fs.update_replace_policy.as_deref(), Some("Delete"));

    let target = template.resource("EfsFileSystemEfsMountTarget1").unwrap();
    assert_eq!(target.get("FileSystemId"), Some(&json!({ "Ref": "EfsFileSystem" })));
}

#[test]
fn test_iam_wiring() {
    let template = default_template();

    let role = template.resource("InstanceInstanceRole").unwrap();
    let arns = serde_json::to_string(role.get("ManagedPolicyArns").unwrap()).unwrap();
    assert!(arns.contains("AmazonElasticFileSystemClientFullAccess"));
    assert!(arns.contains("AmazonSSMManagedInstanceCore"));

    let policy = template.resource("EfsPolicy").unwrap();
    assert_eq!(
        policy.get("PolicyDocument"),
        Some(&json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["elasticfilesystem:ClientMount"],
                "Resource": [{ "Fn::GetAtt": ["EfsFileSystem", "Arn"] }]
            }]
        }))
    );
    assert_eq!(
        policy.get("Roles"),
        Some(&json!([{ "Ref": "InstanceInstanceRole" }]))
    );
}

#[test]
fn test_file_system_before_instance() {
    let template = default_template();
    let order = deployment_order(&template).unwrap();
    let position = |id: &str| order.iter().position(|o| o == id).unwrap();

    assert_eq!(order.len(), template.resources.len());
    assert!(position("EfsFileSystem") < position("Instance"));
    assert!(position("InstanceInstanceRole") < position("EfsPolicy"));
    assert!(position("Vpc") < position("SecurityGroup"));
}

#[test]
fn test_two_zones() {
    let mut config = StackConfig::default();
    config.network.max_azs = 2;
    let template = synth_stack(config).unwrap();

    assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 4);
    assert_eq!(template.resources_of_type("AWS::EFS::MountTarget").count(), 2);
    assert!(check_template(&template).is_success());
}

#[test]
fn test_json_and_yaml_output_parse_back() {
    let template = default_template();

    let from_json = Template::from_json(&template.to_json().unwrap()).unwrap();
    assert_eq!(from_json, template);

    let yaml = template.to_yaml().unwrap();
    assert!(yaml.contains("AWSTemplateFormatVersion"));
    let from_yaml = Template::from_yaml(&yaml).unwrap();
    assert_eq!(from_yaml.resources.len(), template.resources.len());
    assert!(check_template(&from_yaml).is_success());
}

#[test]
fn test_tags_carry_stack_name() {
    let mut config = StackConfig::default();
    config.stack_name = "Creds".to_string();
    config.tags.insert("team".to_string(), "platform".to_string());
    let template = synth_stack(config).unwrap();

    let tags = template.resource("Instance").unwrap().get("Tags").unwrap();
    assert_eq!(tags[0], json!({ "Key": "Name", "Value": "Creds/Instance" }));
    assert!(tags.as_array().unwrap().contains(&json!({ "Key": "team", "Value": "platform" })));
}

#[test]
fn test_literal_ami_skips_parameter() {
    let yaml = "instance:\n  machine_image:\n    kind: ami\n    id: ami-0123456789abcdef0\n";
    let config = StackConfig::from_yaml(yaml).unwrap();
    let template = synth_stack(config).unwrap();

    assert!(template.parameters.is_empty());
    assert_eq!(
        template.resource("Instance").unwrap().get("ImageId"),
        Some(&Value::from("ami-0123456789abcdef0"))
    );
}

#[tokio::test]
async fn test_synth_from_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stack.yaml");
    tokio::fs::write(
        &path,
        "stack_name: FromFile\nfile_system:\n  removal_policy: retain\nbootstrap:\n  files: [passwd, group]\n",
    )
    .await
    .unwrap();

    let config = assert_ok!(ConfigLoader::new().with_file(&path).load().await);
    let stack = assert_ok!(Stack::new(config));
    let template = assert_ok!(stack.synth());

    let fs = template.resource("EfsFileSystem").unwrap();
    assert_eq!(fs.deletion_policy.as_deref(), Some("Retain"));
    let script = user_data(&template);
    assert!(!script.contains("shadow"));
    assert_eq!(script.matches(">> /etc/crontab").count(), 2);
}

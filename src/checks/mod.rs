//! Acceptance checks over a deployment template
//!
//! Works on any template, synthesized or loaded from disk, so a template
//! edited by hand can be checked before it is deployed.

use crate::StackError;
use crate::iam::{self, PolicyDocument};
use crate::security::{NFS_PORT, SSH_PORT};
use crate::synth::{Resource, Template, deployment_order, intrinsic};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

const INSTANCE_TYPE: &str = "AWS::EC2::Instance";
const FILE_SYSTEM_TYPE: &str = "AWS::EFS::FileSystem";
const MOUNT_TARGET_TYPE: &str = "AWS::EFS::MountTarget";
const SECURITY_GROUP_TYPE: &str = "AWS::EC2::SecurityGroup";
const SUBNET_TYPE: &str = "AWS::EC2::Subnet";
const POLICY_TYPE: &str = "AWS::IAM::Policy";

/// Outcome of a single check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }

    fn from_result(name: &'static str, result: Result<String, String>) -> Self {
        match result {
            Ok(detail) => Self::pass(name, detail),
            Err(detail) => Self::fail(name, detail),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAILED" };
        write!(f, "{:<24} {:<6} {}", self.name, mark, self.detail)
    }
}

/// Results of every check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub results: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Turn failures into an error listing them
    pub fn into_result(self) -> Result<Self, StackError> {
        if self.is_success() {
            return Ok(self);
        }
        let names: Vec<&str> = self.failures().map(|r| r.name).collect();
        Err(StackError::Config(format!(
            "template failed check(s): {}",
            names.join(", ")
        )))
    }
}

/// Run every acceptance check against `template`
pub fn check_template(template: &Template) -> ValidationReport {
    let results = vec![
        CheckResult::from_result("mount-line", check_mount_line(template)),
        CheckResult::from_result("ingress", check_ingress(template)),
        CheckResult::from_result("egress", check_egress(template)),
        CheckResult::from_result("scoped-policy", check_scoped_policy(template)),
        CheckResult::from_result("subnet-layout", check_subnet_layout(template)),
        CheckResult::from_result("private-placement", check_private_placement(template)),
        CheckResult::from_result("deployment-order", check_deployment_order(template)),
    ];

    for result in &results {
        if result.passed {
            debug!("check {} passed: {}", result.name, result.detail);
        } else {
            warn!("check {} failed: {}", result.name, result.detail);
        }
    }

    ValidationReport { results }
}

fn single<'a>(
    template: &'a Template,
    resource_type: &'a str,
) -> Result<(&'a str, &'a Resource), String> {
    let mut found = template.resources_of_type(resource_type);
    let first = found
        .next()
        .ok_or_else(|| format!("no {} resource", resource_type))?;
    if found.next().is_some() {
        return Err(format!("more than one {} resource", resource_type));
    }
    Ok((first.0.as_str(), first.1))
}

fn ref_target(value: &Value) -> Option<&str> {
    value.get("Ref").and_then(Value::as_str)
}

/// Text of a `Fn::Base64(Fn::Sub(...))` user-data value
fn user_data_text(value: &Value) -> Option<&str> {
    let inner = value.get("Fn::Base64").unwrap_or(value);
    match inner.get("Fn::Sub") {
        Some(Value::String(text)) => Some(text),
        Some(Value::Array(parts)) => parts.first().and_then(Value::as_str),
        _ => inner.as_str(),
    }
}

fn check_mount_line(template: &Template) -> Result<String, String> {
    let (fs_id, _) = single(template, FILE_SYSTEM_TYPE)?;
    let (instance_id, instance) = single(template, INSTANCE_TYPE)?;

    let text = instance
        .get("UserData")
        .and_then(user_data_text)
        .ok_or_else(|| format!("{} has no substituted user data", instance_id))?;
    let token = intrinsic::placeholder(fs_id);

    text.lines()
        .find(|line| line.contains(" nfs4 ") && line.contains(&token))
        .map(|line| format!("mount line references {}: {}", token, line))
        .ok_or_else(|| format!("no nfs4 mount line references {}", token))
}

/// (protocol, from, to, cidr) of each rule in a security group property
fn rules(resource: &Resource, property: &str) -> Vec<(String, i64, i64, String)> {
    resource
        .get(property)
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|rule| {
                    let protocol = match rule.get("IpProtocol") {
                        Some(Value::String(p)) => p.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    (
                        protocol,
                        rule.get("FromPort").and_then(Value::as_i64).unwrap_or(-1),
                        rule.get("ToPort").and_then(Value::as_i64).unwrap_or(-1),
                        rule.get("CidrIp")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn covers(rule: &(String, i64, i64, String), port: u16) -> bool {
    let (protocol, from, to, cidr) = rule;
    let port = i64::from(port);
    cidr == "0.0.0.0/0"
        && (protocol == "-1" || (protocol == "tcp" && *from <= port && port <= *to))
}

fn check_ingress(template: &Template) -> Result<String, String> {
    let (sg_id, sg) = single(template, SECURITY_GROUP_TYPE)?;
    let ingress = rules(sg, "SecurityGroupIngress");

    let missing: Vec<String> = [SSH_PORT, NFS_PORT]
        .into_iter()
        .filter(|port| !ingress.iter().any(|rule| covers(rule, *port)))
        .map(|port| port.to_string())
        .collect();

    if missing.is_empty() {
        Ok(format!("{} admits tcp/{} and tcp/{}", sg_id, SSH_PORT, NFS_PORT))
    } else {
        Err(format!("{} does not admit tcp/{}", sg_id, missing.join(", tcp/")))
    }
}

fn check_egress(template: &Template) -> Result<String, String> {
    let (sg_id, sg) = single(template, SECURITY_GROUP_TYPE)?;
    let all = rules(sg, "SecurityGroupEgress")
        .iter()
        .any(|(protocol, _, _, cidr)| protocol == "-1" && cidr == "0.0.0.0/0");

    if all {
        Ok(format!("{} allows all outbound traffic", sg_id))
    } else {
        Err(format!("{} restricts outbound traffic", sg_id))
    }
}

fn check_scoped_policy(template: &Template) -> Result<String, String> {
    let (fs_id, _) = single(template, FILE_SYSTEM_TYPE)?;
    let arn = intrinsic::get_att(fs_id, "Arn");

    for (policy_id, policy) in template.resources_of_type(POLICY_TYPE) {
        let Some(document) = policy.get("PolicyDocument") else {
            continue;
        };
        let document: PolicyDocument = serde_json::from_value(document.clone())
            .map_err(|e| format!("{}: unreadable policy document: {}", policy_id, e))?;

        let mentions_mount = document
            .statements
            .iter()
            .any(|s| s.actions.iter().any(|a| a == iam::CLIENT_MOUNT_ACTION));
        if !mentions_mount {
            continue;
        }

        if document.statements.len() == 1
            && document.statements[0].is_scoped_to(iam::CLIENT_MOUNT_ACTION, &arn)
        {
            return Ok(format!(
                "{} allows only {} on {}",
                policy_id,
                iam::CLIENT_MOUNT_ACTION,
                fs_id
            ));
        }
        return Err(format!(
            "{} grants more than {} on {}",
            policy_id,
            iam::CLIENT_MOUNT_ACTION,
            fs_id
        ));
    }

    Err(format!("no policy grants {}", iam::CLIENT_MOUNT_ACTION))
}

/// Subnet logical id to whether it is public
fn subnet_kinds(template: &Template) -> BTreeMap<&str, bool> {
    template
        .resources_of_type(SUBNET_TYPE)
        .map(|(id, subnet)| {
            let public = subnet
                .get("MapPublicIpOnLaunch")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (id.as_str(), public)
        })
        .collect()
}

fn check_subnet_layout(template: &Template) -> Result<String, String> {
    // zone -> (public, private)
    let mut zones: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (id, subnet) in template.resources_of_type(SUBNET_TYPE) {
        let zone = subnet
            .get("AvailabilityZone")
            .map(Value::to_string)
            .ok_or_else(|| format!("{} has no availability zone", id))?;
        let public = subnet
            .get("MapPublicIpOnLaunch")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let counts = zones.entry(zone).or_default();
        if public {
            counts.0 += 1;
        } else {
            counts.1 += 1;
        }
    }

    if zones.is_empty() {
        return Err("no subnets".to_string());
    }
    if let Some((zone, (public, private))) = zones.iter().find(|(_, c)| **c != (1, 1)) {
        return Err(format!(
            "zone {} has {} public and {} private subnet(s)",
            zone, public, private
        ));
    }
    Ok(format!("{} zone(s), one public and one private subnet each", zones.len()))
}

fn check_private_placement(template: &Template) -> Result<String, String> {
    let kinds = subnet_kinds(template);
    let is_private = |resource: &Resource| {
        resource
            .get("SubnetId")
            .and_then(ref_target)
            .and_then(|id| kinds.get(id))
            .is_some_and(|public| !public)
    };

    let (instance_id, instance) = single(template, INSTANCE_TYPE)?;
    if !is_private(instance) {
        return Err(format!("{} is not in a private subnet", instance_id));
    }

    let mut targets = 0;
    for (id, target) in template.resources_of_type(MOUNT_TARGET_TYPE) {
        if !is_private(target) {
            return Err(format!("{} is not in a private subnet", id));
        }
        targets += 1;
    }
    if targets == 0 {
        return Err("no mount targets".to_string());
    }

    Ok(format!(
        "{} and {} mount target(s) are in private subnets",
        instance_id, targets
    ))
}

fn check_deployment_order(template: &Template) -> Result<String, String> {
    let (fs_id, _) = single(template, FILE_SYSTEM_TYPE)?;
    let (instance_id, _) = single(template, INSTANCE_TYPE)?;
    let order = deployment_order(template).map_err(|e| e.to_string())?;

    let position = |id: &str| order.iter().position(|o| o == id);
    match (position(fs_id), position(instance_id)) {
        (Some(fs), Some(instance)) if fs < instance => Ok(format!(
            "{} is created before {} ({} resources)",
            fs_id,
            instance_id,
            order.len()
        )),
        _ => Err(format!("{} is not created before {}", fs_id, instance_id)),
    }
}

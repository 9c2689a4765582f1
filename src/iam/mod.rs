//! Identity and authorization
//!
//! The instance role, the managed policies attached to it, and the narrow
//! custom policy that allows mounting one file system.

use crate::StackError;
use crate::synth::{Construct, Resource, SynthContext, Template, intrinsic, one_or_many};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// Managed policy granting broad file-system client access
pub const EFS_CLIENT_FULL_ACCESS: &str = "AmazonElasticFileSystemClientFullAccess";

/// Managed policy enabling Session Manager
pub const SSM_MANAGED_INSTANCE_CORE: &str = "AmazonSSMManagedInstanceCore";

/// The single action the scoped policy grants
pub const CLIENT_MOUNT_ACTION: &str = "elasticfilesystem:ClientMount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,

    #[serde(rename = "Action", deserialize_with = "one_or_many")]
    pub actions: Vec<String>,

    #[serde(
        rename = "Resource",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resources: Vec<Value>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: Vec<Value>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    /// Whether this statement allows exactly `action` on exactly `resource`
    pub fn is_scoped_to(&self, action: &str, resource: &Value) -> bool {
        self.effect == Effect::Allow
            && self.actions.len() == 1
            && self.actions[0] == action
            && self.resources.len() == 1
            && &self.resources[0] == resource
            && !is_wildcard(resource)
    }
}

/// Whether a resource value grants access to everything
pub fn is_wildcard(resource: &Value) -> bool {
    resource.as_str().is_some_and(|s| s.contains('*'))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Statement", deserialize_with = "one_or_many")]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    pub fn to_value(&self) -> Result<Value, StackError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Reference to a platform-provided policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    pub fn aws(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> Value {
        intrinsic::managed_policy_arn(&self.name)
    }
}

/// Role assumed by a service principal
#[derive(Debug, Clone)]
pub struct Role {
    id: String,
    service: String,
    managed_policies: Vec<ManagedPolicy>,
}

impl Role {
    pub fn new(id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            managed_policies: Vec::new(),
        }
    }

    pub fn add_managed_policy(&mut self, policy: ManagedPolicy) {
        if !self.managed_policies.contains(&policy) {
            self.managed_policies.push(policy);
        }
    }

    pub fn managed_policies(&self) -> &[ManagedPolicy] {
        &self.managed_policies
    }

    fn assume_role_policy(&self) -> PolicyDocument {
        PolicyDocument::new(vec![Statement {
            effect: Effect::Allow,
            principal: Some(json!({ "Service": self.service })),
            actions: vec!["sts:AssumeRole".to_string()],
            resources: Vec::new(),
        }])
    }
}

impl Construct for Role {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        let arns: Vec<Value> = self.managed_policies.iter().map(ManagedPolicy::arn).collect();
        template.add_resource(
            &self.id,
            Resource::new("AWS::IAM::Role")
                .property("AssumeRolePolicyDocument", self.assume_role_policy().to_value()?)
                .property("ManagedPolicyArns", arns)
                .property("Tags", ctx.tags_named(&self.id)),
        )
    }
}

/// Custom inline policy attached to roles
#[derive(Debug, Clone)]
pub struct Policy {
    id: String,
    document: PolicyDocument,
    roles: Vec<String>,
}

impl Policy {
    pub fn new(id: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            id: id.into(),
            document: PolicyDocument::new(statements),
            roles: Vec::new(),
        }
    }

    pub fn attach_to_role(&mut self, role: &Role) {
        if !self.roles.iter().any(|r| r == role.id()) {
            self.roles.push(role.id().to_string());
        }
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl Construct for Policy {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, _ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        if self.roles.is_empty() {
            return Err(StackError::Config(format!(
                "policy '{}' is not attached to any role",
                self.id
            )));
        }
        let roles: Vec<Value> = self.roles.iter().map(|r| intrinsic::reference(r)).collect();
        template.add_resource(
            &self.id,
            Resource::new("AWS::IAM::Policy")
                .property("PolicyDocument", self.document.to_value()?)
                .property("PolicyName", self.id.as_str())
                .property("Roles", roles),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx() -> SynthContext {
        SynthContext::new("Stack", BTreeMap::new())
    }

    #[test]
    fn test_scoped_statement() {
        let arn = intrinsic::get_att("Fs", "Arn");
        let statement = Statement::allow(&[CLIENT_MOUNT_ACTION], vec![arn.clone()]);
        assert!(statement.is_scoped_to(CLIENT_MOUNT_ACTION, &arn));

        let broad = Statement::allow(&[CLIENT_MOUNT_ACTION, "elasticfilesystem:ClientWrite"], vec![arn.clone()]);
        assert!(!broad.is_scoped_to(CLIENT_MOUNT_ACTION, &arn));

        let wildcard = Statement::allow(&[CLIENT_MOUNT_ACTION], vec![json!("*")]);
        assert!(!wildcard.is_scoped_to(CLIENT_MOUNT_ACTION, &json!("*")));
    }

    #[test]
    fn test_document_accepts_scalar_fields() {
        let document: PolicyDocument = serde_json::from_value(json!({
            "Version": "2012-10-17",
            "Statement": {
                "Effect": "Allow",
                "Action": "elasticfilesystem:ClientMount",
                "Resource": {"Fn::GetAtt": ["Fs", "Arn"]}
            }
        }))
        .unwrap();

        assert_eq!(document.statements.len(), 1);
        assert_eq!(document.statements[0].actions, vec![CLIENT_MOUNT_ACTION]);
        let arn = intrinsic::get_att("Fs", "Arn");
        assert!(document.statements[0].is_scoped_to(CLIENT_MOUNT_ACTION, &arn));
    }

    #[test]
    fn test_role_synthesis() {
        let mut role = Role::new("InstanceRole", "ec2.amazonaws.com");
        role.add_managed_policy(ManagedPolicy::aws(EFS_CLIENT_FULL_ACCESS));
        role.add_managed_policy(ManagedPolicy::aws(EFS_CLIENT_FULL_ACCESS));
        assert_eq!(role.managed_policies().len(), 1);

        let mut template = Template::new();
        role.synthesize(&ctx(), &mut template).unwrap();
        let resource = template.resource("InstanceRole").unwrap();

        let assume = resource.get("AssumeRolePolicyDocument").unwrap();
        assert_eq!(assume["Statement"][0]["Principal"]["Service"], "ec2.amazonaws.com");
        assert_eq!(assume["Statement"][0]["Action"], json!(["sts:AssumeRole"]));
        assert!(assume["Statement"][0].get("Resource").is_none());
        assert_eq!(resource.get("ManagedPolicyArns").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_policy_requires_role() {
        let policy = Policy::new("EfsPolicy", Vec::new());
        let mut template = Template::new();
        assert!(policy.synthesize(&ctx(), &mut template).is_err());
    }

    #[test]
    fn test_policy_synthesis() {
        let role = Role::new("InstanceRole", "ec2.amazonaws.com");
        let mut policy = Policy::new(
            "EfsPolicy",
            vec![Statement::allow(&[CLIENT_MOUNT_ACTION], vec![intrinsic::get_att("Fs", "Arn")])],
        );
        policy.attach_to_role(&role);
        policy.attach_to_role(&role);
        assert_eq!(policy.roles(), &["InstanceRole".to_string()]);

        let mut template = Template::new();
        policy.synthesize(&ctx(), &mut template).unwrap();
        let resource = template.resource("EfsPolicy").unwrap();
        assert_eq!(
            resource.get("PolicyDocument"),
            Some(&json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["elasticfilesystem:ClientMount"],
                    "Resource": [{"Fn::GetAtt": ["Fs", "Arn"]}]
                }]
            }))
        );
        assert_eq!(resource.get("Roles"), Some(&json!([{"Ref": "InstanceRole"}])));
    }
}

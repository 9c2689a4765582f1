//! CloudFormation template model
//!
//! Components implement [`Construct`] and write their resources into a
//! [`Template`]. The template is what the platform deploys; nothing here talks
//! to a cloud API.

pub mod graph;
pub mod intrinsic;

pub use graph::{dependencies, deployment_order};

use crate::StackError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Template format version understood by CloudFormation
pub const FORMAT_VERSION: &str = "2010-09-09";

/// A synthesized CloudFormation template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource; logical ids must be unique
    pub fn add_resource(
        &mut self,
        id: impl Into<String>,
        resource: Resource,
    ) -> Result<(), StackError> {
        let id = id.into();
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(StackError::DuplicateResource(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Add a parameter; logical ids must be unique
    pub fn add_parameter(
        &mut self,
        id: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), StackError> {
        let id = id.into();
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(StackError::DuplicateResource(id));
        }
        self.parameters.insert(id, parameter);
        Ok(())
    }

    pub fn add_output(&mut self, id: impl Into<String>, output: Output) {
        self.outputs.insert(id.into(), output);
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources of one type, in logical-id order
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn to_json(&self) -> Result<String, StackError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, StackError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StackError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, StackError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a template file, picking the format from its extension
    pub fn parse_for_path(path: &Path, content: &str) -> Result<Self, StackError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(content),
            _ => Self::from_json(content),
        }
    }
}

/// Deserialize a field written either as a single value or as a list
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(values) => values,
        OneOrMany::One(value) => vec![value],
    })
}

/// One resource entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(
        rename = "DependsOn",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,

    #[serde(
        rename = "UpdateReplacePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_replace_policy: Option<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a property
    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Set both deletion and update-replace policies
    pub fn removal_policy(mut self, policy: &str) -> Self {
        self.deletion_policy = Some(policy.to_string());
        self.update_replace_policy = Some(policy.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Template output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Naming and tagging shared by every construct in a stack
#[derive(Debug, Clone)]
pub struct SynthContext {
    pub stack_name: String,
    pub tags: BTreeMap<String, String>,
}

impl SynthContext {
    pub fn new(stack_name: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            tags,
        }
    }

    /// Tag list with a `Name` tag of the form `<stack>/<path>`
    pub fn tags_named(&self, path: &str) -> Value {
        let name = format!("{}/{}", self.stack_name, path);
        let mut pairs: Vec<(&str, &str)> = vec![("Name", name.as_str())];
        pairs.extend(
            self.tags
                .iter()
                .filter(|(k, _)| k.as_str() != "Name")
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        intrinsic::tags(pairs)
    }
}

/// A component that contributes resources to a template
pub trait Construct {
    /// Logical id of the construct's primary resource
    fn id(&self) -> &str;

    /// Write this construct's resources into `template`
    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError>;
}

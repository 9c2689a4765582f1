//! Resource dependency graph
//!
//! CloudFormation infers most edges from `Ref`, `Fn::GetAtt` and `Fn::Sub`
//! placeholders, plus explicit `DependsOn`. We compute the same graph so that
//! ordering problems (a dangling reference, a cycle) show up at synth time.

use super::Template;
use crate::StackError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Logical ids each resource refers to, implicit and explicit
///
/// Pseudo parameters (`AWS::Region`, ...) are not included; template
/// parameters are.
pub fn dependencies(template: &Template) -> BTreeMap<String, BTreeSet<String>> {
    template
        .resources
        .iter()
        .map(|(id, resource)| {
            let mut refs = BTreeSet::new();
            for value in resource.properties.values() {
                collect_refs(value, &mut refs);
            }
            refs.extend(resource.depends_on.iter().cloned());
            (id.clone(), refs)
        })
        .collect()
}

/// Order in which the platform can create resources
///
/// Deterministic: among resources that are ready at the same time, logical
/// ids are taken in lexical order.
pub fn deployment_order(template: &Template) -> Result<Vec<String>, StackError> {
    let deps = dependencies(template);

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (id, targets) in &deps {
        let entry = in_degree.entry(id.as_str()).or_insert(0);
        for target in targets {
            if template.resources.contains_key(target) {
                *entry += 1;
                dependents
                    .entry(target.as_str())
                    .or_default()
                    .push(id.as_str());
            } else if !template.parameters.contains_key(target) {
                return Err(StackError::DanglingReference {
                    resource: id.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .collect();
        return Err(StackError::DependencyCycle(stuck.join(", ")));
    }

    Ok(order)
}

fn collect_refs(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    if !is_pseudo(target) {
                        out.insert(target.clone());
                    }
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    let target = match att {
                        Value::Array(parts) => parts.first().and_then(Value::as_str),
                        Value::String(dotted) => dotted.split('.').next(),
                        _ => None,
                    };
                    if let Some(target) = target {
                        out.insert(target.to_string());
                    }
                    return;
                }
                if let Some(sub) = map.get("Fn::Sub") {
                    collect_sub_refs(sub, out);
                    return;
                }
            }
            for nested in map.values() {
                collect_refs(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

fn collect_sub_refs(sub: &Value, out: &mut BTreeSet<String>) {
    match sub {
        Value::String(text) => out.extend(sub_placeholders(text)),
        Value::Array(parts) => {
            let Some(text) = parts.first().and_then(Value::as_str) else {
                return;
            };
            let local: BTreeSet<&str> = parts
                .get(1)
                .and_then(Value::as_object)
                .map(|vars| vars.keys().map(String::as_str).collect())
                .unwrap_or_default();
            out.extend(
                sub_placeholders(text)
                    .into_iter()
                    .filter(|name| !local.contains(name.as_str())),
            );
            if let Some(vars) = parts.get(1) {
                collect_refs(vars, out);
            }
        }
        _ => {}
    }
}

/// Logical ids named by `${...}` placeholders, skipping `${!...}` literals
/// and pseudo parameters
pub fn sub_placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        if rest.starts_with('!') {
            continue;
        }
        let Some(end) = rest.find('}') else {
            break;
        };
        let name = &rest[..end];
        let target = name.split('.').next().unwrap_or(name);
        if !target.is_empty() && !is_pseudo(target) {
            names.push(target.to_string());
        }
        rest = &rest[end + 1..];
    }

    names
}

fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

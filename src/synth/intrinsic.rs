//! CloudFormation intrinsic function helpers

use serde_json::{Value, json};

/// Pseudo parameter for the deployment region
pub const REGION: &str = "AWS::Region";

/// Pseudo parameter for the partition (`aws`, `aws-cn`, ...)
pub const PARTITION: &str = "AWS::Partition";

/// `{"Ref": id}`
pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// `{"Fn::Sub": text}`
pub fn sub(text: impl Into<String>) -> Value {
    json!({ "Fn::Sub": text.into() })
}

/// `{"Fn::Base64": value}`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `{"Fn::Join": [delimiter, parts]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// The `index`-th availability zone of the deployment region
pub fn select_az(index: usize) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

/// ARN of an AWS managed IAM policy, partition-aware
pub fn managed_policy_arn(name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            reference(PARTITION),
            json!(format!(":iam::aws:policy/{}", name)),
        ],
    )
}

/// A `${...}` placeholder for use inside `Fn::Sub` text
pub fn placeholder(name: &str) -> String {
    format!("${{{}}}", name)
}

/// Escape literal `${` so `Fn::Sub` leaves it alone
pub fn escape_sub(text: &str) -> String {
    text.replace("${", "${!")
}

/// `[{"Key": k, "Value": v}, ...]`
pub fn tags<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Value {
    Value::Array(
        pairs
            .into_iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

//! Template context building
//!
//! Builds the variables bootstrap step templates may use.

use crate::storage;
use crate::userdata::{BootContext, HostPaths};
use minijinja::value::Value;
use std::collections::HashMap;

/// Build the template context for a boot context and host layout
pub fn build_context(boot: &BootContext, paths: &HostPaths) -> HashMap<String, Value> {
    let mut ctx = HashMap::new();

    ctx.insert(
        "file_system_id".to_string(),
        Value::from(boot.file_system_id.clone()),
    );
    ctx.insert("region".to_string(), Value::from(boot.region.clone()));
    ctx.insert(
        "file_system_dns".to_string(),
        Value::from(storage::dns_name(&boot.file_system_id, &boot.region)),
    );

    ctx.insert(
        "mount_point".to_string(),
        Value::from(paths.mount_point.display().to_string()),
    );
    ctx.insert(
        "etc_dir".to_string(),
        Value::from(paths.etc_dir.display().to_string()),
    );
    ctx.insert(
        "share_dir".to_string(),
        Value::from(paths.share_dir().display().to_string()),
    );

    ctx
}

//! persistent-etc-files library
//!
//! Synthesizes a CloudFormation stack that keeps an instance's credential
//! files (`/etc/passwd`, `/etc/group`, `/etc/shadow`) on a shared EFS file
//! system, and runs the matching bootstrap script on the instance.
//!
//! # Components
//!
//! - **network**: VPC with one public and one private subnet per zone
//! - **security**: security group admitting SSH and NFS
//! - **storage**: encrypted EFS file system with a mount target per private subnet
//! - **compute**: instance in a private subnet with role and bootstrap user data
//! - **iam**: managed policies plus a policy scoped to `ClientMount` on the file system

pub mod boot;
pub mod checks;
pub mod compute;
pub mod config;
pub mod datasources;
pub mod iam;
pub mod network;
pub mod security;
pub mod stack;
pub mod storage;
pub mod synth;
pub mod template;
pub mod userdata;

mod error;

pub use boot::{BootReport, BootRunner, RunOptions};
pub use config::StackConfig;
pub use error::StackError;
pub use stack::Stack;
pub use synth::Template;

use config::BootstrapConfig;
use datasources::MetadataSource;
use tracing::info;
use userdata::{BootContext, BootScript};

/// Synthesize the template for a configuration
pub fn synth_stack(config: StackConfig) -> Result<Template, StackError> {
    Stack::new(config)?.synth()
}

/// Render and run the bootstrap script on this instance
///
/// `region` falls back to `metadata` when absent.
pub async fn boot_instance(
    config: &BootstrapConfig,
    file_system_id: &str,
    region: Option<String>,
    metadata: &dyn MetadataSource,
    options: RunOptions,
) -> Result<BootReport, StackError> {
    if file_system_id.trim().is_empty() {
        return Err(StackError::Config("file system id is empty".into()));
    }

    let region = match region {
        Some(region) => region,
        None => {
            info!("No region given, asking {} metadata", metadata.name());
            if !metadata.is_available().await {
                return Err(StackError::Metadata(format!(
                    "{} metadata is unreachable and no region was given",
                    metadata.name()
                )));
            }
            metadata.region().await?
        }
    };

    let script = BootScript::from_config(config)?.render(&BootContext::new(file_system_id, region))?;
    BootRunner::new(options).run(&script).await
}

//! The persistent credential files stack
//!
//! Wires the six components together: network, security group, file system,
//! instance (with its role and bootstrap script) and the scoped mount policy.

use crate::StackError;
use crate::compute::Instance;
use crate::config::StackConfig;
use crate::iam::{self, ManagedPolicy, Policy, Statement};
use crate::network::{Ipv4Cidr, Vpc};
use crate::security::{NFS_PORT, Peer, Port, SSH_PORT, SecurityGroup};
use crate::storage::FileSystem;
use crate::synth::{Construct, Output, SynthContext, Template, deployment_order, intrinsic};
use crate::userdata::BootScript;
use tracing::{debug, info};

pub const VPC_ID: &str = "Vpc";
pub const SECURITY_GROUP_ID: &str = "SecurityGroup";
pub const FILE_SYSTEM_ID: &str = "EfsFileSystem";
pub const INSTANCE_ID: &str = "Instance";
pub const POLICY_ID: &str = "EfsPolicy";

/// Default template description
pub const DESCRIPTION: &str =
    "EC2 instance that keeps /etc credential files on a shared EFS file system";

/// All components of the stack, ready to synthesize
#[derive(Debug, Clone)]
pub struct Stack {
    config: StackConfig,
    vpc: Vpc,
    security_group: SecurityGroup,
    file_system: FileSystem,
    boot_script: BootScript,
    instance: Instance,
    policy: Policy,
}

impl Stack {
    /// Build every component from a validated configuration
    pub fn new(config: StackConfig) -> Result<Self, StackError> {
        let vpc = Vpc::new(VPC_ID, &config.network)?;
        let security_group = security_group(&config)?;
        let file_system = FileSystem::new(
            FILE_SYSTEM_ID,
            &config.file_system,
            &vpc,
            security_group.group_id(),
        );

        let boot_script = BootScript::from_config(&config.bootstrap)?;
        let user_data = intrinsic::base64(intrinsic::sub(
            boot_script.render_for_template(file_system.id())?,
        ));

        let mut instance = Instance::new(
            INSTANCE_ID,
            &config.instance,
            &vpc,
            security_group.group_id(),
            user_data,
        )?;
        instance
            .role_mut()
            .add_managed_policy(ManagedPolicy::aws(iam::EFS_CLIENT_FULL_ACCESS));
        if config.instance.ssm_session_permissions {
            instance
                .role_mut()
                .add_managed_policy(ManagedPolicy::aws(iam::SSM_MANAGED_INSTANCE_CORE));
        }

        let mut policy = Policy::new(
            POLICY_ID,
            vec![Statement::allow(
                &[iam::CLIENT_MOUNT_ACTION],
                vec![file_system.arn()],
            )],
        );
        policy.attach_to_role(instance.role());

        debug!(
            "Planned {} subnet(s) across {} zone(s)",
            vpc.subnets().len(),
            vpc.zone_count()
        );

        Ok(Self {
            config,
            vpc,
            security_group,
            file_system,
            boot_script,
            instance,
            policy,
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn vpc(&self) -> &Vpc {
        &self.vpc
    }

    pub fn security_group(&self) -> &SecurityGroup {
        &self.security_group
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.file_system
    }

    pub fn boot_script(&self) -> &BootScript {
        &self.boot_script
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Components in the order they are synthesized
    fn constructs(&self) -> [&dyn Construct; 5] {
        [
            &self.vpc,
            &self.security_group,
            &self.file_system,
            &self.instance,
            &self.policy,
        ]
    }

    /// Synthesize the deployment template
    ///
    /// The result is checked for dangling references and cycles before it is
    /// returned.
    pub fn synth(&self) -> Result<Template, StackError> {
        let ctx = SynthContext::new(&self.config.stack_name, self.config.tags.clone());
        let mut template = Template::new();
        template.description = Some(
            self.config
                .description
                .clone()
                .unwrap_or_else(|| DESCRIPTION.to_string()),
        );

        for construct in self.constructs() {
            debug!("Synthesizing {}", construct.id());
            construct.synthesize(&ctx, &mut template)?;
        }

        if self.config.outputs {
            template.add_output(
                "FileSystemId",
                Output {
                    value: intrinsic::reference(self.file_system.id()),
                    description: Some("Identifier of the shared file system".into()),
                },
            );
            template.add_output(
                "InstanceId",
                Output {
                    value: intrinsic::reference(self.instance.id()),
                    description: Some("Identifier of the instance".into()),
                },
            );
        }

        let order = deployment_order(&template)?;
        info!(
            "Synthesized stack '{}' with {} resource(s)",
            self.config.stack_name,
            order.len()
        );
        Ok(template)
    }
}

/// SSH and NFS in from anywhere, everything out
fn security_group(config: &StackConfig) -> Result<SecurityGroup, StackError> {
    let mut sg = SecurityGroup::new(SECURITY_GROUP_ID, VPC_ID);
    sg.add_ingress_rule(Peer::AnyIpv4, Port::Tcp(SSH_PORT), "SSH");
    sg.add_ingress_rule(Peer::AnyIpv4, Port::Tcp(NFS_PORT), "NFS");

    for extra in &config.security.extra_ingress {
        let peer = match &extra.cidr {
            Some(cidr) => Peer::Cidr(cidr.parse::<Ipv4Cidr>()?),
            None => Peer::AnyIpv4,
        };
        let description = extra
            .description
            .clone()
            .unwrap_or_else(|| format!("tcp/{}", extra.port));
        sg.add_ingress_rule(peer, Port::Tcp(extra.port), description);
    }

    sg.add_egress_rule(Peer::AnyIpv4, Port::AllTraffic, "Allow all outbound traffic");
    sg.add_egress_rule(Peer::AnyIpv4, Port::Tcp(NFS_PORT), "NFS");
    Ok(sg)
}

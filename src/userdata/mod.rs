//! Bootstrap script (instance user data)
//!
//! The script is an ordered list of shell commands grouped into sections:
//!
//! 1. install the NFS/EFS client utilities and the session-manager agent
//! 2. install and start the cron service
//! 3. append the share to the mount table, wait, `mount -a`, wait
//! 4. re-export the mount through a local NFS server
//! 5. copy the credential files from the share into the local config directory
//! 6. register hourly cron jobs that copy them back to the share
//! 7. restart cron to load the new table
//!
//! The script is not idempotent: running it twice appends every table line a
//! second time.

pub mod entries;
pub mod paths;

pub use entries::{CronEntry, ExportEntry, FstabEntry, MountWait, NfsMountOptions};
pub use paths::HostPaths;

use crate::config::BootstrapConfig;
use crate::synth::intrinsic;
use crate::template::{TemplateRenderer, build_context};
use crate::{StackError, storage};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Interpreter line of the rendered script
pub const SHEBANG: &str = "#!/bin/bash";

/// Largest user-data payload EC2 accepts, before base64
pub const MAX_USER_DATA_BYTES: usize = 16 * 1024;

/// Group a bootstrap step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Packages,
    Scheduler,
    Mount,
    Export,
    Restore,
    Schedule,
    Reload,
    Custom,
}

impl Section {
    /// All sections in execution order
    pub const ALL: [Section; 8] = [
        Section::Packages,
        Section::Scheduler,
        Section::Mount,
        Section::Export,
        Section::Restore,
        Section::Schedule,
        Section::Reload,
        Section::Custom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Scheduler => "scheduler",
            Self::Mount => "mount",
            Self::Export => "export",
            Self::Restore => "restore",
            Self::Schedule => "schedule",
            Self::Reload => "reload",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Section {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|section| section.name() == s)
            .ok_or_else(|| StackError::Config(format!("unknown section '{}'", s)))
    }
}

/// One command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub section: Section,
    pub template: String,
    /// Literal shell text that never goes through the template engine
    pub raw: bool,
}

/// Values that are only known at deploy time or on the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootContext {
    pub file_system_id: String,
    pub region: String,
}

impl BootContext {
    pub fn new(file_system_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            file_system_id: file_system_id.into(),
            region: region.into(),
        }
    }

    /// Placeholders resolved by `Fn::Sub` when the stack is deployed
    pub fn deploy_time(file_system_logical_id: &str) -> Self {
        Self::new(
            intrinsic::placeholder(file_system_logical_id),
            intrinsic::placeholder(intrinsic::REGION),
        )
    }
}

/// One rendered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStep {
    pub section: Section,
    pub command: String,
}

/// A fully rendered script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedScript {
    pub shebang: String,
    pub steps: Vec<RenderedStep>,
}

impl RenderedScript {
    /// Newline-joined script text
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(
            self.shebang.len() + self.steps.iter().map(|s| s.command.len() + 1).sum::<usize>(),
        );
        text.push_str(&self.shebang);
        for step in &self.steps {
            text.push('\n');
            text.push_str(&step.command);
        }
        text
    }

    /// The command that appends the share to the mount table
    pub fn mount_line(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.section == Section::Mount && s.command.contains(" nfs4 "))
            .map(|s| s.command.as_str())
    }

    /// Steps belonging to any of `sections`, in script order
    pub fn steps_in<'a>(&'a self, sections: &'a [Section]) -> impl Iterator<Item = &'a RenderedStep> {
        self.steps
            .iter()
            .filter(move |s| sections.contains(&s.section))
    }
}

/// The bootstrap script before deploy-time values are known
#[derive(Debug, Clone)]
pub struct BootScript {
    shebang: String,
    paths: HostPaths,
    steps: Vec<Step>,
}

impl BootScript {
    /// An empty script for the given host layout
    pub fn new(paths: HostPaths) -> Self {
        Self {
            shebang: SHEBANG.to_string(),
            paths,
            steps: Vec::new(),
        }
    }

    /// Build the full bootstrap sequence from configuration
    pub fn from_config(config: &BootstrapConfig) -> Result<Self, StackError> {
        let paths = HostPaths::with_dirs(&config.etc_dir, &config.mount_point);
        let mut script = Self::new(paths);

        script.add_packages();
        script.add_scheduler();
        script.add_mount(&config.mount_options, &config.mount_wait);
        if config.nfs_reexport {
            script.add_export();
        }
        script.add_restore(&config.files);
        script.add_schedule(&config.files, &config.schedule);
        script.push(Section::Reload, "systemctl restart crond");
        for command in &config.extra_commands {
            script.push_raw(Section::Custom, command.clone());
        }

        debug!("Built bootstrap script with {} step(s)", script.steps.len());
        Ok(script)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn push(&mut self, section: Section, template: impl Into<String>) {
        self.steps.push(Step {
            section,
            template: template.into(),
            raw: false,
        });
    }

    /// Append a command that is emitted as written
    ///
    /// Shell syntax such as `${#VAR}` or `{#` is not treated as a template.
    pub fn push_raw(&mut self, section: Section, command: impl Into<String>) {
        self.steps.push(Step {
            section,
            template: command.into(),
            raw: true,
        });
    }

    fn add_packages(&mut self) {
        for command in [
            "yum update -y",
            "yum install -y nfs-utils",
            "yum install -y amazon-efs-utils",
            "yum install -y aws-ssm-agent",
            "systemctl start amazon-ssm-agent",
            "systemctl enable amazon-ssm-agent",
        ] {
            self.push(Section::Packages, command);
        }
    }

    fn add_scheduler(&mut self) {
        for command in [
            "yum install -y cronie",
            "systemctl enable crond",
            "systemctl start crond",
        ] {
            self.push(Section::Scheduler, command);
        }
    }

    fn add_mount(&mut self, options: &NfsMountOptions, wait: &MountWait) {
        let mount_point = display(&self.paths.mount_point);
        let device = format!(
            "{}:/",
            storage::dns_name("{{ file_system_id }}", "{{ region }}")
        );
        let entry = FstabEntry::nfs4(device, mount_point.clone(), options);
        let fstab = display(&self.paths.fstab());

        self.push(Section::Mount, "echo \"Mounting EFS filesystem...\"");
        self.push(Section::Mount, format!("mkdir -p {}", mount_point));
        self.push(Section::Mount, format!("echo \"{}\" | tee -a {}", entry, fstab));

        match *wait {
            MountWait::Fixed { seconds } => {
                self.push_sleep(seconds);
                self.push(Section::Mount, "echo mount -a command...");
                self.push(Section::Mount, "sudo mount -a");
                self.push_sleep(seconds);
            }
            MountWait::Poll {
                interval_secs,
                timeout_secs,
            } => {
                self.push(Section::Mount, "echo mount -a command...");
                self.push(Section::Mount, "sudo mount -a");
                self.push(
                    Section::Mount,
                    format!("echo \"Waiting for {} to be mounted...\"", mount_point),
                );
                self.push(
                    Section::Mount,
                    format!(
                        "timeout {} sh -c 'until mountpoint -q {}; do sleep {}; done' || echo \"Timed out waiting for {} to be mounted\"",
                        timeout_secs, mount_point, interval_secs, mount_point
                    ),
                );
            }
        }
        self.push(Section::Mount, "echo continuing...");
    }

    fn push_sleep(&mut self, seconds: u64) {
        if seconds > 0 {
            self.push(Section::Mount, format!("echo sleep {}", seconds));
            self.push(Section::Mount, format!("sleep {}", seconds));
        }
    }

    fn add_export(&mut self) {
        let entry = ExportEntry::open_to_all(display(&self.paths.mount_point));
        let exports = display(&self.paths.exports());

        self.push(Section::Export, format!("echo \"{}\" >> {}", entry, exports));
        self.push(Section::Export, "exportfs -a");
        self.push(Section::Export, "systemctl start nfs-server");
        self.push(Section::Export, "systemctl enable nfs-server");
    }

    fn add_restore(&mut self, files: &[String]) {
        let etc = display(&self.paths.etc_dir);

        self.push(Section::Restore, format!("mkdir -p {}", display(&self.paths.share_dir())));
        self.push(
            Section::Restore,
            format!("echo \"Copying {} files from NFS share...\"", etc),
        );
        for name in files {
            let local = display(&self.paths.local_file(name));
            self.push(
                Section::Restore,
                format!(
                    "cp {} {} 2>/dev/null || echo \"{}\"",
                    display(&self.paths.share_file(name)),
                    local,
                    missing_file_message(&local)
                ),
            );
        }
        self.push(
            Section::Restore,
            format!("echo \"Files in {} copied successfully!\"", etc),
        );
    }

    fn add_schedule(&mut self, files: &[String], schedule: &str) {
        let crontab = display(&self.paths.crontab());
        for name in files {
            let entry = CronEntry::root(
                schedule,
                format!(
                    "cp -r {} {}",
                    display(&self.paths.local_file(name)),
                    display(&self.paths.share_file(name))
                ),
            );
            self.push(Section::Schedule, format!("echo \"{}\" >> {}", entry, crontab));
        }
    }

    /// Render every step with concrete values
    pub fn render(&self, boot: &BootContext) -> Result<RenderedScript, StackError> {
        let renderer = TemplateRenderer::with_context(build_context(boot, &self.paths));
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let command = if step.raw {
                    step.template.clone()
                } else {
                    renderer.render(&step.template)?
                };
                Ok(RenderedStep {
                    section: step.section,
                    command,
                })
            })
            .collect::<Result<Vec<_>, StackError>>()?;

        Ok(RenderedScript {
            shebang: self.shebang.clone(),
            steps,
        })
    }

    /// Render the script as `Fn::Sub` text
    ///
    /// The file system id and region become `${...}` placeholders. Any other
    /// `${` in the commands is escaped so it reaches the instance verbatim.
    pub fn render_for_template(&self, file_system_logical_id: &str) -> Result<String, StackError> {
        let renderer = TemplateRenderer::with_context(build_context(
            &BootContext::deploy_time(file_system_logical_id),
            &self.paths,
        ));

        let mut text = intrinsic::escape_sub(&self.shebang);
        for step in &self.steps {
            text.push('\n');
            let escaped = intrinsic::escape_sub(&step.template);
            if step.raw {
                text.push_str(&escaped);
            } else {
                text.push_str(&renderer.render(&escaped)?);
            }
        }
        Ok(text)
    }
}

/// Message printed when a credential file cannot be restored
pub fn missing_file_message(local_path: &str) -> String {
    format!("No {} file found on NFS share or copy failed", local_path)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// How rendered user data is encoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Plain,
    Base64,
    /// Gzip, then base64; cloud-init detects the compression itself
    GzipBase64,
}

/// Encode a rendered script for the EC2 API
pub fn encode(script: &str, encoding: Encoding) -> Result<String, StackError> {
    let payload = match encoding {
        Encoding::Plain | Encoding::Base64 => script.as_bytes().to_vec(),
        Encoding::GzipBase64 => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(script.as_bytes())?;
            encoder.finish()?
        }
    };

    if payload.len() > MAX_USER_DATA_BYTES {
        return Err(StackError::Config(format!(
            "user data is {} bytes, limit is {}",
            payload.len(),
            MAX_USER_DATA_BYTES
        )));
    }

    Ok(match encoding {
        Encoding::Plain => script.to_string(),
        Encoding::Base64 | Encoding::GzipBase64 => BASE64.encode(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn default_script() -> BootScript {
        BootScript::from_config(&BootstrapConfig::default()).unwrap()
    }

    #[test]
    fn test_default_script_text() {
        let rendered = default_script()
            .render(&BootContext::new("fs-12345678", "us-east-1"))
            .unwrap();
        let text = rendered.text();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "yum update -y");
        assert_eq!(
            lines[12],
            "echo \"fs-12345678.efs.us-east-1.amazonaws.com:/ /mnt/efs nfs4 nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2,noresvport,_netdev 0 0\" | tee -a /etc/fstab"
        );
        assert_eq!(
            &lines[13..20],
            &[
                "echo sleep 30",
                "sleep 30",
                "echo mount -a command...",
                "sudo mount -a",
                "echo sleep 30",
                "sleep 30",
                "echo continuing...",
            ]
        );
        assert_eq!(lines[20], "echo \"/mnt/efs *(rw,async,no_root_squash)\" >> /etc/exports");
        assert!(lines.contains(
            &"cp /mnt/efs/etc/shadow /etc/shadow 2>/dev/null || echo \"No /etc/shadow file found on NFS share or copy failed\""
        ));
        assert!(lines.contains(&"echo \"Files in /etc copied successfully!\""));
        assert_eq!(
            lines[lines.len() - 4..],
            [
                "echo \"0 * * * * root cp -r /etc/passwd /mnt/efs/etc/passwd\" >> /etc/crontab",
                "echo \"0 * * * * root cp -r /etc/group /mnt/efs/etc/group\" >> /etc/crontab",
                "echo \"0 * * * * root cp -r /etc/shadow /mnt/efs/etc/shadow\" >> /etc/crontab",
                "systemctl restart crond",
            ]
        );
    }

    #[test]
    fn test_mount_line_contains_file_system_id() {
        let rendered = default_script()
            .render(&BootContext::new("fs-0fedcba9", "ap-southeast-2"))
            .unwrap();
        let line = rendered.mount_line().unwrap();
        assert!(line.contains("fs-0fedcba9.efs.ap-southeast-2.amazonaws.com:/ /mnt/efs nfs4"));
    }

    #[test]
    fn test_render_for_template_uses_placeholders() {
        let mut script = default_script();
        script.push(Section::Custom, "echo ${HOME} > {{ mount_point }}/home.txt");

        let text = script.render_for_template("EfsFileSystem").unwrap();
        assert!(text.contains("echo \"${EfsFileSystem}.efs.${AWS::Region}.amazonaws.com:/ /mnt/efs nfs4"));
        assert!(text.ends_with("echo ${!HOME} > /mnt/efs/home.txt"));
        assert_eq!(
            crate::synth::graph::sub_placeholders(&text),
            vec!["EfsFileSystem"]
        );
    }

    #[test]
    fn test_extra_commands_are_not_templates() {
        let config = BootstrapConfig {
            extra_commands: vec![
                "echo ${#HOME}".to_string(),
                "echo {{ not_a_variable }}".to_string(),
            ],
            ..Default::default()
        };
        let script = BootScript::from_config(&config).unwrap();

        let rendered = script.render(&BootContext::new("fs-1", "us-east-1")).unwrap();
        let custom: Vec<&str> = rendered
            .steps_in(&[Section::Custom])
            .map(|s| s.command.as_str())
            .collect();
        assert_eq!(custom, vec!["echo ${#HOME}", "echo {{ not_a_variable }}"]);

        let text = script.render_for_template("EfsFileSystem").unwrap();
        assert!(text.ends_with("echo ${!#HOME}\necho {{ not_a_variable }}"));
    }

    #[test]
    fn test_poll_wait_replaces_sleeps() {
        let config = BootstrapConfig {
            mount_wait: MountWait::Poll {
                interval_secs: 5,
                timeout_secs: 300,
            },
            ..Default::default()
        };
        let rendered = BootScript::from_config(&config)
            .unwrap()
            .render(&BootContext::new("fs-1", "us-east-1"))
            .unwrap();
        let mount: Vec<&str> = rendered
            .steps_in(&[Section::Mount])
            .map(|s| s.command.as_str())
            .collect();

        assert!(!mount.iter().any(|c| c.starts_with("sleep")));
        assert!(mount.contains(
            &"timeout 300 sh -c 'until mountpoint -q /mnt/efs; do sleep 5; done' || echo \"Timed out waiting for /mnt/efs to be mounted\""
        ));
    }

    #[test]
    fn test_without_reexport() {
        let config = BootstrapConfig {
            nfs_reexport: false,
            ..Default::default()
        };
        let script = BootScript::from_config(&config).unwrap();
        assert!(!script.steps().iter().any(|s| s.section == Section::Export));
    }

    #[test]
    fn test_section_parse() {
        assert_eq!("restore".parse::<Section>().unwrap(), Section::Restore);
        assert!("unknown".parse::<Section>().is_err());
        assert_eq!(Section::Schedule.to_string(), "schedule");
    }

    #[test]
    fn test_encode_base64() {
        let encoded = encode("#!/bin/bash\necho hi", Encoding::Base64).unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), b"#!/bin/bash\necho hi");
    }

    #[test]
    fn test_encode_gzip_base64() {
        let text = default_script()
            .render(&BootContext::new("fs-1", "us-east-1"))
            .unwrap()
            .text();
        let encoded = encode(&text, Encoding::GzipBase64).unwrap();

        let compressed = BASE64.decode(encoded).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let big = "x".repeat(MAX_USER_DATA_BYTES + 1);
        assert!(encode(&big, Encoding::Plain).is_err());
    }
}

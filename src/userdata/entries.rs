//! Lines the bootstrap script appends to system tables
//!
//! Each type renders exactly one line of its table: `/etc/fstab`,
//! `/etc/exports` or `/etc/crontab`.

use crate::StackError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// NFS client tuning for the persistent mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NfsMountOptions {
    pub nfs_version: String,
    /// Read block size in bytes
    pub rsize: u32,
    /// Write block size in bytes
    pub wsize: u32,
    /// Retry indefinitely instead of failing I/O
    pub hard: bool,
    /// Timeout in deciseconds
    pub timeo: u32,
    pub retrans: u32,
    /// Use a non-privileged source port so reconnects get a fresh one
    pub noresvport: bool,
    /// Wait for the network before mounting at boot
    pub netdev: bool,
}

impl Default for NfsMountOptions {
    fn default() -> Self {
        Self {
            nfs_version: "4.1".to_string(),
            rsize: 1_048_576,
            wsize: 1_048_576,
            hard: true,
            timeo: 600,
            retrans: 2,
            noresvport: true,
            netdev: true,
        }
    }
}

impl fmt::Display for NfsMountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nfsvers={},rsize={},wsize={}",
            self.nfs_version, self.rsize, self.wsize
        )?;
        f.write_str(if self.hard { ",hard" } else { ",soft" })?;
        write!(f, ",timeo={},retrans={}", self.timeo, self.retrans)?;
        if self.noresvport {
            f.write_str(",noresvport")?;
        }
        if self.netdev {
            f.write_str(",_netdev")?;
        }
        Ok(())
    }
}

/// One `/etc/fstab` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    /// NFSv4 mount of `device` at `mount_point`
    pub fn nfs4(
        device: impl Into<String>,
        mount_point: impl Into<String>,
        options: &NfsMountOptions,
    ) -> Self {
        Self {
            device: device.into(),
            mount_point: mount_point.into(),
            fs_type: "nfs4".to_string(),
            options: options.to_string(),
            dump: 0,
            pass: 0,
        }
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.device, self.mount_point, self.fs_type, self.options, self.dump, self.pass
        )
    }
}

/// One `/etc/exports` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub path: String,
    pub clients: String,
    pub options: Vec<String>,
}

impl ExportEntry {
    /// Read-write, async, no root squashing, to every client
    pub fn open_to_all(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            clients: "*".to_string(),
            options: vec![
                "rw".to_string(),
                "async".to_string(),
                "no_root_squash".to_string(),
            ],
        }
    }
}

impl fmt::Display for ExportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}({})", self.path, self.clients, self.options.join(","))
    }
}

/// One system-wide crontab line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub schedule: String,
    pub user: String,
    pub command: String,
}

impl CronEntry {
    pub fn root(schedule: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            schedule: schedule.into(),
            user: "root".to_string(),
            command: command.into(),
        }
    }
}

impl fmt::Display for CronEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.schedule, self.user, self.command)
    }
}

/// How the script waits for the remote mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MountWait {
    /// Sleep before and after `mount -a`
    Fixed { seconds: u64 },
    /// Mount, then poll `mountpoint -q` until it succeeds or times out
    Poll { interval_secs: u64, timeout_secs: u64 },
}

impl Default for MountWait {
    fn default() -> Self {
        Self::Fixed { seconds: 30 }
    }
}

impl MountWait {
    pub fn validate(&self) -> Result<(), StackError> {
        match *self {
            Self::Fixed { .. } => Ok(()),
            Self::Poll {
                interval_secs,
                timeout_secs,
            } => {
                if interval_secs == 0 || timeout_secs < interval_secs {
                    Err(StackError::Config(format!(
                        "poll interval {}s must be positive and not exceed timeout {}s",
                        interval_secs, timeout_secs
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mount_options() {
        assert_eq!(
            NfsMountOptions::default().to_string(),
            "nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2,noresvport,_netdev"
        );
    }

    #[test]
    fn test_soft_mount_without_flags() {
        let options = NfsMountOptions {
            hard: false,
            noresvport: false,
            netdev: false,
            ..Default::default()
        };
        assert_eq!(
            options.to_string(),
            "nfsvers=4.1,rsize=1048576,wsize=1048576,soft,timeo=600,retrans=2"
        );
    }

    #[test]
    fn test_fstab_entry() {
        let entry = FstabEntry::nfs4(
            "fs-1.efs.us-east-1.amazonaws.com:/",
            "/mnt/efs",
            &NfsMountOptions::default(),
        );
        assert!(entry.to_string().starts_with("fs-1.efs.us-east-1.amazonaws.com:/ /mnt/efs nfs4 nfsvers=4.1,"));
        assert!(entry.to_string().ends_with(",_netdev 0 0"));
    }

    #[test]
    fn test_export_and_cron_entries() {
        assert_eq!(
            ExportEntry::open_to_all("/mnt/efs").to_string(),
            "/mnt/efs *(rw,async,no_root_squash)"
        );
        assert_eq!(
            CronEntry::root("0 * * * *", "cp -r /etc/passwd /mnt/efs/etc/passwd").to_string(),
            "0 * * * * root cp -r /etc/passwd /mnt/efs/etc/passwd"
        );
    }

    #[test]
    fn test_mount_wait_serde_and_validation() {
        let wait: MountWait = serde_yaml::from_str("strategy: fixed\nseconds: 10\n").unwrap();
        assert_eq!(wait, MountWait::Fixed { seconds: 10 });
        assert!(wait.validate().is_ok());

        let bad = MountWait::Poll {
            interval_secs: 0,
            timeout_secs: 10,
        };
        assert!(bad.validate().is_err());
        let bad = MountWait::Poll {
            interval_secs: 30,
            timeout_secs: 10,
        };
        assert!(bad.validate().is_err());
    }
}

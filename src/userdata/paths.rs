//! Host paths touched by the bootstrap script
//!
//! Two roots cover everything: the local configuration directory and the
//! mount point of the shared file system.

use std::path::{Path, PathBuf};

/// Default local configuration directory
pub const ETC_DIR: &str = "/etc";

/// Default mount point of the shared file system
pub const MOUNT_POINT: &str = "/mnt/efs";

/// Directory on the share that mirrors `etc_dir`
pub const SHARE_SUBDIR: &str = "etc";

/// Paths used by the bootstrap script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Local configuration directory (default: /etc)
    pub etc_dir: PathBuf,
    /// Shared file system mount point (default: /mnt/efs)
    pub mount_point: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPaths {
    /// Create with default paths
    pub fn new() -> Self {
        Self {
            etc_dir: PathBuf::from(ETC_DIR),
            mount_point: PathBuf::from(MOUNT_POINT),
        }
    }

    /// Create with custom directories (useful for testing)
    pub fn with_dirs(etc_dir: impl AsRef<Path>, mount_point: impl AsRef<Path>) -> Self {
        Self {
            etc_dir: etc_dir.as_ref().to_path_buf(),
            mount_point: mount_point.as_ref().to_path_buf(),
        }
    }

    // ==================== System Tables ====================

    /// /etc/fstab - Persistent mount table
    pub fn fstab(&self) -> PathBuf {
        self.etc_dir.join("fstab")
    }

    /// /etc/exports - NFS export table
    pub fn exports(&self) -> PathBuf {
        self.etc_dir.join("exports")
    }

    /// /etc/crontab - System-wide scheduler table
    pub fn crontab(&self) -> PathBuf {
        self.etc_dir.join("crontab")
    }

    // ==================== Credential Files ====================

    /// /etc/<name> - Local copy of a credential file
    pub fn local_file(&self, name: &str) -> PathBuf {
        self.etc_dir.join(name)
    }

    /// /mnt/efs/etc - Directory holding the shared copies
    pub fn share_dir(&self) -> PathBuf {
        self.mount_point.join(SHARE_SUBDIR)
    }

    /// /mnt/efs/etc/<name> - Shared copy of a credential file
    pub fn share_file(&self, name: &str) -> PathBuf {
        self.share_dir().join(name)
    }
}

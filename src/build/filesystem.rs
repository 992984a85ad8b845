//! Backing image files: creation, formatting and checking.
//!
//! Only use these on image files, never on real block devices.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::SpinError;
use crate::process::Cmd;

/// Bytes in one (decimal) megabyte.
const MEGABYTE: u64 = 1000 * 1000;

/// Filesystems the builder can format and check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Ext4,
}

impl FromStr for FilesystemKind {
    type Err = SpinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ext4" => Ok(FilesystemKind::Ext4),
            other => Err(SpinError::UnknownFilesystem(other.to_string())),
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FilesystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemKind::Ext4 => "ext4",
        }
    }

    fn format_cmds(&self, image: &Path) -> Vec<Cmd> {
        match self {
            FilesystemKind::Ext4 => vec![
                Cmd::new("mkfs")
                    .args(["-t", "ext4", "-F"])
                    .arg_path(image)
                    .error_msg(format!("Failed to format {} as ext4", image.display())),
                // No periodic fsck during live boot
                Cmd::new("tune2fs").args(["-c0", "-i0"]).arg_path(image),
            ],
        }
    }

    fn check_cmds(&self, image: &Path) -> Vec<Cmd> {
        match self {
            FilesystemKind::Ext4 => vec![
                Cmd::new("e2fsck").arg("-y").arg_path(image).allow_fail(),
                Cmd::new("e2fsck").args(["-y", "-f"]).arg_path(image).allow_fail(),
            ],
        }
    }

    /// Create a filesystem on `image`.
    pub fn format(&self, image: &Path) -> Result<()> {
        tracing::info!(filename = %image.display(), filesystem = %self, "Formatting filesystem");
        for cmd in self.format_cmds(image) {
            cmd.run()?;
        }
        Ok(())
    }

    /// Check and repair `image`, forcing a full pass.
    pub fn check(&self, image: &Path) -> Result<()> {
        tracing::info!(filename = %image.display(), filesystem = %self, "Checking filesystem");
        for cmd in self.check_cmds(image) {
            let line = cmd.display();
            let result = cmd.run()?;
            // e2fsck: 0 = clean, 1 = errors corrected
            if result.code() > 1 {
                bail!(
                    "'{}' failed (exit code {}):\n{}",
                    line,
                    result.code(),
                    result.stderr_trimmed()
                );
            }
        }
        Ok(())
    }
}

/// Create a sparse file of `size_mb` decimal megabytes at `path`.
pub fn create_sparse_file(path: &Path, size_mb: u64) -> Result<()> {
    let size = size_mb
        .checked_mul(MEGABYTE)
        .with_context(|| format!("Image size of {} MB is too large", size_mb))?;

    tracing::info!(filename = %path.display(), size_mb, "Creating sparse file");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.set_len(size)
        .with_context(|| format!("Failed to size {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_sparse_file_uses_decimal_megabytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("LiveOS/rootfs.img");
        create_sparse_file(&path, 3).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 3_000_000);
        // Sparse: nowhere near 3 MB of blocks allocated
        assert!(meta.blocks() * 512 < 3_000_000);
    }

    #[test]
    fn test_sparse_file_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rootfs.img");
        create_sparse_file(&path, 2).unwrap();
        create_sparse_file(&path, 1).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 1_000_000);
    }

    #[test]
    fn test_unknown_filesystem() {
        let err = "btrfs".parse::<FilesystemKind>().unwrap_err();
        assert!(matches!(err, SpinError::UnknownFilesystem(ref fs) if fs == "btrfs"));
        assert_eq!("ext4".parse::<FilesystemKind>().unwrap(), FilesystemKind::Ext4);
    }

    #[test]
    fn test_ext4_commands() {
        let image = Path::new("/ws/LiveOS/rootfs.img");
        let format: Vec<_> = FilesystemKind::Ext4
            .format_cmds(image)
            .iter()
            .map(Cmd::display)
            .collect();
        assert_eq!(
            format,
            vec![
                "mkfs -t ext4 -F /ws/LiveOS/rootfs.img",
                "tune2fs -c0 -i0 /ws/LiveOS/rootfs.img"
            ]
        );

        let check: Vec<_> = FilesystemKind::Ext4
            .check_cmds(image)
            .iter()
            .map(Cmd::display)
            .collect();
        assert_eq!(
            check,
            vec![
                "e2fsck -y /ws/LiveOS/rootfs.img",
                "e2fsck -y -f /ws/LiveOS/rootfs.img"
            ]
        );
    }
}

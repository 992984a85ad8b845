//! Host mount backend using mount(8) and umount(8).

use anyhow::Result;
use std::path::Path;

use super::{MountFlags, MountSyscalls, UnmountMode};
use crate::process::Cmd;

/// Drives the host's mount tools. Loop devices are handled by mount(8)
/// when `loop` is passed as an option.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounts;

impl SystemMounts {
    fn mount_cmd(
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        flags: MountFlags,
        options: &[&str],
    ) -> Cmd {
        let mut cmd = Cmd::new("mount");

        if flags.bind {
            cmd = cmd.arg("--bind");
        } else if let Some(fstype) = fstype {
            cmd = cmd.args(["-t", fstype]);
        }

        let mut opts: Vec<&str> = options.to_vec();
        if flags.read_only {
            opts.push("ro");
        }
        if !opts.is_empty() {
            cmd = cmd.arg("-o").arg(opts.join(","));
        }

        cmd.arg_path(source)
            .arg_path(target)
            .error_msg(format!("Failed to mount {}", target.display()))
    }

    fn umount_cmd(target: &Path, mode: UnmountMode) -> Cmd {
        let cmd = Cmd::new("umount");
        let cmd = match mode {
            UnmountMode::Graceful => cmd,
            UnmountMode::Force => cmd.arg("-f"),
            UnmountMode::Lazy => cmd.arg("-l"),
        };
        cmd.arg_path(target)
    }
}

impl MountSyscalls for SystemMounts {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        flags: MountFlags,
        options: &[&str],
    ) -> Result<()> {
        Self::mount_cmd(source, target, fstype, flags, options).run()?;
        Ok(())
    }

    fn unmount(&self, target: &Path, mode: UnmountMode) -> Result<()> {
        Self::umount_cmd(target, mode).run()?;
        Ok(())
    }

    fn sync(&self) {
        if let Err(e) = Cmd::new("sync").run() {
            tracing::warn!("sync failed: {:#}", e);
        }
    }
}

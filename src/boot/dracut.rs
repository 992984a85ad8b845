//! Initramfs generation with dracut inside the image root.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Kernel;
use crate::process::Cmd;

/// dracut modules needed to boot from live media.
pub const LIVE_MODULES: &[&str] = &["dmsquash-live", "systemd", "pollcdrom"];

/// Drivers shipped in the live initramfs.
pub const LIVE_DRIVERS: &[&str] = &[
    "squashfs",
    "ext2",
    "vfat",
    "msdos",
    "sr_mod",
    "sd_mod",
    "ehci_hcd",
    "uhci_hcd",
    "xhci_hcd",
    "xhci_pci",
    "ohci_hcd",
    "usb_storage",
    "usbhid",
    "dm_mod",
    "ata_generic",
    "libata",
];

/// A dracut invocation for one kernel.
#[derive(Debug, Clone)]
pub struct Dracut {
    kernel_version: String,
    pub modules: Vec<String>,
    pub drivers: Vec<String>,
    /// Output path inside the root. Must be absolute.
    pub output: String,
    /// e.g. `--lz4`
    pub compression: Option<String>,
    pub timeout: Option<Duration>,
}

impl Dracut {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel_version: kernel.version.clone(),
            modules: Vec::new(),
            drivers: Vec::new(),
            output: format!("/boot/initramfs-{}.img", kernel.version),
            compression: Some("--lz4".to_string()),
            timeout: None,
        }
    }

    /// Configuration for a live ISO initramfs written to `/live.img`.
    pub fn live(kernel: &Kernel) -> Self {
        Self {
            modules: LIVE_MODULES.iter().map(|s| s.to_string()).collect(),
            drivers: LIVE_DRIVERS.iter().map(|s| s.to_string()).collect(),
            output: "/live.img".to_string(),
            ..Self::new(kernel)
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, root: &Path) -> Result<Cmd> {
        if !self.output.starts_with('/') {
            bail!("Invalid dracut output name: {}", self.output);
        }

        let mut cmd = Cmd::chroot(root, "dracut")
            .args(["--no-hostonly-cmdline", "-N", "--kver"])
            .arg(&self.kernel_version);

        if let Some(ref compression) = self.compression {
            cmd = cmd.arg(compression);
        }
        if !self.modules.is_empty() {
            cmd = cmd.arg("--add").arg(self.modules.join(" "));
        }
        if !self.drivers.is_empty() {
            cmd = cmd.arg("--add-drivers").arg(self.drivers.join(" "));
        }

        Ok(cmd
            .arg(&self.output)
            .timeout(self.timeout)
            .error_msg(format!("dracut failed for kernel {}", self.kernel_version)))
    }

    /// Run dracut in `root`, returning the generated image's host path.
    pub fn exec(&self, root: &Path) -> Result<PathBuf> {
        self.command(root)?.run_interactive()?;
        Ok(root.join(self.output.trim_start_matches('/')))
    }

    /// Run dracut and move the result to `dest` on the host.
    pub fn build_into(&self, root: &Path, dest: &Path) -> Result<()> {
        let generated = self.exec(root)?;
        fs::copy(&generated, dest).with_context(|| {
            format!("Failed to copy {} to {}", generated.display(), dest.display())
        })?;
        fs::remove_file(&generated)
            .with_context(|| format!("Failed to remove {}", generated.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Kernel {
        Kernel {
            version: "4.9.0-1.lts".into(),
            path: PathBuf::from("/ws/rootfs/boot/kernel-4.9.0-1.lts"),
            base_name: "kernel-4.9.0-1.lts".into(),
            target_path: PathBuf::new(),
            target_initrd_path: PathBuf::new(),
        }
    }

    #[test]
    fn test_live_command_line() {
        let cmd = Dracut::live(&kernel()).command(Path::new("/ws/rootfs")).unwrap();
        let line = cmd.display();
        assert!(line.starts_with(
            "chroot /ws/rootfs dracut --no-hostonly-cmdline -N --kver 4.9.0-1.lts --lz4 --add dmsquash-live systemd pollcdrom --add-drivers squashfs ext2"
        ));
        assert!(line.ends_with("ata_generic libata /live.img"));
    }

    #[test]
    fn test_default_output_is_versioned() {
        let dracut = Dracut::new(&kernel());
        assert_eq!(dracut.output, "/boot/initramfs-4.9.0-1.lts.img");
        let line = dracut.command(Path::new("/r")).unwrap().display();
        assert!(!line.contains("--add"));
    }

    #[test]
    fn test_relative_output_rejected() {
        let mut dracut = Dracut::live(&kernel());
        dracut.output = "live.img".into();
        assert!(dracut.command(Path::new("/r")).is_err());
    }
}

//! eopkg, the Solus package manager.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::PackageManager;
use crate::config::ImageConfig;
use crate::mount::{MountFlags, MountManager, ScopedMounts};
use crate::preflight::{self, HostTool};
use crate::process::Cmd;

/// Tools eopkg support shells out to.
pub const EOPKG_TOOLS: &[HostTool] = &[
    HostTool::new("eopkg", "eopkg", "Required to install packages"),
    HostTool::new("mknod", "coreutils", "Required to create device nodes"),
];

/// Host package cache, shared with the image to avoid re-downloading.
pub const PACKAGE_CACHE: &str = "/var/cache/eopkg/packages";

/// A character device created inside the root.
#[derive(Debug, Clone, Copy)]
pub struct DeviceNode {
    /// Relative to the root.
    pub path: &'static str,
    pub mode: &'static str,
    pub major: u32,
    pub minor: u32,
}

/// Nodes eopkg's post-install scripts expect.
pub const DEVICE_NODES: &[DeviceNode] = &[
    DeviceNode { path: "dev/null", mode: "00666", major: 1, minor: 3 },
    DeviceNode { path: "dev/random", mode: "00666", major: 1, minor: 8 },
    DeviceNode { path: "dev/urandom", mode: "00666", major: 1, minor: 9 },
];

impl DeviceNode {
    fn mknod_cmd(&self, root: &Path) -> Cmd {
        Cmd::new("mknod")
            .args(["-m", self.mode])
            .arg_path(&root.join(self.path))
            .arg("c")
            .arg(self.major.to_string())
            .arg(self.minor.to_string())
    }

    /// Create the node under `root` unless something already exists there.
    pub fn create(&self, root: &Path) -> Result<()> {
        let path = root.join(self.path);
        if fs::symlink_metadata(&path).is_ok() {
            tracing::debug!(node = %path.display(), "Device node already present");
            return Ok(());
        }
        self.mknod_cmd(root).run()?;
        Ok(())
    }
}

pub struct EopkgManager {
    mounts: Arc<MountManager>,
    root: Option<PathBuf>,
    root_mounts: Option<ScopedMounts>,
    timeout: Option<Duration>,
}

impl EopkgManager {
    pub fn new(mounts: Arc<MountManager>) -> Self {
        Self {
            mounts,
            root: None,
            root_mounts: None,
            timeout: None,
        }
    }

    fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .context("eopkg root has not been initialised")
    }

    fn add_repo_cmd(root: &Path, name: &str, uri: &str) -> Cmd {
        Cmd::new("eopkg")
            .arg("add-repo")
            .arg("-D")
            .arg_path(root)
            .arg(name)
            .arg(uri)
            .error_msg(format!("Failed to add repository '{}'", name))
    }

    fn install_cmd(root: &Path, ignore_safety: bool, components: bool, names: &[&str]) -> Cmd {
        let mut cmd = Cmd::new("eopkg").args(["install", "-y", "-D"]).arg_path(root);
        if ignore_safety {
            cmd = cmd.arg("--ignore-safety");
        }
        if components {
            cmd = cmd.arg("-c");
        }
        cmd.args(names)
    }

    fn configure_pending_cmd(root: &Path) -> Cmd {
        Cmd::new("eopkg")
            .args(["configure-pending", "-D"])
            .arg_path(root)
            .error_msg("Failed to configure pending packages")
    }
}

impl PackageManager for EopkgManager {
    fn name(&self) -> &'static str {
        "eopkg"
    }

    fn init(&mut self, config: &ImageConfig) -> Result<()> {
        preflight::require_tools(EOPKG_TOOLS)?;
        self.timeout = config.command_timeout();
        Ok(())
    }

    fn init_root(&mut self, root: &Path) -> Result<()> {
        for dir in ["var/cache/eopkg/packages", "proc", "dev"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }

        let host_cache = Path::new(PACKAGE_CACHE);
        fs::create_dir_all(host_cache)
            .with_context(|| format!("Failed to create {}", host_cache.display()))?;

        let mut mounts = ScopedMounts::new(self.mounts.clone());
        mounts.bind(host_cache, &root.join("var/cache/eopkg/packages"))?;
        mounts.mount(
            Path::new("proc"),
            &root.join("proc"),
            Some("proc"),
            MountFlags::default(),
            &["nosuid", "noexec", "nodev"],
        )?;
        // Hand the mounts over before anything else can fail, so cleanup owns them
        self.root_mounts = Some(mounts);
        self.root = Some(root.to_path_buf());

        for node in DEVICE_NODES {
            node.create(root)?;
        }
        Ok(())
    }

    fn add_repos(&mut self, repos: &[(&str, &str)]) -> Result<()> {
        let root = self.root()?;
        for (name, uri) in repos {
            tracing::info!(repo = name, uri, "Adding repository");
            Self::add_repo_cmd(root, name, uri).run_interactive()?;
        }
        Ok(())
    }

    fn install_groups(&mut self, ignore_safety: bool, groups: &[&str]) -> Result<()> {
        Self::install_cmd(self.root()?, ignore_safety, true, groups)
            .timeout(self.timeout)
            .error_msg(format!("Failed to install components: {}", groups.join(" ")))
            .run_interactive()?;
        Ok(())
    }

    fn install_packages(&mut self, ignore_safety: bool, packages: &[&str]) -> Result<()> {
        Self::install_cmd(self.root()?, ignore_safety, false, packages)
            .timeout(self.timeout)
            .error_msg(format!("Failed to install packages: {}", packages.join(" ")))
            .run_interactive()?;
        Ok(())
    }

    fn finalize_root(&mut self) -> Result<()> {
        Self::configure_pending_cmd(self.root()?)
            .timeout(self.timeout)
            .run_interactive()?;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        match self.root_mounts.take() {
            Some(mounts) => Ok(mounts.release()?),
            None => Ok(()),
        }
    }
}

//! LiveOS builder: a squashfs-backed ISO that boots from CD or USB.
//!
//! Workspace layout:
//!
//! ```text
//! workspace/
//! ├── rootfs/                 mount point for LiveOS/rootfs.img
//! ├── LiveOS/rootfs.img       backing storage (staging, not shipped as-is)
//! └── deploy/                 ISO contents
//!     ├── LiveOS/squashfs.img
//!     ├── <bootdir>/{kernel,initrd.img}
//!     └── isolinux/
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::filesystem::{self, FilesystemKind};
use super::iso::{self, ImageManifest, XorrisoArgs};
use super::squashfs;
use super::{BuildStage, Builder, StageTracker};
use crate::boot::{self, Capability, ConfigurationSource, Dracut, FileType, Kernel, Loader};
use crate::config::ImageConfig;
use crate::error::SpinError;
use crate::image_spec::ImageSpec;
use crate::mount::{self, MountFlags, MountManager, ScopedMounts};
use crate::preflight::{self, HostTool};
use crate::timing::Timer;

/// Tools the LiveOS builder shells out to.
pub const LIVEOS_TOOLS: &[HostTool] = &[
    HostTool::new("mkfs", "util-linux", "Required to format rootfs.img"),
    HostTool::new("tune2fs", "e2fsprogs", "Required to disable periodic checks"),
    HostTool::new("e2fsck", "e2fsprogs", "Required to check rootfs.img"),
    HostTool::new("mount", "util-linux", "Required to loop mount rootfs.img"),
    HostTool::new("umount", "util-linux", "Required to release mounts"),
    HostTool::new("chroot", "coreutils", "Required to run dracut in the image"),
    HostTool::new("mksquashfs", "squashfs-tools", "Required to create squashfs.img"),
    HostTool::new("xorriso", "libisoburn", "Required to create the ISO"),
];

/// Loader capabilities an ISO cannot do without.
pub const REQUIRED_CAPS: Capability = Capability::ISO.union(Capability::LEGACY);

/// Paths inside the LiveOS workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveOsPaths {
    pub workspace: PathBuf,
    /// Mount point of the rootfs image.
    pub rootfs_dir: PathBuf,
    /// Becomes the root of the ISO.
    pub deploy_dir: PathBuf,
    /// `LiveOS` inside the ISO.
    pub liveos_dir: PathBuf,
    /// Workspace-only staging directory packed into squashfs.img.
    pub live_staging_dir: PathBuf,
    pub rootfs_img: PathBuf,
}

impl LiveOsPaths {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            rootfs_dir: workspace.join("rootfs"),
            deploy_dir: workspace.join("deploy"),
            liveos_dir: workspace.join("deploy").join("LiveOS"),
            live_staging_dir: workspace.join("LiveOS"),
            rootfs_img: workspace.join("LiveOS").join("rootfs.img"),
        }
    }

    /// Directories created by `prepare_workspace`.
    pub fn required_dirs(&self) -> [&Path; 5] {
        [
            self.workspace.as_path(),
            self.rootfs_dir.as_path(),
            self.deploy_dir.as_path(),
            self.liveos_dir.as_path(),
            self.live_staging_dir.as_path(),
        ]
    }

    pub fn squashfs_img(&self) -> PathBuf {
        self.liveos_dir.join("squashfs.img")
    }

    pub fn manifest(&self) -> PathBuf {
        self.workspace.join("manifest.json")
    }
}

/// Verifies the unmounted rootfs image.
type StorageCheck = Box<dyn Fn(FilesystemKind, &Path) -> Result<()>>;

/// Builds ISO images that can also be written to USB.
pub struct LiveOsBuilder {
    mounts: Arc<MountManager>,
    stage: StageTracker,
    config: Option<ImageConfig>,
    paths: LiveOsPaths,
    filesystem: FilesystemKind,
    output: PathBuf,
    timeout: Option<Duration>,
    loaders: Vec<Box<dyn Loader>>,
    kernel: Option<Kernel>,
    /// Host mount table consulted before the workspace is removed.
    mount_table: PathBuf,
    check_storage: StorageCheck,
}

impl LiveOsBuilder {
    pub fn new(mounts: Arc<MountManager>) -> Self {
        Self {
            mounts,
            stage: StageTracker::default(),
            config: None,
            paths: LiveOsPaths::default(),
            filesystem: FilesystemKind::Ext4,
            output: PathBuf::new(),
            timeout: None,
            loaders: Vec::new(),
            kernel: None,
            mount_table: PathBuf::from(mount::MOUNTINFO),
            check_storage: Box::new(|filesystem: FilesystemKind, image: &Path| filesystem.check(image)),
        }
    }

    pub fn paths(&self) -> &LiveOsPaths {
        &self.paths
    }

    fn config(&self) -> Result<&ImageConfig> {
        self.config.as_ref().context("LiveOS builder has not been initialised")
    }

    /// Adopt the configuration and an initialised loader set.
    fn configure(&mut self, spec: &ImageSpec, loaders: Vec<Box<dyn Loader>>) -> Result<()> {
        self.stage.check(BuildStage::Initialized)?;

        if !boot::have_loader_with_mask(&loaders, REQUIRED_CAPS) {
            return Err(SpinError::NoUsableBootloader(REQUIRED_CAPS).into());
        }

        let config = &spec.config;
        self.filesystem = config.liveos.rootfs_format.parse()?;
        self.paths = LiveOsPaths::new(&config.workspace_dir()?);
        self.output = config.output_path()?;
        self.timeout = config.command_timeout();
        self.loaders = loaders;
        self.config = Some(config.clone());

        self.stage.enter(BuildStage::Initialized);
        Ok(())
    }

    fn primary_loader(&self) -> Result<&dyn Loader> {
        boot::get_loader_with_mask(&self.loaders, REQUIRED_CAPS)
            .ok_or_else(|| SpinError::NoUsableBootloader(REQUIRED_CAPS).into())
    }

    fn boot_dir(&self) -> Result<PathBuf> {
        Ok(self.paths.deploy_dir.join(&self.config()?.liveos.bootdir))
    }

    fn install_bootloader(&self) -> Result<()> {
        let loader = self.primary_loader()?;
        tracing::info!(loader = loader.name(), mode = %REQUIRED_CAPS, "Installing bootloader");
        loader.install(REQUIRED_CAPS, self)
    }

    fn spin_iso(&self) -> Result<()> {
        let loader = self.primary_loader()?;
        let args = XorrisoArgs {
            volume_id: self.volume_label().to_string(),
            boot_binary: loader.special_file(FileType::BootBinary),
            boot_catalog: loader.special_file(FileType::BootCatalog),
            mbr: loader.special_file(FileType::BootMbr),
            output: self.output.clone(),
        };
        iso::spin_iso(&self.paths.deploy_dir, &args, self.timeout)
    }

    fn write_artifacts(&self) -> Result<ImageManifest> {
        let config = self.config()?;
        let sha256 = iso::write_checksum(&self.output)?;
        let size_bytes = fs::metadata(&self.output)
            .with_context(|| format!("Failed to stat {}", self.output.display()))?
            .len();

        let manifest = ImageManifest {
            label: config.liveos.label.clone(),
            title: config.branding.title.clone(),
            kernel_version: self
                .kernel
                .as_ref()
                .map(|k| k.version.clone())
                .unwrap_or_default(),
            compression: config.compression().as_str().to_string(),
            output: self.output.clone(),
            sha256,
            size_bytes,
            contents: iso::list_tree(&self.paths.deploy_dir)?,
        };
        iso::write_manifest(&self.paths.manifest(), &manifest)?;
        Ok(manifest)
    }
}

impl Builder for LiveOsBuilder {
    fn init(&mut self, spec: &ImageSpec) -> Result<()> {
        self.stage.check(BuildStage::Initialized)?;

        // Fail before anything touches the disk
        preflight::require_tools(LIVEOS_TOOLS)?;

        let loaders = boot::init_loaders(&spec.config, &spec.config.liveos.bootloaders)?;
        self.configure(spec, loaders)
    }

    fn prepare_workspace(&mut self) -> Result<()> {
        self.stage.check(BuildStage::WorkspaceReady)?;

        let workspace = &self.paths.workspace;
        if workspace.is_dir() {
            // remove_dir_all would descend into mounts left by an interrupted run
            let stale = mount::mounts_below_in(workspace, &self.mount_table)?;
            for target in &stale {
                tracing::warn!(target = %target.display(), "Stale mount in workspace");
            }
            if let Some(deepest) = stale.into_iter().next() {
                return Err(SpinError::StillMounted {
                    dir: workspace.clone(),
                    mount: deepest,
                }
                .into());
            }

            tracing::info!(workspace = %workspace.display(), "Removing previous workspace");
            fs::remove_dir_all(workspace)
                .with_context(|| format!("Failed to remove {}", workspace.display()))?;
        }

        for dir in self.paths.required_dirs() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        self.stage.enter(BuildStage::WorkspaceReady);
        Ok(())
    }

    fn create_storage(&mut self) -> Result<()> {
        self.stage.check(BuildStage::StorageCreated)?;

        let size = self.config()?.liveos.rootfs_size;
        filesystem::create_sparse_file(&self.paths.rootfs_img, size)?;
        self.filesystem.format(&self.paths.rootfs_img)?;

        self.stage.enter(BuildStage::StorageCreated);
        Ok(())
    }

    fn mount_storage(&mut self) -> Result<()> {
        self.stage.check(BuildStage::StorageMounted)?;

        self.mounts.mount(
            &self.paths.rootfs_img,
            &self.paths.rootfs_dir,
            Some(self.filesystem.as_str()),
            MountFlags::default(),
            &["loop"],
        )?;

        self.stage.enter(BuildStage::StorageMounted);
        Ok(())
    }

    fn root_dir(&self) -> &Path {
        &self.paths.rootfs_dir
    }

    fn collect_assets(&mut self) -> Result<()> {
        self.stage.check(BuildStage::AssetsCollected)?;
        let timer = Timer::start("Collect boot assets");

        let bootdir_name = self.config()?.liveos.bootdir.clone();
        let kernel = Kernel::from_root(&self.paths.rootfs_dir)?.with_targets(&bootdir_name);

        let boot_dir = self.boot_dir()?;
        fs::create_dir_all(&boot_dir)
            .with_context(|| format!("Failed to create {}", boot_dir.display()))?;

        let kernel_target = boot_dir.join("kernel");
        fs::copy(&kernel.path, &kernel_target).with_context(|| {
            format!("Failed to copy kernel {} to {}", kernel.path.display(), kernel_target.display())
        })?;

        // dracut needs the API filesystems inside the chroot
        let mut chroot_mounts = ScopedMounts::new(self.mounts.clone());
        chroot_mounts.mount_api_filesystems(&self.paths.rootfs_dir)?;
        Dracut::live(&kernel)
            .timeout(self.timeout)
            .build_into(&self.paths.rootfs_dir, &boot_dir.join("initrd.img"))?;
        chroot_mounts.release()?;

        self.kernel = Some(kernel);
        timer.finish();
        self.stage.enter(BuildStage::AssetsCollected);
        Ok(())
    }

    fn unmount_storage(&mut self) -> Result<()> {
        self.stage.check(BuildStage::StorageUnmounted)?;

        self.mounts.unmount(&self.paths.rootfs_dir)?;
        // Last chance to repair the image before it is packed
        (self.check_storage)(self.filesystem, &self.paths.rootfs_img)?;

        self.stage.enter(BuildStage::StorageUnmounted);
        Ok(())
    }

    fn finalize_image(&mut self) -> Result<()> {
        self.stage.check(BuildStage::Finalized)?;

        let compression = self.config()?.compression();
        let timer = Timer::start("Create squashfs");
        squashfs::create_squashfs(
            &self.paths.live_staging_dir,
            &self.paths.squashfs_img(),
            compression,
            self.timeout,
        )?;
        timer.finish();

        self.install_bootloader()?;

        let timer = Timer::start("Create ISO");
        self.spin_iso()?;
        timer.finish();

        let manifest = self.write_artifacts()?;
        iso::print_iso_summary(&manifest);

        self.stage.enter(BuildStage::Finalized);
        Ok(())
    }

    fn cleanup(&mut self) {
        tracing::info!("Cleaning up");
        self.mounts.unmount_all();
    }

    fn stage(&self) -> BuildStage {
        self.stage.current()
    }
}

impl ConfigurationSource for LiveOsBuilder {
    fn join_root_path(&self, parts: &[&str]) -> PathBuf {
        parts
            .iter()
            .fold(self.paths.rootfs_dir.clone(), |path, part| path.join(part))
    }

    fn join_deploy_path(&self, parts: &[&str]) -> PathBuf {
        parts
            .iter()
            .fold(self.paths.deploy_dir.clone(), |path, part| path.join(part))
    }

    /// ISO loaders find the root by volume label.
    fn root_device(&self) -> String {
        self.volume_label().to_string()
    }

    fn boot_device(&self) -> String {
        String::new()
    }

    fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    fn volume_label(&self) -> &str {
        self.config
            .as_ref()
            .map(|c| c.liveos.label.as_str())
            .unwrap_or(crate::config::DEFAULT_LABEL)
    }

    fn title(&self) -> &str {
        self.config
            .as_ref()
            .map(|c| c.branding.title.as_str())
            .unwrap_or_default()
    }
}

//! Bootloader registry and boot asset helpers.
//!
//! Builders never talk to a bootloader directly. They initialise the
//! configured loaders once, then ask for the first one whose [`Capability`]
//! set covers what the image type needs (`ISO | LEGACY` for a LiveOS).

pub mod dracut;
pub mod kernel;
pub mod syslinux;

pub use dracut::Dracut;
pub use kernel::Kernel;
pub use syslinux::SyslinuxLoader;

use anyhow::{Context, Result};
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::path::PathBuf;

use crate::config::{ImageConfig, LoaderType};

/// Install modes a bootloader supports, as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capability(u8);

impl Capability {
    pub const NONE: Capability = Capability(0);
    pub const UEFI: Capability = Capability(1);
    /// MBR / BIOS booting.
    pub const LEGACY: Capability = Capability(1 << 1);
    pub const ISO: Capability = Capability(1 << 2);
    /// Installation to a block device.
    pub const RAW: Capability = Capability(1 << 3);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Capability) -> Capability {
        Capability(self.0 | other.0)
    }

    /// True when every bit of `mask` is set in `self`.
    pub fn contains(self, mask: Capability) -> bool {
        self.0 & mask.0 == mask.0
    }
}

impl BitOr for Capability {
    type Output = Capability;

    fn bitor(self, rhs: Capability) -> Capability {
        self.union(rhs)
    }
}

impl BitAnd for Capability {
    type Output = Capability;

    fn bitand(self, rhs: Capability) -> Capability {
        Capability(self.0 & rhs.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Capability, &str); 4] = [
            (Capability::UEFI, "UEFI"),
            (Capability::LEGACY, "Legacy"),
            (Capability::ISO, "ISO"),
            (Capability::RAW, "Raw"),
        ];

        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self)
    }
}

/// Well-known files a loader exposes to the image assembly step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// El Torito boot catalog. Created by xorriso, not the loader.
    BootCatalog,
    /// El Torito boot binary, e.g. `isolinux.bin`.
    BootBinary,
    /// Hybrid MBR image for USB booting.
    BootMbr,
}

/// What a builder tells a loader during installation.
pub trait ConfigurationSource {
    /// Path inside the image root filesystem.
    fn join_root_path(&self, parts: &[&str]) -> PathBuf;

    /// Path inside the deployment tree (the ISO contents).
    fn join_deploy_path(&self, parts: &[&str]) -> PathBuf;

    /// Device or label used for `/`. For ISO images this is the volume label.
    fn root_device(&self) -> String;

    /// Device used for `/boot`; empty unless installing in `RAW` mode.
    fn boot_device(&self) -> String;

    fn kernel(&self) -> Option<&Kernel>;

    fn volume_label(&self) -> &str;

    /// Branding title for boot menus.
    fn title(&self) -> &str;
}

/// A bootloader implementation.
pub trait Loader {
    fn name(&self) -> &'static str;

    /// Verify the host can support this loader (tools, asset files).
    fn init(&mut self, config: &ImageConfig) -> Result<()>;

    fn capabilities(&self) -> Capability;

    /// Install the loader into the deployment tree for the given mode.
    fn install(&self, mode: Capability, source: &dyn ConfigurationSource) -> Result<()>;

    /// Location of a special file. Paths relative to the deploy tree
    /// unless the file lives on the host.
    fn special_file(&self, file: FileType) -> Option<PathBuf>;
}

/// Construct an uninitialised loader of the given type.
pub fn new_loader(kind: LoaderType) -> Box<dyn Loader> {
    match kind {
        LoaderType::Syslinux => Box::new(SyslinuxLoader::new()),
    }
}

/// Construct and initialise every configured loader, in order.
///
/// Any initialisation failure aborts the whole set.
pub fn init_loaders(config: &ImageConfig, kinds: &[LoaderType]) -> Result<Vec<Box<dyn Loader>>> {
    let mut loaders = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let mut loader = new_loader(*kind);
        loader
            .init(config)
            .with_context(|| format!("Failed to initialise {} bootloader", loader.name()))?;
        tracing::debug!(
            loader = loader.name(),
            capabilities = %loader.capabilities(),
            "Initialised bootloader"
        );
        loaders.push(loader);
    }
    Ok(loaders)
}

/// First loader, in configured order, supporting every bit of `mask`.
pub fn get_loader_with_mask(loaders: &[Box<dyn Loader>], mask: Capability) -> Option<&dyn Loader> {
    loaders
        .iter()
        .find(|loader| loader.capabilities().contains(mask))
        .map(|loader| loader.as_ref())
}

pub fn have_loader_with_mask(loaders: &[Box<dyn Loader>], mask: Capability) -> bool {
    get_loader_with_mask(loaders, mask).is_some()
}

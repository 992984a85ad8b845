//! `.spin` file configuration.
//!
//! A `.spin` file is TOML:
//!
//! ```toml
//! [image]
//! type = "liveos"
//! packages = "packages"
//!
//! [branding]
//! title = "Solus"
//!
//! [liveos]
//! compression = "xz"
//! filename = "solus.iso"
//! label = "SolusLiveBudgie"
//! ```
//!
//! Unset options fall back to the defaults below. The `IMGSPIN_WORKSPACE`
//! environment variable overrides `build.workspace`.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SpinError, SpinResult};

/// Default size of the rootfs image, in (decimal) megabytes.
pub const DEFAULT_ROOTFS_SIZE: u64 = 4000;
pub const DEFAULT_ROOTFS_FORMAT: &str = "ext4";
pub const DEFAULT_BOOT_DIR: &str = "boot";
pub const DEFAULT_LABEL: &str = "LiveOS";
pub const DEFAULT_WORKSPACE: &str = "workspace";

/// Environment override for the workspace directory.
pub const WORKSPACE_ENV: &str = "IMGSPIN_WORKSPACE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ImageType {
    /// ISO image that may also be written to USB.
    #[serde(rename = "liveos")]
    LiveOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Xz,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Xz => "xz",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    /// syslinux + isolinux
    Syslinux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    #[default]
    Eopkg,
}

/// `[image]`
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSection {
    /// Packages file, relative to the `.spin` file.
    pub packages: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    #[serde(default)]
    pub package_manager: PackageManagerKind,
}

/// `[branding]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrandingSection {
    /// OS title shown by bootloaders.
    #[serde(default)]
    pub title: String,
}

/// `[liveos]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveOsSection {
    pub compression: Option<Compression>,
    /// Output ISO path, relative to the current directory.
    pub filename: String,
    pub rootfs_size: u64,
    pub rootfs_format: String,
    pub label: String,
    /// Boot assets directory inside the ISO. Never absolute.
    pub bootdir: String,
    /// Bootloaders in order of preference.
    pub bootloaders: Vec<LoaderType>,
}

impl Default for LiveOsSection {
    fn default() -> Self {
        Self {
            compression: None,
            filename: String::new(),
            rootfs_size: DEFAULT_ROOTFS_SIZE,
            rootfs_format: DEFAULT_ROOTFS_FORMAT.to_string(),
            label: String::new(),
            bootdir: DEFAULT_BOOT_DIR.to_string(),
            bootloaders: vec![LoaderType::Syslinux],
        }
    }
}

/// `[build]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub workspace: PathBuf,
    /// Upper bound in seconds for long-running external tools.
    pub command_timeout: Option<u64>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from(DEFAULT_WORKSPACE),
            command_timeout: None,
        }
    }
}

/// Validated image configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub image: ImageSection,
    #[serde(default)]
    pub branding: BrandingSection,
    #[serde(default)]
    pub liveos: LiveOsSection,
    #[serde(default)]
    pub build: BuildSection,
}

impl ImageConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> SpinResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> SpinResult<Self> {
        let mut config: ImageConfig =
            toml::from_str(content).map_err(|e| SpinError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Normalize and validate in place.
    fn validate(&mut self) -> SpinResult<()> {
        self.image.packages = self.image.packages.trim().to_string();
        if self.image.packages.is_empty() {
            return Err(invalid("image.packages cannot be empty"));
        }

        match self.image.image_type {
            ImageType::LiveOs => self.validate_liveos(),
        }
    }

    fn validate_liveos(&mut self) -> SpinResult<()> {
        let live = &mut self.liveos;

        if live.compression.is_none() {
            return Err(invalid("liveos.compression must be one of: gzip, xz"));
        }

        live.filename = live.filename.trim().to_string();
        if live.filename.is_empty() {
            return Err(invalid("liveos.filename cannot be empty"));
        }

        live.bootdir = live.bootdir.trim().to_string();
        if live.bootdir.starts_with('/') {
            return Err(invalid("liveos.bootdir must be a relative path"));
        }
        if live.bootdir.is_empty() {
            live.bootdir = DEFAULT_BOOT_DIR.to_string();
        }

        live.label = live.label.trim().to_string();
        if live.label.contains(' ') || live.label.contains('/') {
            return Err(invalid("liveos.label cannot contain spaces or '/'"));
        }
        if live.label.is_empty() {
            live.label = DEFAULT_LABEL.to_string();
        }

        if live.rootfs_size == 0 {
            return Err(invalid("liveos.rootfs_size must be greater than zero"));
        }

        live.rootfs_format = live.rootfs_format.trim().to_string();
        if live.bootloaders.is_empty() {
            return Err(invalid("liveos.bootloaders cannot be empty"));
        }

        Ok(())
    }

    pub fn compression(&self) -> Compression {
        self.liveos.compression.unwrap_or(Compression::Gzip)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.build.command_timeout.map(Duration::from_secs)
    }

    /// Absolute workspace directory, honouring [`WORKSPACE_ENV`].
    pub fn workspace_dir(&self) -> SpinResult<PathBuf> {
        let dir = match env::var_os(WORKSPACE_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.build.workspace.clone(),
        };
        Ok(std::path::absolute(dir)?)
    }

    /// Absolute path of the ISO to produce.
    pub fn output_path(&self) -> SpinResult<PathBuf> {
        Ok(std::path::absolute(&self.liveos.filename)?)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  image.type:          {:?}", self.image.image_type);
        println!("  image.packages:      {}", self.image.packages);
        println!("  branding.title:      {}", self.branding.title);
        println!("  liveos.compression:  {}", self.compression().as_str());
        println!("  liveos.filename:     {}", self.liveos.filename);
        println!("  liveos.label:        {}", self.liveos.label);
        println!("  liveos.rootfs_size:  {} MB", self.liveos.rootfs_size);
        println!("  liveos.rootfs_format: {}", self.liveos.rootfs_format);
        println!("  liveos.bootdir:      {}", self.liveos.bootdir);
        println!("  liveos.bootloaders:  {:?}", self.liveos.bootloaders);
    }
}

fn invalid(msg: &str) -> SpinError {
    SpinError::InvalidConfig(msg.to_string())
}

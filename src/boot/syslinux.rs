//! syslinux/isolinux for legacy-booting ISO images.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Capability, ConfigurationSource, FileType, Loader};
use crate::config::ImageConfig;

/// Host directories searched for syslinux assets, in order.
pub const DEFAULT_SEARCH_DIRS: &[&str] = &[
    "/usr/share/syslinux",
    "/usr/lib/syslinux/bios",
    "/usr/lib/syslinux/mbr",
    "/usr/lib/syslinux/modules/bios",
    "/usr/lib/ISOLINUX",
    "/usr/lib/syslinux",
];

/// Files copied into the ISO's isolinux directory.
pub const ISO_ASSETS: &[&str] = &[
    "isolinux.bin",
    "ldlinux.c32",
    "libcom32.c32",
    "libutil.c32",
    "vesamenu.c32",
];

/// Hybrid MBR image, passed to xorriso straight from the host.
pub const MBR_ASSET: &str = "isohdpfx.bin";

/// Directory inside the deploy tree holding the loader.
const ISOLINUX_DIR: &str = "isolinux";

pub struct SyslinuxLoader {
    search_dirs: Vec<PathBuf>,
    assets: BTreeMap<&'static str, PathBuf>,
}

impl Default for SyslinuxLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SyslinuxLoader {
    pub fn new() -> Self {
        Self::with_search_dirs(DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect())
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            assets: BTreeMap::new(),
        }
    }

    /// First search directory containing `name`.
    pub fn find_asset(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Every required asset missing from the search directories.
    pub fn missing_assets(&self) -> Vec<&'static str> {
        ISO_ASSETS
            .iter()
            .chain(std::iter::once(&MBR_ASSET))
            .filter(|name| self.find_asset(name).is_none())
            .copied()
            .collect()
    }

    fn install_iso(&self, source: &dyn ConfigurationSource) -> Result<()> {
        let Some(kernel) = source.kernel() else {
            bail!("Cannot install syslinux before a kernel has been collected");
        };

        let target_dir = source.join_deploy_path(&[ISOLINUX_DIR]);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;

        for name in ISO_ASSETS {
            let Some(src) = self.assets.get(name) else {
                bail!("syslinux asset {} was not resolved during init", name);
            };
            let dest = target_dir.join(name);
            fs::copy(src, &dest).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), dest.display())
            })?;
        }

        let config = render_config(
            source.title(),
            &kernel.target_path,
            &kernel.target_initrd_path,
            &source.root_device(),
        );
        let cfg_path = target_dir.join("isolinux.cfg");
        fs::write(&cfg_path, config)
            .with_context(|| format!("Failed to write {}", cfg_path.display()))?;

        tracing::info!(loader = self.name(), path = %target_dir.display(), "Installed bootloader");
        Ok(())
    }
}

impl Loader for SyslinuxLoader {
    fn name(&self) -> &'static str {
        "syslinux"
    }

    fn init(&mut self, _config: &ImageConfig) -> Result<()> {
        let missing = self.missing_assets();
        if !missing.is_empty() {
            bail!(
                "Missing syslinux assets: {} (searched {})",
                missing.join(", "),
                self.search_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for name in ISO_ASSETS.iter().chain(std::iter::once(&MBR_ASSET)) {
            if let Some(path) = self.find_asset(name) {
                self.assets.insert(*name, path);
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> Capability {
        Capability::ISO | Capability::LEGACY
    }

    fn install(&self, mode: Capability, source: &dyn ConfigurationSource) -> Result<()> {
        if !self.capabilities().contains(mode) {
            bail!("syslinux cannot install in mode {}", mode);
        }
        if mode.contains(Capability::ISO) {
            return self.install_iso(source);
        }
        bail!("syslinux only supports ISO installation, not {}", mode)
    }

    fn special_file(&self, file: FileType) -> Option<PathBuf> {
        match file {
            FileType::BootBinary => Some(Path::new(ISOLINUX_DIR).join("isolinux.bin")),
            FileType::BootCatalog => Some(Path::new(ISOLINUX_DIR).join("boot.cat")),
            FileType::BootMbr => self.assets.get(MBR_ASSET).cloned(),
        }
    }
}

/// Render `isolinux.cfg`.
pub fn render_config(title: &str, kernel: &Path, initrd: &Path, label: &str) -> String {
    let title = if title.is_empty() { label } else { title };
    format!(
        "UI vesamenu.c32\n\
         TIMEOUT 100\n\
         MENU TITLE {title}\n\
         DEFAULT live\n\
         \n\
         LABEL live\n\
         \x20 MENU LABEL Start {title}\n\
         \x20 KERNEL /{kernel}\n\
         \x20 APPEND initrd=/{initrd} root=live:CDLABEL={label} rd.live.image ro quiet splash\n",
        title = title,
        kernel = kernel.display(),
        initrd = initrd.display(),
        label = label,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::Kernel;
    use regex::Regex;
    use tempfile::TempDir;

    fn asset_dir(skip: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in ISO_ASSETS.iter().chain(std::iter::once(&MBR_ASSET)) {
            if Some(*name) != skip {
                fs::write(dir.path().join(name), name.as_bytes()).unwrap();
            }
        }
        dir
    }

    fn config() -> ImageConfig {
        ImageConfig::from_toml_str(
            "[image]\ntype = \"liveos\"\npackages = \"p\"\n[liveos]\ncompression = \"gzip\"\nfilename = \"x.iso\"\n",
        )
        .unwrap()
    }

    struct Source {
        deploy: PathBuf,
        kernel: Option<Kernel>,
    }

    impl ConfigurationSource for Source {
        fn join_root_path(&self, parts: &[&str]) -> PathBuf {
            parts.iter().fold(PathBuf::from("/root"), |p, s| p.join(s))
        }

        fn join_deploy_path(&self, parts: &[&str]) -> PathBuf {
            parts.iter().fold(self.deploy.clone(), |p, s| p.join(s))
        }

        fn root_device(&self) -> String {
            "SolusLive".to_string()
        }

        fn boot_device(&self) -> String {
            String::new()
        }

        fn kernel(&self) -> Option<&Kernel> {
            self.kernel.as_ref()
        }

        fn volume_label(&self) -> &str {
            "SolusLive"
        }

        fn title(&self) -> &str {
            "Solus"
        }
    }

    fn kernel() -> Kernel {
        Kernel {
            version: "4.9".into(),
            path: PathBuf::from("/r/boot/kernel-4.9"),
            base_name: "kernel-4.9".into(),
            target_path: PathBuf::new(),
            target_initrd_path: PathBuf::new(),
        }
        .with_targets("boot")
    }

    #[test]
    fn test_init_fails_on_missing_asset() {
        let dir = asset_dir(Some("ldlinux.c32"));
        let mut loader = SyslinuxLoader::with_search_dirs(vec![dir.path().to_path_buf()]);
        let err = loader.init(&config()).unwrap_err();
        assert!(err.to_string().contains("ldlinux.c32"));
    }

    #[test]
    fn test_special_files() {
        let dir = asset_dir(None);
        let mut loader = SyslinuxLoader::with_search_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(loader.special_file(FileType::BootMbr), None);

        loader.init(&config()).unwrap();
        assert_eq!(
            loader.special_file(FileType::BootBinary),
            Some(PathBuf::from("isolinux/isolinux.bin"))
        );
        assert_eq!(
            loader.special_file(FileType::BootCatalog),
            Some(PathBuf::from("isolinux/boot.cat"))
        );
        assert_eq!(
            loader.special_file(FileType::BootMbr),
            Some(dir.path().join(MBR_ASSET))
        );
    }

    #[test]
    fn test_install_copies_assets_and_renders_config() {
        let assets = asset_dir(None);
        let deploy = TempDir::new().unwrap();
        let mut loader = SyslinuxLoader::with_search_dirs(vec![assets.path().to_path_buf()]);
        loader.init(&config()).unwrap();

        let source = Source {
            deploy: deploy.path().to_path_buf(),
            kernel: Some(kernel()),
        };
        loader
            .install(Capability::ISO | Capability::LEGACY, &source)
            .unwrap();

        let isolinux = deploy.path().join("isolinux");
        for name in ISO_ASSETS {
            assert!(isolinux.join(name).is_file(), "{name} not installed");
        }
        assert!(!isolinux.join(MBR_ASSET).exists());

        let cfg = fs::read_to_string(isolinux.join("isolinux.cfg")).unwrap();
        let append = Regex::new(r"APPEND initrd=/boot/initrd\.img root=live:CDLABEL=SolusLive\b").unwrap();
        assert!(append.is_match(&cfg), "{cfg}");
        assert!(cfg.contains("KERNEL /boot/kernel"));
        assert!(cfg.contains("MENU TITLE Solus"));
    }

    #[test]
    fn test_install_requires_kernel() {
        let assets = asset_dir(None);
        let deploy = TempDir::new().unwrap();
        let mut loader = SyslinuxLoader::with_search_dirs(vec![assets.path().to_path_buf()]);
        loader.init(&config()).unwrap();

        let source = Source {
            deploy: deploy.path().to_path_buf(),
            kernel: None,
        };
        assert!(loader.install(Capability::ISO, &source).is_err());
    }

    #[test]
    fn test_install_rejects_uefi() {
        let loader = SyslinuxLoader::with_search_dirs(Vec::new());
        let source = Source {
            deploy: PathBuf::from("/nonexistent"),
            kernel: None,
        };
        let err = loader.install(Capability::UEFI, &source).unwrap_err();
        assert!(err.to_string().contains("UEFI"));
    }

    #[test]
    fn test_render_config_falls_back_to_label() {
        let cfg = render_config("", Path::new("boot/kernel"), Path::new("boot/initrd.img"), "LiveOS");
        assert!(cfg.contains("MENU TITLE LiveOS"));
    }
}

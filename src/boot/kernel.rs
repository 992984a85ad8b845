//! Kernel discovery inside an installed root.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SpinError;

/// Upper bound on symlink hops, matching the kernel's own ELOOP limit.
const MAX_SYMLINK_HOPS: usize = 40;

/// Where distributions leave a `vmlinuz` link, relative to the root.
const CANDIDATES: &[&str] = &["vmlinuz", "boot/vmlinuz"];

/// A kernel found in the image root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    /// Version suffix of the kernel file, e.g. `4.8.10-1.lts`.
    pub version: String,
    /// Resolved kernel file on the host.
    pub path: PathBuf,
    pub base_name: String,
    /// Kernel path inside the deploy tree, e.g. `boot/kernel`.
    pub target_path: PathBuf,
    pub target_initrd_path: PathBuf,
}

impl Kernel {
    /// Find the default kernel in `root`.
    ///
    /// Candidates that are missing or carry no version are skipped.
    pub fn from_root(root: &Path) -> Result<Kernel> {
        for candidate in CANDIDATES {
            let Some(path) = resolve_in_root(root, &root.join(candidate)) else {
                continue;
            };

            let base_name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            let Some((_, version)) = base_name.split_once('-') else {
                tracing::warn!(kernel = %base_name, "Don't know how to handle kernel version");
                continue;
            };

            tracing::info!(kernel = %base_name, version, "Discovered usable kernel");
            return Ok(Kernel {
                version: version.to_string(),
                path,
                base_name: base_name.clone(),
                target_path: PathBuf::new(),
                target_initrd_path: PathBuf::new(),
            });
        }

        Err(SpinError::NoKernelFound(root.to_path_buf()).into())
    }

    /// Record where the kernel and initrd live under `bootdir` in the image.
    pub fn with_targets(mut self, bootdir: &str) -> Kernel {
        self.target_path = Path::new(bootdir).join("kernel");
        self.target_initrd_path = Path::new(bootdir).join("initrd.img");
        self
    }
}

/// Follow symlinks starting at `path`, treating absolute link targets as
/// relative to `root`. Returns the final regular file.
fn resolve_in_root(root: &Path, path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();

    for _ in 0..MAX_SYMLINK_HOPS {
        let meta = fs::symlink_metadata(&current).ok()?;
        if !meta.file_type().is_symlink() {
            return meta.is_file().then_some(current);
        }

        let link = fs::read_link(&current).ok()?;
        current = match link.strip_prefix("/") {
            Ok(rooted) => root.join(rooted),
            Err(_) => current.parent()?.join(link),
        };
    }

    tracing::warn!(path = %path.display(), "Too many levels of symbolic links");
    None
}

//! ISO assembly with xorriso, plus the checksum and manifest written beside it.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::process::Cmd;

/// Suffix of the checksum file written next to the ISO.
pub const CHECKSUM_SUFFIX: &str = ".sha256";

/// Everything xorriso needs to know about one image.
#[derive(Debug, Clone, Default)]
pub struct XorrisoArgs {
    pub volume_id: String,
    /// El Torito boot binary, relative to the deploy tree.
    pub boot_binary: Option<PathBuf>,
    /// El Torito catalog, relative to the deploy tree.
    pub boot_catalog: Option<PathBuf>,
    /// Hybrid MBR image on the host.
    pub mbr: Option<PathBuf>,
    /// Absolute output path.
    pub output: PathBuf,
}

impl XorrisoArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            // Don't read startup files that could skew generation
            "-no_rc",
            "-as",
            "mkisofs",
            "-iso-level",
            "3",
            "-full-iso9660-filenames",
            "-volid",
            self.volume_id.as_str(),
            "-appid",
            self.volume_id.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let (Some(bin), Some(cat)) = (&self.boot_binary, &self.boot_catalog) {
            args.extend([
                "-eltorito-boot".to_string(),
                bin.display().to_string(),
                "-eltorito-catalog".to_string(),
                cat.display().to_string(),
                "-no-emul-boot".to_string(),
                "-boot-load-size".to_string(),
                "4".to_string(),
                "-boot-info-table".to_string(),
            ]);
        }

        // USB booting
        if let Some(mbr) = &self.mbr {
            args.push("-isohybrid-mbr".to_string());
            args.push(mbr.display().to_string());
        }

        args.push("-output".to_string());
        args.push(self.output.display().to_string());
        args.push(".".to_string());
        args
    }
}

/// Build the ISO from the contents of `deploy_dir`.
pub fn spin_iso(deploy_dir: &Path, args: &XorrisoArgs, timeout: Option<Duration>) -> Result<()> {
    tracing::info!(output = %args.output.display(), volume = %args.volume_id, "Creating ISO");

    if let Some(parent) = args.output.parent() {
        fs::create_dir_all(parent)?;
    }

    Cmd::new("xorriso")
        .args(args.to_args())
        .dir(deploy_dir)
        .timeout(timeout)
        .error_msg("xorriso failed. Install libisoburn")
        .run_interactive()?;
    Ok(())
}

/// Hex sha256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<image>.sha256` in sha256sum format. Returns the digest.
pub fn write_checksum(image: &Path) -> Result<String> {
    let digest = sha256_file(image)?;
    let name = image
        .file_name()
        .with_context(|| format!("{} has no file name", image.display()))?
        .to_string_lossy();

    let mut checksum_path = image.as_os_str().to_owned();
    checksum_path.push(CHECKSUM_SUFFIX);
    fs::write(&checksum_path, format!("{}  {}\n", digest, name))
        .with_context(|| format!("Failed to write checksum for {}", image.display()))?;
    Ok(digest)
}

/// Record of a finished image, written as `manifest.json` in the workspace.
#[derive(Debug, Clone, Serialize)]
pub struct ImageManifest {
    pub label: String,
    pub title: String,
    pub kernel_version: String,
    pub compression: String,
    pub output: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    /// Files in the deploy tree, relative to it.
    pub contents: Vec<String>,
}

/// Relative paths of every file under `dir`, sorted.
pub fn list_tree(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(dir) {
                files.push(rel.display().to_string());
            }
        }
    }
    Ok(files)
}

pub fn write_manifest(path: &Path, manifest: &ImageManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Print summary after ISO creation.
pub fn print_iso_summary(manifest: &ImageManifest) {
    println!("\n=== Image Created ===");
    println!("  Output: {}", manifest.output.display());
    println!("  Size: {} MB", manifest.size_bytes / 1000 / 1000);
    println!("  Label: {}", manifest.label);
    println!("  Kernel: {}", manifest.kernel_version);
    println!("  SHA256: {}", manifest.sha256);
}

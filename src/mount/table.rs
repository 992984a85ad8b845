//! Mounts active on the host, whether or not the registry knows about them.
//!
//! A build killed before cleanup leaves its mounts behind. The next build
//! must find them before it removes the old workspace, or the removal walks
//! into the bind mounts and deletes host files.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The kernel's view of this process's mounts.
pub const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount points strictly below `dir`, deepest first, as listed in the
/// `mountinfo` table (normally [`MOUNTINFO`]).
///
/// Falls back to comparing device numbers while walking `dir` when the
/// table cannot be read. Bind mounts from the same filesystem are only
/// visible through the table.
pub fn mounts_below_in(dir: &Path, mountinfo: &Path) -> Result<Vec<PathBuf>> {
    let dir = fs::canonicalize(dir).with_context(|| format!("Failed to resolve {}", dir.display()))?;

    let mut found = match fs::read_to_string(mountinfo) {
        Ok(table) => parse_mountinfo(&table)
            .into_iter()
            .filter(|target| target != &dir && target.starts_with(&dir))
            .collect(),
        Err(e) => {
            tracing::debug!(
                path = %mountinfo.display(),
                "Mount table unreadable, comparing devices instead: {}",
                e
            );
            device_boundaries(&dir)?
        }
    };

    found.sort_by(|a, b| {
        b.as_os_str()
            .len()
            .cmp(&a.as_os_str().len())
            .then_with(|| a.cmp(b))
    });
    found.dedup();
    Ok(found)
}

/// Mount points listed in a mountinfo table (field 5 of each line).
fn parse_mountinfo(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(unescape)
        .collect()
}

/// Undo the kernel's `\ooo` octal escaping of spaces, tabs, newlines and backslashes.
fn unescape(field: &str) -> PathBuf {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = bytes
                .get(i + 1..i + 4)
                .and_then(|oct| std::str::from_utf8(oct).ok())
                .and_then(|oct| u8::from_str_radix(oct, 8).ok());
            if let Some(byte) = code {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    PathBuf::from(OsString::from_vec(out))
}

/// Directories under `dir` that live on a different device than `dir`.
fn device_boundaries(dir: &Path) -> Result<Vec<PathBuf>> {
    let root_dev = fs::symlink_metadata(dir)
        .with_context(|| format!("Failed to stat {}", dir.display()))?
        .dev();

    let mut found = Vec::new();
    let mut walker = WalkDir::new(dir).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dev = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?
            .dev();
        if dev != root_dev {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    Ok(found)
}

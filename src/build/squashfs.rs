//! Squashfs packing using mksquashfs.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Compression;
use crate::process::Cmd;

fn squashfs_cmd(source: &Path, output: &Path, compression: Compression) -> Result<Cmd> {
    let source = std::path::absolute(source)?;
    let parent = source
        .parent()
        .with_context(|| format!("{} has no parent directory", source.display()))?;

    let mut cmd = Cmd::new("mksquashfs").arg_path(&source).arg_path(output);
    // Keep the directory name so the image contains e.g. LiveOS/rootfs.img
    if source.is_dir() {
        cmd = cmd.arg("-keep-as-directory");
    }

    Ok(cmd
        .args(["-comp", compression.as_str()])
        .dir(parent)
        .error_msg("mksquashfs failed. Install squashfs-tools"))
}

/// Pack `source` into a squashfs image at `output`.
pub fn create_squashfs(
    source: &Path,
    output: &Path,
    compression: Compression,
    timeout: Option<Duration>,
) -> Result<()> {
    tracing::info!(
        source = %source.display(),
        output = %output.display(),
        compression = compression.as_str(),
        "Creating squashfs"
    );

    if output.exists() {
        fs::remove_file(output)?;
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    // mksquashfs shows progress, so stream it
    squashfs_cmd(source, output, compression)?
        .timeout(timeout)
        .run_interactive()?;

    let metadata = fs::metadata(output)?;
    tracing::info!(size_mb = metadata.len() / 1000 / 1000, "Squashfs created");
    Ok(())
}

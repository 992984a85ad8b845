//! Shared test utilities for imgspin tests.
#![allow(dead_code)]

use anyhow::Result;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use imgspin::mount::{MountFlags, MountManager, MountSyscalls, UnmountMode};

/// Minimal valid `.spin` configuration pointing at `packages`.
pub const BASIC_SPIN: &str = r#"
[image]
type = "liveos"
packages = "packages"

[branding]
title = "Solus Budgie"

[liveos]
compression = "xz"
filename = "solus.iso"
label = "SolusLive"
"#;

/// Test environment with a `.spin` file and its packages file.
pub struct SpinEnv {
    /// Temporary directory (kept alive for lifetime of SpinEnv)
    pub _temp_dir: TempDir,
    pub dir: PathBuf,
    pub spin_file: PathBuf,
}

impl SpinEnv {
    /// Write `spin` as `image.spin` and `packages` beside it.
    pub fn new(spin: &str, packages: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let spin_file = dir.join("image.spin");

        fs::write(&spin_file, spin).expect("Failed to write spin file");
        fs::write(dir.join("packages"), packages).expect("Failed to write packages file");

        Self {
            _temp_dir: temp_dir,
            dir,
            spin_file,
        }
    }

    pub fn basic(packages: &str) -> Self {
        Self::new(BASIC_SPIN, packages)
    }
}

/// A mount or unmount call seen by [`RecordingSyscalls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Mount(PathBuf),
    Unmount(PathBuf, UnmountMode),
}

/// Records calls instead of touching the host.
#[derive(Clone, Default)]
pub struct RecordingSyscalls {
    pub calls: Arc<Mutex<Vec<Recorded>>>,
    /// Graceful unmounts of these targets fail.
    pub busy: Vec<PathBuf>,
}

impl RecordingSyscalls {
    pub fn unmounts(&self) -> Vec<Recorded> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Recorded::Unmount(..)))
            .cloned()
            .collect()
    }
}

impl MountSyscalls for RecordingSyscalls {
    fn mount(
        &self,
        _source: &Path,
        target: &Path,
        _fstype: Option<&str>,
        _flags: MountFlags,
        _options: &[&str],
    ) -> Result<()> {
        self.calls.lock().push(Recorded::Mount(target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path, mode: UnmountMode) -> Result<()> {
        self.calls
            .lock()
            .push(Recorded::Unmount(target.to_path_buf(), mode));
        if mode == UnmountMode::Graceful && self.busy.iter().any(|b| b == target) {
            anyhow::bail!("target is busy");
        }
        Ok(())
    }
}

/// Manager over `sys` that never sleeps between retries.
pub fn recording_manager(sys: RecordingSyscalls) -> MountManager {
    MountManager::with_syscalls(Box::new(sys)).with_retry_delay(std::time::Duration::ZERO)
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

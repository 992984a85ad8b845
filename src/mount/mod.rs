//! Tracked mount points with guaranteed, escalating teardown.
//!
//! Every mount the pipeline makes goes through one [`MountManager`], shared
//! between the image builder and the package manager via `Arc`. The manager
//! records each mount point by absolute path so that [`MountManager::unmount_all`]
//! can tear everything down, deepest path first, no matter where a build failed.
//!
//! Unmounting escalates: a graceful `umount` is retried a few times, then
//! forced, then lazily detached. The registry entry is dropped even when the
//! final attempt fails; teardown is best effort.

mod scope;
mod system;
mod table;

pub use scope::ScopedMounts;
pub use system::SystemMounts;
pub use table::{mounts_below_in, MOUNTINFO};

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{SpinError, SpinResult};

/// Graceful unmount attempts before forcing.
pub const UMOUNT_MAX_TRIES: u32 = 3;

/// Delay between graceful unmount attempts.
pub const UMOUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Flags for a single mount call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountFlags {
    /// Re-expose `source` at the target instead of mounting a filesystem.
    pub bind: bool,
    pub read_only: bool,
}

impl MountFlags {
    pub fn bind() -> Self {
        Self {
            bind: true,
            read_only: false,
        }
    }
}

/// How hard an unmount attempt should try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    Graceful,
    /// `umount -f`
    Force,
    /// `umount -l`, detach now and clean up once no longer busy.
    Lazy,
}

/// A live mount owned by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: PathBuf,
    /// Absolute mount point, also the registry key.
    pub target: PathBuf,
}

/// The operations the manager needs from the host.
///
/// [`SystemMounts`] drives mount(8)/umount(8); tests substitute a recorder.
pub trait MountSyscalls: Send + Sync {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        flags: MountFlags,
        options: &[&str],
    ) -> Result<()>;

    fn unmount(&self, target: &Path, mode: UnmountMode) -> Result<()>;

    /// Flush dirty buffers before mass teardown.
    fn sync(&self) {}
}

/// Registry of active mounts.
pub struct MountManager {
    sys: Box<dyn MountSyscalls>,
    mounts: Mutex<BTreeMap<PathBuf, MountEntry>>,
    retry_delay: Duration,
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MountManager {
    /// Manager backed by the host's mount tools.
    pub fn new() -> Self {
        Self::with_syscalls(Box::new(SystemMounts))
    }

    pub fn with_syscalls(sys: Box<dyn MountSyscalls>) -> Self {
        Self {
            sys,
            mounts: Mutex::new(BTreeMap::new()),
            retry_delay: UMOUNT_RETRY_DELAY,
        }
    }

    /// Override the delay between graceful unmount attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Mount `source` at `target` and start tracking it.
    ///
    /// The entry is only recorded once the underlying mount succeeds.
    pub fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        flags: MountFlags,
        options: &[&str],
    ) -> SpinResult<()> {
        let target = absolute(target)?;
        let mut mounts = self.mounts.lock();

        if mounts.contains_key(&target) {
            return Err(SpinError::PathAlreadyTracked(target));
        }

        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            fstype = ?fstype,
            ?flags,
            "Mounting filesystem"
        );

        self.sys
            .mount(source, &target, fstype, flags, options)
            .map_err(|e| SpinError::MountFailure {
                target: target.clone(),
                reason: format!("{:#}", e),
            })?;

        mounts.insert(
            target.clone(),
            MountEntry {
                source: source.to_path_buf(),
                target,
            },
        );
        Ok(())
    }

    /// Bind mount `source` at `target`.
    pub fn bind_mount(&self, source: &Path, target: &Path, options: &[&str]) -> SpinResult<()> {
        self.mount(source, target, None, MountFlags::bind(), options)
    }

    /// Unmount a tracked mount point, escalating as needed.
    ///
    /// The entry is forgotten whether or not the final attempt succeeds.
    pub fn unmount(&self, target: &Path) -> SpinResult<()> {
        let target = absolute(target)?;
        let mut mounts = self.mounts.lock();

        let Some(entry) = mounts.get(&target).cloned() else {
            return Err(SpinError::UnknownMount(target));
        };

        let result = self.unmount_escalating(&entry);
        mounts.remove(&target);

        result.map_err(|e| SpinError::MountFailure {
            target,
            reason: format!("{:#}", e),
        })
    }

    /// Unmount everything, longest path first. Failures are logged, not raised.
    pub fn unmount_all(&self) {
        self.sys.sync();

        for target in self.teardown_order() {
            if let Err(e) = self.unmount(&target) {
                tracing::error!("{}", e);
            }
        }
    }

    /// Tracked mount points in the order `unmount_all` visits them.
    pub fn teardown_order(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = self.mounts.lock().keys().cloned().collect();
        // Deeper mounts have longer paths; tear those down before their parents
        targets.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));
        targets
    }

    pub fn is_tracked(&self, target: &Path) -> bool {
        match absolute(target) {
            Ok(target) => self.mounts.lock().contains_key(&target),
            Err(_) => false,
        }
    }

    pub fn entries(&self) -> Vec<MountEntry> {
        self.mounts.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.lock().is_empty()
    }

    fn unmount_escalating(&self, entry: &MountEntry) -> Result<()> {
        for attempt in 1..=UMOUNT_MAX_TRIES {
            match self.sys.unmount(&entry.target, UnmountMode::Graceful) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!(
                    target = %entry.target.display(),
                    attempt,
                    "Unmount failed: {:#}",
                    e
                ),
            }
            thread::sleep(self.retry_delay);
        }

        tracing::warn!(target = %entry.target.display(), "Forcing unmount");
        if self.sys.unmount(&entry.target, UnmountMode::Force).is_ok() {
            return Ok(());
        }

        tracing::warn!(target = %entry.target.display(), "Lazily detaching mount");
        self.sys.unmount(&entry.target, UnmountMode::Lazy)
    }
}

/// Absolute, lexically normalized form of `path`. Symlinks are not resolved.
pub fn absolute(path: &Path) -> SpinResult<PathBuf> {
    let path = std::path::absolute(path)?;
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    Ok(clean)
}

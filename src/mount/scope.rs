//! Groups of mounts released together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{MountFlags, MountManager};
use crate::error::SpinResult;

/// Mounts made for one phase of the build, released in reverse order.
///
/// Dropping the scope releases anything still mounted, so an early `?`
/// return never leaves a chroot's `/proc` behind.
pub struct ScopedMounts {
    manager: Arc<MountManager>,
    targets: Vec<PathBuf>,
}

impl ScopedMounts {
    pub fn new(manager: Arc<MountManager>) -> Self {
        Self {
            manager,
            targets: Vec::new(),
        }
    }

    /// Mount through the shared manager, creating `target` if needed.
    pub fn mount(
        &mut self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        flags: MountFlags,
        options: &[&str],
    ) -> SpinResult<()> {
        fs::create_dir_all(target)?;
        self.manager.mount(source, target, fstype, flags, options)?;
        self.targets.push(target.to_path_buf());
        Ok(())
    }

    pub fn bind(&mut self, source: &Path, target: &Path) -> SpinResult<()> {
        self.mount(source, target, None, MountFlags::bind(), &[])
    }

    /// Mount `/proc`, `/sys` and `/dev` into `root` for chrooted tools.
    pub fn mount_api_filesystems(&mut self, root: &Path) -> SpinResult<()> {
        self.mount(
            Path::new("proc"),
            &root.join("proc"),
            Some("proc"),
            MountFlags::default(),
            &["nosuid", "noexec", "nodev"],
        )?;
        self.mount(
            Path::new("sysfs"),
            &root.join("sys"),
            Some("sysfs"),
            MountFlags::default(),
            &["nosuid", "noexec", "nodev"],
        )?;
        self.bind(Path::new("/dev"), &root.join("dev"))
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    /// Unmount everything in this scope, newest first.
    ///
    /// Every mount is attempted; the first failure is returned.
    pub fn release(mut self) -> SpinResult<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> SpinResult<()> {
        let mut first_err = None;
        while let Some(target) = self.targets.pop() {
            if let Err(e) = self.manager.unmount(&target) {
                tracing::error!("{}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedMounts {
    fn drop(&mut self) {
        if !self.targets.is_empty() {
            let _ = self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::tests::{recording_manager, Call, RecordingMounts};
    use crate::mount::UnmountMode;

    #[test]
    fn test_release_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let sys = RecordingMounts::default();
        let calls = sys.calls.clone();
        let manager = Arc::new(recording_manager(sys));

        let mut scope = ScopedMounts::new(manager.clone());
        scope.mount_api_filesystems(root).unwrap();
        assert_eq!(manager.len(), 3);
        assert!(root.join("proc").is_dir());

        scope.release().unwrap();
        assert!(manager.is_empty());

        let unmounted: Vec<_> = calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Unmount(p, UnmountMode::Graceful) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            unmounted,
            vec![root.join("dev"), root.join("sys"), root.join("proc")]
        );
    }

    #[test]
    fn test_drop_releases_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(recording_manager(RecordingMounts::default()));
        {
            let mut scope = ScopedMounts::new(manager.clone());
            scope.bind(Path::new("/src"), &dir.path().join("cache")).unwrap();
            assert_eq!(scope.targets().len(), 1);
        }
        assert!(manager.is_empty());
    }
}

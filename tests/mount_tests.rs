//! Mount registry behaviour against a recording backend.

mod helpers;

use helpers::{recording_manager, Recorded, RecordingSyscalls};
use imgspin::mount::{MountFlags, ScopedMounts, UnmountMode};
use imgspin::SpinError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn mount(manager: &imgspin::mount::MountManager, target: &str) -> Result<(), SpinError> {
    manager.mount(
        Path::new("none"),
        Path::new(target),
        Some("tmpfs"),
        MountFlags::default(),
        &[],
    )
}

#[test]
fn test_double_mount_is_rejected() {
    let manager = recording_manager(RecordingSyscalls::default());
    mount(&manager, "/spin/rootfs").unwrap();

    let err = mount(&manager, "/spin/rootfs").unwrap_err();
    assert!(matches!(err, SpinError::PathAlreadyTracked(ref p) if p == Path::new("/spin/rootfs")));

    // Lexically equal paths collide too
    let err = mount(&manager, "/spin/./deploy/../rootfs").unwrap_err();
    assert!(matches!(err, SpinError::PathAlreadyTracked(_)));
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_remount_after_unmount() {
    let manager = recording_manager(RecordingSyscalls::default());
    mount(&manager, "/spin/rootfs").unwrap();
    manager.unmount(Path::new("/spin/rootfs")).unwrap();
    mount(&manager, "/spin/rootfs").unwrap();
}

#[test]
fn test_unknown_unmount() {
    let manager = recording_manager(RecordingSyscalls::default());
    let err = manager.unmount(Path::new("/never/mounted")).unwrap_err();
    assert!(matches!(err, SpinError::UnknownMount(_)));
}

#[test]
fn test_unmount_all_deepest_first() {
    let sys = RecordingSyscalls::default();
    let manager = recording_manager(sys.clone());
    for target in ["/a", "/a/b/c", "/a/b"] {
        mount(&manager, target).unwrap();
    }

    manager.unmount_all();

    assert_eq!(
        sys.unmounts(),
        vec![
            Recorded::Unmount(PathBuf::from("/a/b/c"), UnmountMode::Graceful),
            Recorded::Unmount(PathBuf::from("/a/b"), UnmountMode::Graceful),
            Recorded::Unmount(PathBuf::from("/a"), UnmountMode::Graceful),
        ]
    );
    assert!(manager.is_empty());
}

#[test]
fn test_busy_mount_escalates_to_force() {
    let sys = RecordingSyscalls {
        busy: vec![PathBuf::from("/spin/rootfs/proc")],
        ..Default::default()
    };
    let manager = recording_manager(sys.clone());
    mount(&manager, "/spin/rootfs/proc").unwrap();

    manager.unmount(Path::new("/spin/rootfs/proc")).unwrap();

    let modes: Vec<UnmountMode> = sys
        .unmounts()
        .into_iter()
        .map(|c| match c {
            Recorded::Unmount(_, mode) => mode,
            Recorded::Mount(_) => unreachable!(),
        })
        .collect();
    assert_eq!(
        modes,
        vec![
            UnmountMode::Graceful,
            UnmountMode::Graceful,
            UnmountMode::Graceful,
            UnmountMode::Force,
        ]
    );
    assert!(!manager.is_tracked(Path::new("/spin/rootfs/proc")));
}

#[test]
fn test_scoped_mounts_release_in_reverse() {
    let temp = tempfile::tempdir().unwrap();
    let sys = RecordingSyscalls::default();
    let manager = Arc::new(recording_manager(sys.clone()));

    let cache = temp.path().join("rootfs/var/cache");
    let proc_dir = temp.path().join("rootfs/proc");
    {
        let mut scope = ScopedMounts::new(manager.clone());
        scope.bind(Path::new("/var/cache"), &cache).unwrap();
        scope
            .mount(Path::new("proc"), &proc_dir, Some("proc"), MountFlags::default(), &[])
            .unwrap();
        assert!(proc_dir.is_dir());
        assert_eq!(manager.len(), 2);
    }

    assert!(manager.is_empty());
    assert_eq!(
        sys.unmounts(),
        vec![
            Recorded::Unmount(proc_dir, UnmountMode::Graceful),
            Recorded::Unmount(cache, UnmountMode::Graceful),
        ]
    );
}

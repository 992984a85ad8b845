//! Error kinds surfaced by the spin pipeline.
//!
//! Orchestration code works in `anyhow::Result`, but every failure that a
//! caller might want to react to is raised as a [`SpinError`] first so it can
//! be recovered with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

use crate::boot::Capability;
use crate::build::BuildStage;
use crate::spec::OperationKind;

/// Convenience alias for results carrying a [`SpinError`].
pub type SpinResult<T> = std::result::Result<T, SpinError>;

#[derive(Debug, Error)]
pub enum SpinError {
    /// A required host tool could not be found in PATH.
    #[error("required host tool '{tool}' not found (install: {package})")]
    MissingHostTool { tool: String, package: String },

    /// A repository line in the packages file has no URI.
    #[error("missing value for repo declaration '{name}' on line {line}")]
    MissingRepoValue { name: String, line: usize },

    /// A package or group line is empty once its markers are stripped.
    #[error("missing package or group name on line {line}")]
    MissingName { line: usize },

    #[error("path already known to the mount manager: {}", .0.display())]
    PathAlreadyTracked(PathBuf),

    #[error("attempted to unmount a path unknown to the mount manager: {}", .0.display())]
    UnknownMount(PathBuf),

    #[error("mount operation failed for {}: {reason}", .target.display())]
    MountFailure { target: PathBuf, reason: String },

    /// Something is still mounted below a directory that is about to be removed.
    #[error(
        "refusing to remove {}: {} is still mounted, unmount it first",
        .dir.display(),
        .mount.display()
    )]
    StillMounted { dir: PathBuf, mount: PathBuf },

    #[error("unknown or unsupported operation requested: {0}")]
    UnknownOperationVariant(OperationKind),

    #[error("internal error: no operations passed to apply_operations")]
    NotEnoughOps,

    #[error("no usable bootloader found, need {0}")]
    NoUsableBootloader(Capability),

    #[error("could not find a valid kernel in {}", .0.display())]
    NoKernelFound(PathBuf),

    #[error("invalid build transition: {from:?} -> {to:?}")]
    InvalidTransition { from: BuildStage, to: BuildStage },

    #[error("unknown filesystem '{0}'")]
    UnknownFilesystem(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("imgspin requires root privileges (euid {euid})")]
    NotRoot { euid: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Image builders.
//!
//! A [`Builder`] turns an [`ImageSpec`] into a finished image in strictly
//! ordered stages:
//!
//! ```text
//! Created -> Initialized -> WorkspaceReady -> StorageCreated -> StorageMounted
//!         -> (packages applied) -> AssetsCollected -> StorageUnmounted -> Finalized
//! ```
//!
//! Calling a stage out of order fails with `InvalidTransition` and touches
//! nothing. `cleanup` may be called from any stage.
//!
//! # Modules
//!
//! - `filesystem`: sparse image files, mkfs and fsck
//! - `squashfs`: mksquashfs wrapper
//! - `iso`: xorriso arguments, checksum and manifest
//! - `liveos`: the LiveOS (ISO) builder

pub mod filesystem;
pub mod iso;
pub mod liveos;
pub mod squashfs;

pub use liveos::LiveOsBuilder;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::ImageType;
use crate::error::{SpinError, SpinResult};
use crate::image_spec::ImageSpec;
use crate::mount::MountManager;

/// Position of a builder in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Created,
    Initialized,
    WorkspaceReady,
    StorageCreated,
    StorageMounted,
    AssetsCollected,
    StorageUnmounted,
    Finalized,
}

impl BuildStage {
    /// The only stage reachable from this one.
    pub fn next(self) -> Option<BuildStage> {
        use BuildStage::*;
        match self {
            Created => Some(Initialized),
            Initialized => Some(WorkspaceReady),
            WorkspaceReady => Some(StorageCreated),
            StorageCreated => Some(StorageMounted),
            StorageMounted => Some(AssetsCollected),
            AssetsCollected => Some(StorageUnmounted),
            StorageUnmounted => Some(Finalized),
            Finalized => None,
        }
    }
}

/// Enforces forward-only, one-step stage transitions.
#[derive(Debug, Clone, Copy)]
pub struct StageTracker {
    current: BuildStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: BuildStage::Created,
        }
    }
}

impl StageTracker {
    pub fn current(&self) -> BuildStage {
        self.current
    }

    /// Fail unless `to` directly follows the current stage.
    pub fn check(&self, to: BuildStage) -> SpinResult<()> {
        if self.current.next() == Some(to) {
            Ok(())
        } else {
            Err(SpinError::InvalidTransition {
                from: self.current,
                to,
            })
        }
    }

    /// Record that `to` completed. Call only after a successful [`check`](Self::check).
    pub fn enter(&mut self, to: BuildStage) {
        tracing::debug!(from = ?self.current, to = ?to, "Build stage complete");
        self.current = to;
    }
}

/// Drives image construction for one image type.
pub trait Builder {
    /// Verify host tools and bootloaders. Nothing is written to disk.
    fn init(&mut self, spec: &ImageSpec) -> Result<()>;

    /// Create a clean workspace, removing any previous one.
    fn prepare_workspace(&mut self) -> Result<()>;

    /// Create and format the backing storage.
    fn create_storage(&mut self) -> Result<()>;

    fn mount_storage(&mut self) -> Result<()>;

    /// Where packages should be installed.
    fn root_dir(&self) -> &Path;

    /// Pull the kernel and initramfs out of the installed root.
    fn collect_assets(&mut self) -> Result<()>;

    /// Unmount and check the backing storage.
    fn unmount_storage(&mut self) -> Result<()>;

    /// Produce the final image.
    fn finalize_image(&mut self) -> Result<()>;

    /// Release every mount. Never fails.
    fn cleanup(&mut self);

    fn stage(&self) -> BuildStage;
}

/// Create the builder for an image type.
pub fn new_builder(image_type: ImageType, mounts: Arc<MountManager>) -> Box<dyn Builder> {
    match image_type {
        ImageType::LiveOs => Box::new(LiveOsBuilder::new(mounts)),
    }
}

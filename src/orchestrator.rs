//! Drives a builder and a package manager through one image build.
//!
//! ```text
//! builder.init -> packager.init -> [cleanup scheduled]
//!   -> prepare_workspace -> create_storage -> mount_storage
//!   -> packager: init_root -> apply_operations (per block) -> finalize_root
//!   -> collect_assets -> unmount_storage -> finalize_image
//! ```
//!
//! The first failure stops the build. Once scheduled, `Builder::cleanup` runs
//! exactly once however the build ends.

use anyhow::Result;
use std::sync::Arc;

use crate::build::{self, Builder};
use crate::image_spec::ImageSpec;
use crate::mount::MountManager;
use crate::pkg::{self, PackageManager};
use crate::timing::Timer;

/// Runs `Builder::cleanup` when dropped.
struct CleanupGuard<'a> {
    builder: &'a mut dyn Builder,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!(stage = ?self.builder.stage(), "Cleaning up builder");
        self.builder.cleanup();
    }
}

pub struct Spinner {
    builder: Box<dyn Builder>,
    packager: Box<dyn PackageManager>,
}

impl Spinner {
    pub fn new(builder: Box<dyn Builder>, packager: Box<dyn PackageManager>) -> Self {
        Self { builder, packager }
    }

    /// Builder and package manager named in `spec.config`, sharing `mounts`.
    pub fn for_spec(spec: &ImageSpec, mounts: Arc<MountManager>) -> Self {
        let image = &spec.config.image;
        Self::new(
            build::new_builder(image.image_type, mounts.clone()),
            pkg::new_package_manager(image.package_manager, mounts),
        )
    }

    pub fn build(&mut self, spec: &ImageSpec) -> Result<()> {
        let total = Timer::start("Image build");

        tracing::info!("Initialising builder");
        self.builder.init(spec)?;

        tracing::info!(package_manager = self.packager.name(), "Initialising package manager");
        self.packager.init(&spec.config)?;

        let guard = CleanupGuard {
            builder: self.builder.as_mut(),
        };
        let builder = &mut *guard.builder;

        let timer = Timer::start("Storage");
        tracing::info!("Preparing workspace");
        builder.prepare_workspace()?;
        tracing::info!("Creating storage");
        builder.create_storage()?;
        tracing::info!("Mounting storage");
        builder.mount_storage()?;
        timer.finish();

        let timer = Timer::start("Packages");
        install_packages(self.packager.as_mut(), builder, spec)?;
        timer.finish();

        let timer = Timer::start("Image");
        tracing::info!("Collecting assets");
        builder.collect_assets()?;
        tracing::info!("Unmounting storage");
        builder.unmount_storage()?;
        tracing::info!("Finalizing image");
        builder.finalize_image()?;
        timer.finish();

        drop(guard);
        total.finish();
        Ok(())
    }
}

/// Populate the mounted root. The package manager is always cleaned up
/// before returning; a cleanup failure is only logged.
fn install_packages(
    packager: &mut dyn PackageManager,
    builder: &dyn Builder,
    spec: &ImageSpec,
) -> Result<()> {
    let result = apply_stack(packager, builder, spec);
    if let Err(e) = packager.cleanup() {
        tracing::error!(package_manager = packager.name(), "Cleanup failed: {:#}", e);
    }
    result
}

fn apply_stack(
    packager: &mut dyn PackageManager,
    builder: &dyn Builder,
    spec: &ImageSpec,
) -> Result<()> {
    let root = builder.root_dir();
    tracing::info!(root = %root.display(), "Initialising root with package manager");
    packager.init_root(root)?;

    let blocks = spec.stack.blocks();
    for (i, block) in blocks.iter().enumerate() {
        tracing::debug!(block = i + 1, total = blocks.len(), kind = %block.kind(), "Applying block");
        packager.apply_operations(block.ops())?;
    }

    tracing::info!("Finalizing package operations");
    packager.finalize_root()
}

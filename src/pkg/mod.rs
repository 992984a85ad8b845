//! Package managers that populate the image root.
//!
//! The orchestrator hands a [`PackageManager`] one homogeneous block of
//! operations at a time. Dispatch on the operation variant happens once, in
//! [`PackageManager::apply_operations`]; implementations only provide the
//! handlers for the variants they support.

pub mod eopkg;

pub use eopkg::EopkgManager;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ImageConfig, PackageManagerKind};
use crate::error::SpinError;
use crate::mount::MountManager;
use crate::spec::{Operation, OperationKind};

pub trait PackageManager {
    fn name(&self) -> &'static str;

    /// Check host requirements and read any relevant configuration.
    fn init(&mut self, config: &ImageConfig) -> Result<()>;

    /// Prepare the freshly mounted root before any installs.
    fn init_root(&mut self, root: &Path) -> Result<()>;

    /// Apply one block of operations. All operations share the first one's
    /// variant and safety flag.
    fn apply_operations(&mut self, ops: &[Operation]) -> Result<()> {
        let Some(first) = ops.first() else {
            return Err(SpinError::NotEnoughOps.into());
        };
        let ignore_safety = first.ignore_safety();

        tracing::info!(
            package_manager = self.name(),
            kind = %first.kind(),
            count = ops.len(),
            ignore_safety,
            "Applying operations"
        );

        match first {
            Operation::Repo { .. } => {
                let repos: Vec<(&str, &str)> = ops
                    .iter()
                    .filter_map(|op| match op {
                        Operation::Repo { name, uri } => Some((name.as_str(), uri.as_str())),
                        _ => None,
                    })
                    .collect();
                self.add_repos(&repos)
            }
            Operation::Group { .. } => {
                let groups: Vec<&str> = ops.iter().map(Operation::name).collect();
                self.install_groups(ignore_safety, &groups)
            }
            Operation::Package { .. } => {
                let packages: Vec<&str> = ops.iter().map(Operation::name).collect();
                self.install_packages(ignore_safety, &packages)
            }
        }
    }

    /// `(name, uri)` pairs.
    fn add_repos(&mut self, _repos: &[(&str, &str)]) -> Result<()> {
        Err(SpinError::UnknownOperationVariant(OperationKind::Repo).into())
    }

    fn install_groups(&mut self, _ignore_safety: bool, _groups: &[&str]) -> Result<()> {
        Err(SpinError::UnknownOperationVariant(OperationKind::Group).into())
    }

    fn install_packages(&mut self, _ignore_safety: bool, _packages: &[&str]) -> Result<()> {
        Err(SpinError::UnknownOperationVariant(OperationKind::Package).into())
    }

    /// Run once every block has been applied.
    fn finalize_root(&mut self) -> Result<()>;

    /// Undo anything `init_root` set up. Safe to call at any point.
    fn cleanup(&mut self) -> Result<()>;
}

/// Create the package manager for `kind`.
pub fn new_package_manager(kind: PackageManagerKind, mounts: Arc<MountManager>) -> Box<dyn PackageManager> {
    match kind {
        PackageManagerKind::Eopkg => Box::new(EopkgManager::new(mounts)),
    }
}

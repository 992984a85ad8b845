//! The immutable description of one image build.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ImageConfig;
use crate::spec::{self, OpStack};

/// Required extension of image specification files.
pub const SPIN_EXTENSION: &str = "spin";

/// A `.spin` configuration plus the parsed packages file it points at.
#[derive(Debug, Clone)]
pub struct ImageSpec {
    pub stack: OpStack,
    pub config: ImageConfig,
    /// Directory containing the `.spin` file. Relative paths resolve here.
    pub base_dir: PathBuf,
}

impl ImageSpec {
    /// Load `path`, then the packages file it names.
    pub fn load(path: &Path) -> Result<ImageSpec> {
        if path.extension().and_then(|e| e.to_str()) != Some(SPIN_EXTENSION) {
            bail!(
                "{} is not a .{} file",
                path.display(),
                SPIN_EXTENSION
            );
        }

        let path = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let base_dir = path
            .parent()
            .with_context(|| format!("{} has no parent directory", path.display()))?
            .to_path_buf();

        let config = ImageConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;

        let packages = base_dir.join(&config.image.packages);
        let stack = spec::parse_file(&packages)
            .with_context(|| format!("Failed to parse {}", packages.display()))?;

        tracing::debug!(
            packages = %packages.display(),
            blocks = stack.blocks().len(),
            operations = stack.operation_count(),
            "Loaded image specification"
        );

        Ok(ImageSpec {
            stack,
            config,
            base_dir,
        })
    }

    pub fn packages_path(&self) -> PathBuf {
        self.base_dir.join(&self.config.image.packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpinError;
    use std::fs;
    use tempfile::TempDir;

    const SPIN: &str = "[image]\ntype = \"liveos\"\npackages = \"packages\"\n\
                        [liveos]\ncompression = \"xz\"\nfilename = \"out.iso\"\n";

    #[test]
    fn test_load_resolves_packages_relative_to_spin_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("live.spin"), SPIN).unwrap();
        fs::write(dir.path().join("packages"), "Solus = http://a\n@system.base\nnano\n").unwrap();

        let spec = ImageSpec::load(&dir.path().join("live.spin")).unwrap();
        assert_eq!(spec.base_dir, dir.path());
        assert_eq!(spec.stack.blocks().len(), 3);
        assert_eq!(spec.packages_path(), dir.path().join("packages"));
    }

    #[test]
    fn test_load_requires_spin_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("live.toml"), SPIN).unwrap();
        let err = ImageSpec::load(&dir.path().join("live.toml")).unwrap_err();
        assert!(err.to_string().contains(".spin"));
    }

    #[test]
    fn test_load_surfaces_parse_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("live.spin"), SPIN).unwrap();
        fs::write(dir.path().join("packages"), "nano\nbroken =\n").unwrap();

        let err = ImageSpec::load(&dir.path().join("live.spin")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpinError>(),
            Some(SpinError::MissingRepoValue { line: 2, .. })
        ));
    }

    #[test]
    fn test_load_missing_packages_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("live.spin"), SPIN).unwrap();
        assert!(ImageSpec::load(&dir.path().join("live.spin")).is_err());
    }
}

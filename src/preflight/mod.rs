//! Preflight checks for an image build.
//!
//! Validates privileges, host tools and bootloader assets before anything
//! touches the disk. Run with `imgspin --check <file.spin>`.

mod host_tools;
mod types;

use anyhow::{bail, Result};
use std::path::Path;

pub use host_tools::{check_host_tools, require_tools, HostTool};
pub use types::{CheckResult, CheckStatus, PreflightReport};

use crate::boot::SyslinuxLoader;
use crate::build::liveos::LIVEOS_TOOLS;
use crate::config::{ImageType, LoaderType, PackageManagerKind};
use crate::error::{SpinError, SpinResult};
use crate::image_spec::ImageSpec;
use crate::mount;
use crate::pkg::eopkg::EOPKG_TOOLS;

pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Fail with `NotRoot` unless running as uid 0.
pub fn require_root() -> SpinResult<()> {
    match effective_uid() {
        0 => Ok(()),
        euid => Err(SpinError::NotRoot { euid }),
    }
}

/// Host tools the configured image type and package manager shell out to.
pub fn required_tools(spec: &ImageSpec) -> Vec<HostTool> {
    let mut tools = Vec::new();
    match spec.config.image.image_type {
        ImageType::LiveOs => tools.extend_from_slice(LIVEOS_TOOLS),
    }
    match spec.config.image.package_manager {
        PackageManagerKind::Eopkg => tools.extend_from_slice(EOPKG_TOOLS),
    }
    tools
}

/// Run all preflight checks.
pub fn run_preflight(spec: &ImageSpec) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    checks.push(match effective_uid() {
        0 => CheckResult::pass("root privileges"),
        euid => CheckResult::fail("root privileges", &format!("running as euid {}", euid)),
    });

    println!("Checking host tools...");
    checks.extend(check_host_tools(&required_tools(spec)));

    println!("Checking bootloaders...");
    checks.extend(check_bootloaders(&spec.config.liveos.bootloaders));

    checks.push(check_packages(spec));
    checks.extend(check_workspace(spec));

    println!();

    PreflightReport { checks }
}

fn check_bootloaders(loaders: &[LoaderType]) -> Vec<CheckResult> {
    loaders
        .iter()
        .map(|kind| match kind {
            LoaderType::Syslinux => {
                let missing = SyslinuxLoader::new().missing_assets();
                if missing.is_empty() {
                    CheckResult::pass("syslinux assets")
                } else {
                    CheckResult::fail(
                        "syslinux assets",
                        &format!("Missing {}. Install 'syslinux'.", missing.join(", ")),
                    )
                }
            }
        })
        .collect()
}

fn check_packages(spec: &ImageSpec) -> CheckResult {
    let path = spec.packages_path();
    let name = "packages file";
    if spec.stack.is_empty() {
        return CheckResult::warn(name, &format!("{} has no operations", path.display()));
    }
    CheckResult::pass_with(
        name,
        &format!(
            "{} operation(s) in {} block(s) from {}",
            spec.stack.operation_count(),
            spec.stack.blocks().len(),
            path.display()
        ),
    )
}

fn check_workspace(spec: &ImageSpec) -> Option<CheckResult> {
    let workspace = match spec.config.workspace_dir() {
        Ok(dir) => dir,
        Err(e) => return Some(CheckResult::fail("workspace", &e.to_string())),
    };
    if !workspace.is_dir() {
        return None;
    }
    let stale = mount::mounts_below_in(&workspace, Path::new(mount::MOUNTINFO)).unwrap_or_default();
    Some(match stale.first() {
        Some(target) => CheckResult::fail(
            "workspace",
            &format!("{} is still mounted, unmount it before building", target.display()),
        ),
        None => CheckResult::warn(
            "workspace",
            &format!("{} exists and will be removed", workspace.display()),
        ),
    })
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(spec: &ImageSpec) -> Result<()> {
    let report = run_preflight(spec);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageConfig;
    use crate::spec::Parser;
    use std::path::PathBuf;

    fn spec(packages: &str) -> ImageSpec {
        let config = ImageConfig::from_toml_str(
            "[image]\ntype = \"liveos\"\npackages = \"packages\"\n\
             [liveos]\ncompression = \"gzip\"\nfilename = \"out.iso\"\n\
             [build]\nworkspace = \"/nonexistent/imgspin-workspace\"\n",
        )
        .unwrap();
        ImageSpec {
            stack: Parser::default().parse_str(packages).unwrap(),
            config,
            base_dir: PathBuf::from("/srv/spins"),
        }
    }

    #[test]
    fn test_required_tools_cover_builder_and_packager() {
        let names: Vec<&str> = required_tools(&spec("nano\n")).iter().map(|t| t.name).collect();
        for tool in ["mksquashfs", "xorriso", "eopkg", "mknod"] {
            assert!(names.contains(&tool), "missing {}", tool);
        }
    }

    #[test]
    fn test_empty_packages_file_warns() {
        let check = check_packages(&spec("# nothing\n"));
        assert_eq!(check.status, CheckStatus::Warn);
    }

    #[test]
    fn test_packages_summary() {
        let check = check_packages(&spec("@system.base\nnano\nvim\n"));
        assert_eq!(check.status, CheckStatus::Pass);
        let details = check.details.unwrap();
        assert!(details.starts_with("3 operation(s) in 2 block(s)"));
        assert!(details.ends_with("/srv/spins/packages"));
    }

    #[test]
    fn test_report_contains_every_section() {
        let report = run_preflight(&spec("nano\n"));
        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"root privileges"));
        assert!(names.contains(&"syslinux assets"));
        assert!(names.contains(&"packages file"));
        assert!(names.contains(&"eopkg"));
    }
}

//! Host tool availability checks.

use crate::error::{SpinError, SpinResult};
use crate::process;

use super::types::CheckResult;

/// An external program the pipeline shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTool {
    pub name: &'static str,
    /// Package that provides it, for the install hint.
    pub package: &'static str,
    pub purpose: &'static str,
}

impl HostTool {
    pub const fn new(name: &'static str, package: &'static str, purpose: &'static str) -> Self {
        Self {
            name,
            package,
            purpose,
        }
    }
}

/// Fail with `MissingHostTool` on the first tool not found in PATH.
pub fn require_tools(tools: &[HostTool]) -> SpinResult<()> {
    for tool in tools {
        if !process::exists(tool.name) {
            return Err(SpinError::MissingHostTool {
                tool: tool.name.to_string(),
                package: tool.package.to_string(),
            });
        }
        tracing::debug!(tool = tool.name, "Found host tool");
    }
    Ok(())
}

/// Check host tools are installed.
pub fn check_host_tools(tools: &[HostTool]) -> Vec<CheckResult> {
    tools.iter().map(check_tool_exists).collect()
}

fn check_tool_exists(tool: &HostTool) -> CheckResult {
    match process::which(tool.name) {
        Some(path) => CheckResult::pass_with(tool.name, &path.display().to_string()),
        None => CheckResult::fail(
            tool.name,
            &format!("Not found. Install '{}' package. {}", tool.package, tool.purpose),
        ),
    }
}

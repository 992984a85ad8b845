//! Centralized command execution with consistent error handling.
//!
//! Every external tool the pipeline drives (mkfs, mount, eopkg, dracut,
//! mksquashfs, xorriso, ...) goes through [`Cmd`], so failures always carry
//! the program name, exit code and captured stderr.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a timed child is polled for exit.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
    /// Kill streaming commands that run longer than this.
    timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
            timeout: None,
        }
    }

    /// Run `program` inside `root` via chroot(8).
    pub fn chroot(root: &Path, program: impl AsRef<str>) -> Self {
        Cmd::new("chroot").arg_path(root).arg(program)
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Bound the runtime of [`Cmd::run_interactive`]. `None` waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render the command line for logging.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn failure_prefix(&self) -> String {
        self.error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program))
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        tracing::debug!(command = %self.display(), "Running");

        let output = self
            .command()
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self.failure_prefix();
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio (interactive/streaming).
    ///
    /// Output goes directly to the terminal. Use for long-running tools
    /// where the user should see progress (package installs, mksquashfs).
    pub fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!(command = %self.display(), "Running");

        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let status = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit)
                .with_context(|| format!("{} (timed out)", self.failure_prefix()))?,
            None => child
                .wait()
                .with_context(|| format!("Failed to wait for '{}'", self.program))?,
        };

        if !self.allow_fail && !status.success() {
            bail!(
                "{} (exit code {})",
                self.failure_prefix(),
                status.code().unwrap_or(-1)
            );
        }

        Ok(status)
    }
}

/// Poll `child` until it exits, killing it once `limit` has elapsed.
fn wait_with_timeout(child: &mut Child, limit: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= limit {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill timed out process {}: {}", child.id(), e);
            }
            let _ = child.wait();
            bail!("process exceeded timeout of {}s", limit.as_secs());
        }
        thread::sleep(TIMEOUT_POLL_INTERVAL);
    }
}

/// Resolve a program in PATH.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls").arg("/nonexistent_path_12345").run().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_which_exists() {
        assert!(which("sh").is_some());
        assert!(which("nonexistent_program_12345").is_none());
        assert!(exists("sh"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Custom build step failed")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Custom build step failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_run_in_directory() {
        let result = Cmd::new("pwd").dir(Path::new("/tmp")).run().unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }

    #[test]
    fn test_chroot_command_line() {
        let cmd = Cmd::chroot(Path::new("/srv/root"), "dracut").arg("--kver").arg("6.1");
        assert_eq!(cmd.display(), "chroot /srv/root dracut --kver 6.1");
    }

    #[test]
    fn test_interactive_timeout_kills_child() {
        let start = Instant::now();
        let err = Cmd::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(200)))
            .run_interactive()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_interactive_exit_within_timeout() {
        let limit = Some(Duration::from_secs(5));
        let status = Cmd::new("true").timeout(limit).run_interactive().unwrap();
        assert!(status.success());

        let err = Cmd::new("false").timeout(limit).run_interactive().unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("exit code 1"));
        assert!(!msg.contains("timed out"));
    }

    #[test]
    fn test_interactive_without_timeout() {
        let status = Cmd::new("true").run_interactive().unwrap();
        assert!(status.success());
    }
}

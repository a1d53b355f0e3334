//! Command execution utilities.
//!
//! Commands reach a device as plain shell text, so every interpolated
//! argument goes through [`shellquote`]. [`LocalShell`] runs commands on the
//! host running the verification itself; remote transports implement
//! [`CommandRunner`](crate::device::CommandRunner) themselves.
//!
//! # Example
//!
//! ```ignore
//! use sonic_dut_common::shell::{self, shellquote, REDIS_CLI};
//!
//! let cmd = format!("{} --raw -n 6 HGETALL {}", REDIS_CLI, shellquote("PSU_INFO|PSU 1"));
//! let stdout = shell::run_checked(&dut, &cmd).await?;
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::device::CommandRunner;
use crate::error::{DutError, DutResult};

/// Path to the `ip` command for kernel link state.
pub const IP_CMD: &str = "/sbin/ip";

/// `redis-cli` used for raw state store access.
pub const REDIS_CLI: &str = "redis-cli";

/// `sonic-cfggen` used for batched CONFIG_DB writes.
pub const SONIC_CFGGEN_CMD: &str = "sonic-cfggen";

/// SONiC `config` CLI.
pub const CONFIG_CMD: &str = "config";

/// SONiC `show` CLI.
pub const SHOW_CMD: &str = "show";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and `$`, `` ` ``, `"`, `\` and
/// newline are escaped.
///
/// # Example
///
/// ```
/// use sonic_dut_common::shell::shellquote;
///
/// assert_eq!(shellquote("PSU_INFO|PSU 1"), "\"PSU_INFO|PSU 1\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Quotes a string with single quotes, for payloads such as inline JSON.
pub fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Creates a successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Creates a failed result.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs a command and fails on non-zero exit.
///
/// # Returns
///
/// * `Ok(String)` - The stdout output on success
/// * `Err(DutError::CommandFailed)` - If the command returns non-zero
/// * `Err(_)` - Transport errors from the runner, unmodified
pub async fn run_checked<R>(runner: &R, cmd: &str) -> DutResult<String>
where
    R: CommandRunner + ?Sized,
{
    let result = runner.run(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(DutError::CommandFailed {
            host: runner.hostname().to_string(),
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

/// Executes a shell command on the local host.
///
/// The command runs through `/bin/sh -c` to support pipes and redirects.
pub async fn exec(cmd: &str) -> DutResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| DutError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// [`CommandRunner`] for the local host.
#[derive(Debug, Clone)]
pub struct LocalShell {
    hostname: String,
}

impl LocalShell {
    /// Creates a local runner reporting itself as `localhost`.
    pub fn new() -> Self {
        Self {
            hostname: "localhost".to_string(),
        }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run(&self, command: &str) -> DutResult<ExecResult> {
        exec(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("Ethernet0"), "\"Ethernet0\"");
        assert_eq!(shellquote("FAN_INFO|*"), "\"FAN_INFO|*\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_single_quote() {
        assert_eq!(single_quote(r#"{"a":1}"#), r#"'{"a":1}'"#);
        assert_eq!(single_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_exec_result_combined() {
        assert_eq!(ExecResult::ok("output").combined_output(), "output");
        assert_eq!(
            ExecResult::failed(1, "error message").combined_output(),
            "error message"
        );
        let both = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert_eq!(both.combined_output(), "stdout\nstderr");
    }

    #[tokio::test]
    async fn test_local_shell_echo() {
        let shell = LocalShell::new();
        let result = shell.run("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
        assert_eq!(shell.hostname(), "localhost");
    }

    #[tokio::test]
    async fn test_run_checked_success() {
        let output = run_checked(&LocalShell::new(), "echo success").await.unwrap();
        assert_eq!(output, "success");
    }

    #[tokio::test]
    async fn test_run_checked_failure() {
        let result = run_checked(&LocalShell::new(), "exit 42").await;
        match result {
            Err(DutError::CommandFailed {
                exit_code, host, ..
            }) => {
                assert_eq!(exit_code, 42);
                assert_eq!(host, "localhost");
            }
            other => panic!("Expected CommandFailed error, got {:?}", other),
        }
    }
}

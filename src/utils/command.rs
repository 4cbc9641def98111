//! Command execution primitives behind an injectable [`Runner`].
//!
//! Every external tool (apt, uv, nvidia-smi, systemctl, useradd) is reached
//! through a `Runner`, so stages can be exercised against a fake.

use std::process::{Command, Output, Stdio};

use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::utils::shell;

/// A single external command, optionally run as another account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    /// Inherit stdout/stderr instead of capturing (long installs).
    #[serde(skip)]
    pub passthrough: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            user: None,
            env: Vec::new(),
            passthrough: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    /// Shell-quoted rendering used in logs and error details.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell::quote_args(&parts)
    }
}

/// Captured result of running an [`Invocation`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> &str {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        }
    }
}

/// The single capability for touching the host through external tools.
///
/// Returns `Err` only when the program could not be spawned at all; a
/// non-zero exit is reported through [`CommandOutput::success`].
pub trait Runner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Run an invocation and require success, returning trimmed stdout.
pub fn run_checked(runner: &dyn Runner, invocation: &Invocation) -> Result<String> {
    let output = runner.run(invocation)?;
    require_success(invocation, output)
}

/// Run `program args...` as `account`, returning the raw output.
pub fn run_as(
    runner: &dyn Runner,
    account: &str,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput> {
    runner.run(&Invocation::new(program, args).as_user(account))
}

/// Convert a non-zero exit into a `provision.command_failed` error.
pub fn require_success(invocation: &Invocation, output: CommandOutput) -> Result<String> {
    if output.success {
        return Ok(output.stdout.trim().to_string());
    }

    Err(Error::provision_command_failed(CommandFailedDetails {
        command: invocation.display(),
        user: invocation.user.clone(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    }))
}

/// Executes invocations on the real host.
///
/// Invocations with a `user` are wrapped as `sudo -u <user> -H -- env K=V program args...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn build(invocation: &Invocation) -> Command {
        match &invocation.user {
            Some(user) => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-u", user.as_str(), "-H", "--", "env"]);
                for (key, value) in &invocation.env {
                    cmd.arg(format!("{}={}", key, value));
                }
                cmd.arg(&invocation.program).args(&invocation.args);
                cmd
            }
            None => {
                let mut cmd = Command::new(&invocation.program);
                cmd.args(&invocation.args);
                cmd.envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                cmd
            }
        }
    }
}

impl Runner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut cmd = Self::build(invocation);
        let context = Some(invocation.display());

        if invocation.passthrough {
            let status = cmd
                .stdin(Stdio::null())
                .status()
                .map_err(|e| Error::internal_io(format!("Failed to run: {}", e), context))?;
            return Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                success: status.success(),
                ..CommandOutput::default()
            });
        }

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::internal_io(format!("Failed to run: {}", e), context))?;

        Ok(from_output(&output))
    }
}

fn from_output(output: &Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        success: output.status.success(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_runner_captures_stdout() {
        let output = SystemRunner
            .run(&Invocation::new("echo", &["hello"]))
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn system_runner_reports_nonzero_exit() {
        let output = SystemRunner.run(&Invocation::new("false", &[])).unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, 1);
    }

    #[test]
    fn system_runner_errors_when_program_missing() {
        let result = SystemRunner.run(&Invocation::new("nonexistent_command_xyz", &[]));
        assert!(result.is_err());
    }

    #[test]
    fn system_runner_passes_env() {
        let output = SystemRunner
            .run(&Invocation::new("sh", &["-c", "printf %s \"$PROBE\""]).env("PROBE", "42"))
            .unwrap();
        assert_eq!(output.stdout, "42");
    }

    #[test]
    fn as_user_wraps_in_sudo() {
        let inv = Invocation::new("uv", &["venv"])
            .as_user("vllm")
            .env("UV_CACHE_DIR", "/opt/vllm/.cache");
        let cmd = SystemRunner::build(&inv);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(cmd.get_program(), "sudo");
        assert_eq!(
            args,
            vec!["-u", "vllm", "-H", "--", "env", "UV_CACHE_DIR=/opt/vllm/.cache", "uv", "venv"]
        );
    }

    #[test]
    fn display_quotes_arguments() {
        let inv = Invocation::new("python", &["-c", "import vllm; print(vllm.__version__)"]);
        assert_eq!(
            inv.display(),
            "python -c 'import vllm; print(vllm.__version__)'"
        );
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = CommandOutput {
            stdout: "stdout content".to_string(),
            stderr: "stderr content".to_string(),
            exit_code: 1,
            success: false,
        };
        assert_eq!(output.error_text(), "stderr content");
    }

    #[test]
    fn require_success_maps_failure_to_command_failed() {
        let inv = Invocation::new("useradd", &["vllm"]);
        let err = require_success(&inv, CommandOutput::failed(9, "exists")).unwrap_err();
        assert_eq!(err.code.as_str(), "provision.command_failed");
        assert_eq!(err.details["exitCode"], 9);
    }
}

//! Out-of-process execution of command nodes.

use crate::models::RunSpec;
use crate::Result;
use serde::Serialize;
use std::process::{Command, Stdio};

/// Captured result of one subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    /// Process exit code; `-1` when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command node's shell line.
///
/// Implementations must be shareable across the batch worker pool.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &RunSpec) -> Result<RunOutput>;
}

/// Runs commands with `sh -c` in the requested working directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &RunSpec) -> Result<RunOutput> {
        tracing::debug!(shell = %spec.shell, workdir = %spec.workdir, "spawning command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&spec.shell)
            .current_dir(&spec.workdir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .output()?;
        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shell_runner_captures_streams_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let mut spec = RunSpec::new("echo out; echo err >&2; exit 3");
        spec.workdir = dir.path().display().to_string();
        let output = ShellRunner.run(&spec).unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_shell_runner_uses_workdir_and_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let mut spec = RunSpec::new("cat marker.txt; printf \" $GREETING\"");
        spec.workdir = dir.path().display().to_string();
        spec.env.insert("GREETING".to_string(), "hello".to_string());
        let output = ShellRunner.run(&spec).unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "here hello");
    }

    #[test]
    fn test_missing_workdir_is_an_error() {
        let mut spec = RunSpec::new("true");
        spec.workdir = "/definitely/not/here".to_string();
        assert!(ShellRunner.run(&spec).is_err());
    }
}

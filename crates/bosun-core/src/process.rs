use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use crate::error::{ControlError, ControlResult};

#[derive(Debug)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run a command line through the shell with a hard timeout,
/// capturing stdout and stderr.
pub async fn run_shell(command: &str, timeout: Duration) -> ControlResult<ShellOutput> {
    debug!("executing shell command {command:?}");
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ControlError::RuntimeError(format!("failed to spawn {command:?}: {e}")))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            ControlError::RequestTimeout(format!(
                "shell command {command:?} did not finish within {} ms",
                timeout.as_millis()
            ))
        })?
        .map_err(|e| ControlError::RuntimeError(format!("failed to run {command:?}: {e}")))?;

    Ok(ShellOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = run_shell("printf hello; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let error = run_shell("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::RequestTimeout);
    }
}

use crate::error::{EngineError, Result};
use tracing::debug;

/// Output from a command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Execute a command and fail on non-zero exit code
pub async fn exec(program: &str, args: &[String]) -> Result<CommandOutput> {
    let output = exec_unchecked(program, args).await?;

    if !output.success() {
        return Err(EngineError::command_failed(
            render(program, args),
            output.exit_code,
            output.stderr.trim(),
        ));
    }

    Ok(output)
}

/// Execute a command and return output regardless of exit code
pub async fn exec_unchecked(program: &str, args: &[String]) -> Result<CommandOutput> {
    let rendered = render(program, args);
    debug!("Executing: {}", rendered);

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| EngineError::command_failed(rendered.clone(), -1, e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    debug!("Command exited with code {}: {}", exit_code, rendered);

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let out = exec("echo", &["hello".to_string()]).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_exec_fails_on_nonzero_exit() {
        let err = exec("false", &[]).await.unwrap_err();
        match err {
            EngineError::CommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "false");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exec_unchecked_missing_program() {
        let err = exec_unchecked("/nonexistent/zfs-binary", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::CommandFailed { exit_code: -1, .. }));
    }
}

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{ProxyError, Result};

/// Outcome of one command run.
#[derive(Debug)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Combined stdout and stderr, in the order the chunks arrived.
    pub output: String,
}

impl ExecutionResult {
    /// Turn an unsuccessful run into an execution error carrying the output.
    pub fn into_result(self, args: &[String]) -> Result<String> {
        if self.success {
            return Ok(self.output);
        }
        Err(ProxyError::Execution {
            message: format!("{:?} exited with code {:?}", args, self.exit_code),
            output: self.output,
        })
    }
}

/// Runs a job's argument list directly, without a shell.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    /// `args[0]` is the executable, the rest are passed through untouched.
    pub async fn execute(&self, msg_id: &str, args: &[String]) -> Result<ExecutionResult> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| ProxyError::execution("empty command"))?;
        tracing::info!(message_id = msg_id, command = ?args, "Executing command");

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            tracing::error!(message_id = msg_id, command = ?args, error = %e, "Command spawn failed");
            ProxyError::execution(format!("failed to spawn {:?}: {}", program, e))
        })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut combined = Vec::new();
        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    match n? {
                        0 => stdout = None,
                        n => combined.extend_from_slice(&out_buf[..n]),
                    }
                }
                n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    match n? {
                        0 => stderr = None,
                        n => combined.extend_from_slice(&err_buf[..n]),
                    }
                }
            }
        }

        let status = child.wait().await?;
        let output = String::from_utf8_lossy(&combined).to_string();
        let exit_code = status.code();
        if status.success() {
            tracing::info!(message_id = msg_id, exit_code = ?exit_code, "Command completed");
        } else {
            tracing::error!(
                message_id = msg_id,
                command = ?args,
                exit_code = ?exit_code,
                output = %output,
                "Command failed"
            );
        }
        Ok(ExecutionResult {
            exit_code,
            success: status.success(),
            output,
        })
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncReadExt + Unpin,
{
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

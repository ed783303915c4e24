//! Exec tool — run a shell command with a hard timeout, streaming output
//! as it is produced.
//!
//! The command runs under `sh -c`. Output lines are forwarded through the
//! orchestrator's output sink as they arrive and accumulated for the
//! terminal result. The child is killed on interruption or timeout; a
//! timeout surfaces as a tool error, never as a turn-level interruption.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use wh_domain::error::ErrorKind;
use wh_domain::tool::{Sensitivity, ToolOutcome};
use wh_engine::{Tool, ToolContext, ToolDescriptor};

/// Default hard timeout for a command, in seconds.
const DEFAULT_TIMEOUT_SEC: u64 = 120;
/// Cap on accumulated output characters.
const MAX_OUTPUT_CHARS: usize = 200_000;

#[derive(Debug, Clone, Deserialize)]
struct ExecRequest {
    command: String,
    /// Override the hard timeout (seconds).
    timeout_sec: Option<u64>,
    /// Working directory.
    #[serde(default)]
    workdir: Option<String>,
}

pub struct ExecTool {
    descriptor: ToolDescriptor,
    default_timeout: Duration,
}

impl ExecTool {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SEC))
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "exec",
                "Run a shell command and return its output.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string", "description": "Shell command to execute" },
                        "timeout_sec": { "type": "integer", "minimum": 1, "description": "Hard timeout in seconds" },
                        "workdir": { "type": "string", "description": "Working directory" }
                    },
                    "required": ["command"]
                }),
                Sensitivity::LocalEffect,
            ),
            default_timeout,
        }
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value, ctx: ToolContext<'_>) -> ToolOutcome {
        let req: ExecRequest = match serde_json::from_value(arguments) {
            Ok(req) => req,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::ValidationError,
                    format!("invalid exec arguments: {e}"),
                )
            }
        };
        let timeout = req
            .timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&req.command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(ref wd) = req.workdir {
            cmd.current_dir(wd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolOutcome::err(ErrorKind::SystemError, format!("failed to spawn: {e}"))
            }
        };

        // Readers forward lines into one channel; stdout and stderr merge
        // into a single combined transcript, teacher-terminal style.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(line_tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut output = String::new();
        let mut readers_done = false;
        let status = loop {
            tokio::select! {
                line = line_rx.recv(), if !readers_done => {
                    match line {
                        Some(line) => push_line(&mut output, &line, &ctx),
                        None => readers_done = true,
                    }
                }
                status = child.wait() => break status,
                _ = ctx.interrupt.cancelled() => {
                    let _ = child.kill().await;
                    tracing::debug!(command = %req.command, "exec killed on interrupt");
                    return ToolOutcome::err(ErrorKind::Interrupted, "command interrupted");
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    tracing::warn!(command = %req.command, timeout_sec = timeout.as_secs(), "exec timed out");
                    return ToolOutcome::err(
                        ErrorKind::Timeout,
                        format!("command timed out after {}s", timeout.as_secs()),
                    );
                }
            }
        };

        // The process exited; drain whatever the readers still hold.
        while let Some(line) = line_rx.recv().await {
            push_line(&mut output, &line, &ctx);
        }

        match status {
            Ok(exit) => {
                if let Some(code) = exit.code().filter(|c| *c != 0) {
                    output.push_str(&format!("[exit code: {code}]\n"));
                }
                ToolOutcome::ok(output)
            }
            Err(e) => ToolOutcome::err(ErrorKind::SystemError, format!("process error: {e}")),
        }
    }

    fn subtext(&self, arguments: &Value) -> Option<String> {
        arguments
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

fn push_line(output: &mut String, line: &str, ctx: &ToolContext<'_>) {
    ctx.output.chunk(line);
    if output.len() < MAX_OUTPUT_CHARS {
        output.push_str(line);
        output.push('\n');
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use wh_engine::{InterruptToken, NullOutput};

    fn ctx_parts() -> (NullOutput, InterruptToken) {
        (NullOutput, InterruptToken::new())
    }

    #[tokio::test]
    async fn runs_a_command_and_captures_output() {
        let tool = ExecTool::new();
        let (output, interrupt) = ctx_parts();
        let outcome = tool
            .execute(
                json!({ "command": "echo hello" }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_output() {
        let tool = ExecTool::new();
        let (output, interrupt) = ctx_parts();
        let outcome = tool
            .execute(
                json!({ "command": "exit 3" }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn stderr_merges_into_output() {
        let tool = ExecTool::new();
        let (output, interrupt) = ctx_parts();
        let outcome = tool
            .execute(
                json!({ "command": "echo oops 1>&2" }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn timeout_surfaces_as_tool_error() {
        let tool = ExecTool::new();
        let (output, interrupt) = ctx_parts();
        let outcome = tool
            .execute(
                json!({ "command": "sleep 5", "timeout_sec": 1 }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn interruption_kills_the_child() {
        let tool = ExecTool::new();
        let output = NullOutput;
        let interrupt = InterruptToken::new();

        let killer = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            killer.interrupt();
        });

        let outcome = tool
            .execute(
                json!({ "command": "sleep 30" }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Interrupted));
    }

    #[tokio::test]
    async fn workdir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecTool::new();
        let (output, interrupt) = ctx_parts();
        let outcome = tool
            .execute(
                json!({ "command": "pwd", "workdir": dir.path().to_str().unwrap() }),
                ToolContext {
                    output: &output,
                    interrupt: &interrupt,
                },
            )
            .await;

        assert!(outcome.success);
        let printed = outcome.output.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert!(printed.trim_end().ends_with(expected.file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn subtext_is_the_command() {
        let tool = ExecTool::new();
        assert_eq!(
            tool.subtext(&json!({ "command": "ls -la" })).as_deref(),
            Some("ls -la")
        );
    }
}

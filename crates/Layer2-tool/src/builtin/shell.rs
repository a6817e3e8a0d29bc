//! run_command - execute a shell command in the workspace root

use crate::{Tool, ToolContext, ToolDef, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use warden_foundation::{Error, Result, RiskSubject};

/// Maximum output length before truncation
const MAX_OUTPUT_LENGTH: usize = 30000;

/// Default timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Maximum timeout in seconds
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct RunCommandTool;

#[derive(Debug, Deserialize)]
struct RunParams {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

impl RunCommandTool {
    fn truncate_output(output: &str) -> String {
        if output.len() <= MAX_OUTPUT_LENGTH {
            return output.to_string();
        }

        let mut head = MAX_OUTPUT_LENGTH / 2;
        while !output.is_char_boundary(head) {
            head -= 1;
        }
        let mut tail = output.len() - MAX_OUTPUT_LENGTH / 2;
        while !output.is_char_boundary(tail) {
            tail += 1;
        }

        format!(
            "{}\n\n... [truncated {} characters] ...\n\n{}",
            &output[..head],
            tail - head,
            &output[tail..]
        )
    }

    fn shell() -> (&'static str, &'static str) {
        if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder(
            "run_command",
            "Execute a shell command with the workspace root as working directory",
        )
        .string_param("command", "The shell command to execute", true)
        .integer_param("timeout", "Timeout in seconds (default: 60, max: 600)", false)
        .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::Command(
            args.get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        )
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: RunParams = serde_json::from_value(args)
            .map_err(|e| Error::InvalidInput(format!("run_command: invalid parameters: {}", e)))?;

        let command = params.command.trim();
        if command.is_empty() {
            return Ok(ToolResult::error("Empty command"));
        }

        let timeout_secs = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);
        let (shell, shell_arg) = Self::shell();

        // kill_on_drop: a cancelled call drops this future and the child with it
        let child = Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .current_dir(ctx.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()) => {
                match result {
                    Ok(output) => output?,
                    Err(_) => {
                        return Ok(ToolResult::error(format!(
                            "Command timed out after {} seconds",
                            timeout_secs
                        )))
                    }
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut content = String::new();
        if !stdout.is_empty() {
            content.push_str(&Self::truncate_output(&stdout));
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push_str("\n\n--- stderr ---\n");
            }
            content.push_str(&Self::truncate_output(&stderr));
        }
        if content.is_empty() {
            content = "(no output)".to_string();
        }

        let metadata = serde_json::json!({ "exit_code": output.status.code() });
        if output.status.success() {
            Ok(ToolResult::success_with_metadata(content, metadata))
        } else {
            Ok(ToolResult {
                success: false,
                content,
                metadata: Some(metadata),
                error: Some(format!("exit status {}", output.status)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use warden_foundation::WorkspaceBoundary;

    #[test]
    fn test_truncate_output() {
        let long = "a".repeat(MAX_OUTPUT_LENGTH + 100);
        let truncated = RunCommandTool::truncate_output(&long);
        assert!(truncated.contains("[truncated 100 characters]"));
        assert_eq!(RunCommandTool::truncate_output("short"), "short");
    }

    #[test]
    fn test_risk_subject_is_command() {
        assert_eq!(
            RunCommandTool.risk_subject(&json!({ "command": "ls -la" })),
            RiskSubject::Command("ls -la".into())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ctx = ToolContext::new(
            Arc::new(WorkspaceBoundary::new(dir.path())),
            CancellationToken::new(),
        );

        let result = RunCommandTool
            .execute(&ctx, json!({ "command": "ls" }))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("marker.txt"));

        let failed = RunCommandTool
            .execute(&ctx, json!({ "command": "exit 3" }))
            .await
            .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.metadata.unwrap()["exit_code"], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_stops_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new(Arc::new(WorkspaceBoundary::new(dir.path())), cancel.clone());

        let handle = tokio::spawn(async move {
            RunCommandTool
                .execute(&ctx, json!({ "command": "sleep 30" }))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}

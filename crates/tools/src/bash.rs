//! Bash tool: execute shell commands.
//!
//! Supports command allowlisting, a persistent working directory across
//! calls (`cd` is handled in-process), and a timeout.

use async_trait::async_trait;
use kestrel_core::confirmation::OperationCategory;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Tool, ToolResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct BashTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
    cwd: Mutex<Option<PathBuf>>,
}

impl BashTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            allowed_commands,
            timeout: Duration::from_secs(timeout_secs),
            cwd: Mutex::new(None),
        }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("");
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    fn current_dir(&self) -> Option<PathBuf> {
        self.cwd.lock().map(|g| g.clone()).unwrap_or_else(|p| p.into_inner().clone())
    }

    fn change_dir(&self, target: &str) -> ToolResult {
        let base = self
            .current_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        let next = base.join(target.trim());

        match next.canonicalize() {
            Ok(dir) if dir.is_dir() => {
                let message = format!("Changed directory to: {}", dir.display());
                match self.cwd.lock() {
                    Ok(mut guard) => *guard = Some(dir),
                    Err(poisoned) => *poisoned.into_inner() = Some(dir),
                }
                ToolResult::ok(message)
            }
            Ok(dir) => ToolResult::failure(format!("Not a directory: {}", dir.display())),
            Err(e) => ToolResult::failure(format!("Cannot change directory to {target}: {e}")),
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command and return stdout/stderr. Use this for running programs, listing or searching files, git operations, builds and tests."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn category(&self) -> Option<OperationCategory> {
        Some(OperationCategory::Bash)
    }

    fn describe(&self, arguments: &serde_json::Value) -> String {
        arguments["command"].as_str().unwrap_or("<missing command>").to_string()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?
            .trim();

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "bash".into(),
                reason: format!("Command '{}' not in allowlist", command.split_whitespace().next().unwrap_or("")),
            });
        }

        if let Some(target) = command.strip_prefix("cd ")
            && !target.contains(['&', ';', '|'])
        {
            return Ok(self.change_dir(target));
        }

        debug!(command = %command, "Executing bash command");

        let mut cmd = Command::new("bash");
        cmd.args(["-c", command])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = self.current_dir() {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "bash".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: "bash".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                format!("{}\n[stderr]: {}", stdout.trim(), stderr.trim())
            };
            let text = if text.is_empty() { "Command executed successfully (no output)".to_string() } else { text };
            Ok(ToolResult::ok(text))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            Ok(ToolResult::failure(
                format!("[exit code: {code}]\n{}\n{}", stdout.trim(), stderr.trim()).trim().to_string(),
            ))
        }
    }
}

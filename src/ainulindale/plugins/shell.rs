//! Shell Plugin
//!
//! Command execution for agents, with the safety rails a board author
//! expects: a denylist of command substrings, an optional working
//! directory restriction, and a per-call timeout that kills the child
//! process. Output is captured separately for stdout and stderr; a
//! non-zero exit code is reported as a failed tool result, not an engine
//! error.
//!
//! Single operation: `run_command` (permission: execute).

use crate::ainulindale::plugin::{
    ExecutionContext, ToolDef, ToolError, ToolParameter, ToolParameterType, ToolPlugin,
    ToolResult,
};
use crate::ainulindale::rbac::Permission;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as TokioCommand;

/// Command execution tool plugin.
pub struct ShellPlugin {
    shell_path: String,
    default_timeout: Duration,
    denied: Vec<String>,
    workdir: Option<PathBuf>,
}

impl Default for ShellPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellPlugin {
    /// Create a plugin using `/bin/sh` with a 30 s default timeout.
    pub fn new() -> Self {
        Self {
            shell_path: "/bin/sh".to_string(),
            default_timeout: Duration::from_secs(30),
            denied: Vec::new(),
            workdir: None,
        }
    }

    /// Override the shell binary (builder pattern).
    pub fn with_shell(mut self, shell_path: impl Into<String>) -> Self {
        self.shell_path = shell_path.into();
        self
    }

    /// Override the default timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Reject commands containing any of these substrings (builder pattern).
    pub fn with_denied_commands<I, S>(mut self, denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied = denied.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the working directory (builder pattern).
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Short name of the configured shell (e.g. `"sh"`, `"bash"`), used by
    /// the prompt composer's environment section.
    pub fn shell_kind(&self) -> &str {
        Path::new(&self.shell_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sh")
    }

    fn check_denied(&self, command: &str) -> Result<(), ToolError> {
        for pattern in &self.denied {
            if command.contains(pattern.as_str()) {
                return Err(ToolError::PermissionDenied(format!(
                    "Command contains denied pattern '{}'",
                    pattern
                )));
            }
        }
        Ok(())
    }

    async fn run_command(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        self.check_denied(command)?;

        let cwd = match (cwd, &self.workdir) {
            (Some(dir), Some(restricted)) => {
                let joined = restricted.join(dir);
                if !joined.starts_with(restricted) {
                    return Err(ToolError::InvalidParams(format!(
                        "cwd escapes the restricted working directory: {}",
                        dir
                    )));
                }
                Some(joined)
            }
            (Some(dir), None) => Some(PathBuf::from(dir)),
            (None, Some(restricted)) => Some(restricted.clone()),
            (None, None) => None,
        };

        let mut builder = TokioCommand::new(&self.shell_path);
        builder
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cwd {
            builder.current_dir(dir);
        }

        let started = Instant::now();
        let child = builder
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("Cannot spawn shell: {}", e)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "Command wait failed: {}",
                    e
                )))
            }
            // kill_on_drop reaps the child when the future is dropped.
            Err(_) => {
                return Err(ToolError::Timeout(format!(
                    "Command exceeded {:?}: {}",
                    timeout, command
                )))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        log::debug!(
            "shell: '{}' exited {} in {}ms",
            command,
            exit_code,
            duration_ms
        );

        let body = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exitCode": exit_code,
            "durationMs": duration_ms,
        });
        if output.status.success() {
            Ok(ToolResult::success(body))
        } else {
            Ok(ToolResult {
                success: false,
                output: body,
                error: Some(format!("Command exited with code {}", exit_code)),
                metadata: Default::default(),
            })
        }
    }
}

#[async_trait]
impl ToolPlugin for ShellPlugin {
    fn id(&self) -> &str {
        "shell"
    }

    fn name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Run shell commands on the host"
    }

    fn category(&self) -> &str {
        "system"
    }

    fn icon(&self) -> &str {
        "terminal"
    }

    fn config_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "cwd": { "type": "string", "description": "Working directory" },
                "timeout_secs": { "type": "integer", "description": "Per-call timeout" }
            }
        })
    }

    fn tools(&self) -> Vec<ToolDef> {
        vec![ToolDef::new(
            "run_command",
            "Execute a shell command and capture its output",
            Permission::Execute,
        )
        .with_parameter(
            ToolParameter::new("command", ToolParameterType::String)
                .with_description("The command line to run")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("cwd", ToolParameterType::String)
                .with_description("Working directory for the command"),
        )
        .with_parameter(
            ToolParameter::new("timeout_secs", ToolParameterType::Integer)
                .with_description("Deadline in seconds"),
        )]
    }

    fn is_available(&self) -> bool {
        Path::new(&self.shell_path).exists()
    }

    async fn execute(
        &self,
        tool_name: &str,
        params: JsonValue,
        _ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        if tool_name != "run_command" {
            return Err(ToolError::NotFound(format!(
                "shell has no operation '{}'",
                tool_name
            )));
        }
        let command = params
            .get("command")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::InvalidParams("'command' must be a string".to_string()))?;
        let cwd = params.get("cwd").and_then(JsonValue::as_str);
        let timeout = params
            .get("timeout_secs")
            .and_then(JsonValue::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        self.run_command(command, cwd, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ainulindale::event_bus::EventBus;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            board_id: "b".to_string(),
            hex_key: "1,1".to_string(),
            entity_id: "sh".to_string(),
            agent_id: None,
            bus: Arc::new(EventBus::new()),
        }
    }

    #[tokio::test]
    async fn test_capture_stdout_and_exit_code() {
        let plugin = ShellPlugin::new();
        let result = plugin
            .execute("run_command", json!({"command": "echo hello"}), &ctx())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["stdout"], "hello\n");
        assert_eq!(result.output["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_failed_result() {
        let plugin = ShellPlugin::new();
        let result = plugin
            .execute("run_command", json!({"command": "exit 3"}), &ctx())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output["exitCode"], 3);
        assert!(result.error.as_deref().unwrap().contains("3"));
    }

    #[tokio::test]
    async fn test_denied_commands_are_rejected() {
        let plugin = ShellPlugin::new().with_denied_commands(["rm -rf", "sudo"]);
        let err = plugin
            .execute(
                "run_command",
                json!({"command": "sudo reboot"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool.permission_denied");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_command() {
        let plugin = ShellPlugin::new().with_timeout(Duration::from_millis(100));
        let err = plugin
            .execute("run_command", json!({"command": "sleep 5"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool.timeout");
    }

    #[tokio::test]
    async fn test_workdir_restriction() {
        let dir = tempfile::TempDir::new().unwrap();
        let plugin = ShellPlugin::new().with_workdir(dir.path());
        let result = plugin
            .execute("run_command", json!({"command": "pwd"}), &ctx())
            .await
            .unwrap();
        let pwd = result.output["stdout"].as_str().unwrap().trim().to_string();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(
            pwd.ends_with(canonical.file_name().unwrap().to_str().unwrap()),
            "pwd {} not under {}",
            pwd,
            canonical.display()
        );
    }

    #[test]
    fn test_shell_kind() {
        assert_eq!(ShellPlugin::new().shell_kind(), "sh");
        assert_eq!(
            ShellPlugin::new().with_shell("/bin/bash").shell_kind(),
            "bash"
        );
    }
}

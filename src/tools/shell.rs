//! Shell 执行器：白名单命令，工作目录固定为沙箱根
//!
//! 仅允许配置中的命令名（首词，如 ls、grep、cargo）；危险子串由策略引擎的 deny-list 在节点级拦截，
//! 这里再做一次本地兜底。shell 属于非确定性、需确认的 exec 能力。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::{ArgKind, ArgSpec, Tool, ToolSchema};

/// 本地兜底拦截的子串；节点级 deny-list 在策略引擎中已先行检查
const FORBIDDEN_SUBSTR: &[&str] = &["rm -rf", "rm -fr", "wget ", "curl | sh", "chmod 777", "mkfs", "dd if=", ":(){"];

/// Shell 工具：首词必须在白名单内，工作目录固定为沙箱根
pub struct ShellTool {
    allowed_commands: HashSet<String>,
    cwd: PathBuf,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            allowed_commands: allowed_commands.iter().map(|s| s.to_lowercase()).collect(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    /// 校验命令行，返回小写命令名
    fn check_command(&self, raw: &str) -> Result<String, String> {
        let lower = raw.to_lowercase();
        if let Some(hit) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {hit}"));
        }
        match lower.split_whitespace().next() {
            None => Err("Empty command".to_string()),
            Some(name) if self.allowed_commands.contains(name) => Ok(name.to_string()),
            Some(name) => Err(format!("Command '{name}' not in allowlist")),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("shell", "1.0.0")
            .description("Run a whitelisted shell command with the sandbox root as working directory.")
            .permission("exec")
            .nondeterministic()
            .confirm()
            .capability("exec")
            .capability("run")
            .capability("build")
            .capability("test")
            .arg("command", ArgSpec::required(ArgKind::String).describe("command line (first word must be allowlisted)"))
    }

    async fn invoke(&self, args: Value) -> Result<Value, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        let program = self.check_command(command)?;
        tracing::info!(program = %program, cwd = %self.cwd.display(), "shell tool invoke");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.cwd).kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| format!("Execution failed: {e}"))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(format!("{program} exited with {code}: {}", stderr.trim()));
        }
        Ok(json!({
            "program": program,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": stderr,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist() {
        let tool = ShellTool::new(vec!["ls".into(), "echo".into()], ".");
        assert_eq!(tool.check_command("LS -la"), Ok("ls".to_string()));
        assert!(tool.check_command("cargo build").is_err());
        assert!(tool.check_command("ls; rm -rf /").is_err());
        assert_eq!(tool.check_command("   "), Err("Empty command".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let tool = ShellTool::new(vec!["ls".into()], dir.path());
        let out = tool.invoke(json!({"command": "ls"})).await.unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(out["program"], json!("ls"));
    }

    #[test]
    fn test_schema_is_nondeterministic_and_confirmed() {
        let schema = ShellTool::new(vec![], ".").schema();
        assert!(!schema.deterministic);
        assert!(schema.requires_confirmation);
        assert!(schema.is_complete());
    }
}

//! 沙箱：单次工具调用的受限执行边界
//!
//! 调用前校验所有路径形参数必须落在沙箱根目录下（与策略无关，独立拦截 ../ 逃逸与绝对路径越界）；
//! 调用在独立 task 中运行并施加超时与协作式取消，工具返回的错误、超时、panic 一律包装为
//! SandboxExecutionError，执行器只会看到一种错误形状。每次调用输出结构化审计日志（JSON）。

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestrationError;
use crate::tools::{Tool, ToolSchema};

/// 沙箱故障类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    PathEscape,
    Timeout,
    Cancelled,
    ToolError,
    Panic,
}

/// 统一的沙箱执行错误，携带原始原因
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Sandbox execution error in tool '{tool}' ({kind:?}): {cause}")]
pub struct SandboxExecutionError {
    pub tool: String,
    pub kind: FaultKind,
    pub cause: String,
}

impl SandboxExecutionError {
    fn new(tool: &str, kind: FaultKind, cause: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            kind,
            cause: cause.into(),
        }
    }

    /// 工具自身报错或 panic 可以重试；越界、超时、取消不重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FaultKind::ToolError | FaultKind::Panic)
    }
}

impl From<SandboxExecutionError> for OrchestrationError {
    fn from(err: SandboxExecutionError) -> Self {
        OrchestrationError::SandboxExecution {
            tool: err.tool,
            cause: err.cause,
        }
    }
}

/// 词法解析 raw 相对 root 的路径，越界返回 Err；再对最近的已存在祖先做 canonicalize 校验（防符号链接逃逸）
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, String> {
    let raw = raw.trim();
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(raw.to_string());
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if !normalized.starts_with(root) {
        return Err(raw.to_string());
    }
    // 目标可能尚不存在：对最近的已存在祖先做 canonicalize，防止经符号链接目录逃逸
    let existing = normalized
        .ancestors()
        .take_while(|p| p.starts_with(root))
        .find(|p| p.symlink_metadata().is_ok());
    if let Some(existing) = existing {
        // 悬空符号链接无法 canonicalize，一并拒绝
        let canonical = existing.canonicalize().map_err(|_| raw.to_string())?;
        let root_canon = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if !canonical.starts_with(root_canon) {
            return Err(raw.to_string());
        }
    }
    Ok(normalized)
}

/// 沙箱：绑定根目录与单次调用超时
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>, timeout: Duration) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root, timeout }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 校验所有路径形参数（顶层字段）不逃逸沙箱根
    pub fn check_paths(&self, schema: &ToolSchema, args: &Value) -> Result<(), SandboxExecutionError> {
        let Some(obj) = args.as_object() else {
            return Ok(());
        };
        for (name, value) in obj {
            if !schema.is_path_arg(name) {
                continue;
            }
            if let Some(raw) = value.as_str() {
                resolve_within(&self.root, raw).map_err(|p| {
                    SandboxExecutionError::new(
                        &schema.name,
                        FaultKind::PathEscape,
                        format!("argument '{name}' resolves outside sandbox root: {p}"),
                    )
                })?;
            }
        }
        Ok(())
    }

    /// 执行一次调用：路径校验 -> 独立 task 运行 -> 超时 / 取消 / panic 统一包装
    pub async fn execute(
        &self,
        tool: Arc<dyn Tool>,
        schema: &ToolSchema,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, SandboxExecutionError> {
        self.check_paths(schema, &args)?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let cancellable = tool.supports_cancellation();
        let mut handle = tokio::spawn(async move { tool.invoke(args).await });

        let result = tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(SandboxExecutionError::new(&schema.name, FaultKind::ToolError, e)),
                Err(join_err) if join_err.is_panic() => {
                    let cause = panic_message(join_err.into_panic());
                    Err(SandboxExecutionError::new(&schema.name, FaultKind::Panic, cause))
                }
                Err(join_err) => Err(SandboxExecutionError::new(
                    &schema.name,
                    FaultKind::Cancelled,
                    join_err.to_string(),
                )),
            },
            _ = tokio::time::sleep(self.timeout) => {
                handle.abort();
                Err(SandboxExecutionError::new(
                    &schema.name,
                    FaultKind::Timeout,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                ))
            }
            _ = cancel.cancelled(), if cancellable => {
                handle.abort();
                Err(SandboxExecutionError::new(&schema.name, FaultKind::Cancelled, "cancelled by policy stop"))
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => match e.kind {
                FaultKind::Timeout => "timeout",
                FaultKind::Cancelled => "cancelled",
                FaultKind::Panic => "panic",
                _ => "error",
            },
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": schema.name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ArgKind, ArgSpec, EchoTool};
    use async_trait::async_trait;
    use serde_json::json;

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("panicky", "1.0.0")
                .description("always panics")
                .permission("read")
        }

        async fn invoke(&self, _args: Value) -> Result<Value, String> {
            panic!("boom");
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("slow", "1.0.0")
                .description("sleeps")
                .permission("read")
                .arg("path", ArgSpec::optional(ArgKind::Path))
        }

        async fn invoke(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_resolve_within_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(resolve_within(&root, "a/b.txt").is_ok());
        assert!(resolve_within(&root, "./a/../b.txt").is_ok());
        assert!(resolve_within(&root, "../etc/passwd").is_err());
        assert!(resolve_within(&root, "a/../../x").is_err());
        assert!(resolve_within(&root, "/etc/passwd").is_err());
        let inside = root.join("nested/file.txt");
        assert!(resolve_within(&root, inside.to_str().unwrap()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_rejects_new_file_under_escaping_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::fs::create_dir(root.join("real")).unwrap();

        assert!(resolve_within(&root, "link/new.txt").is_err());
        assert!(resolve_within(&root, "link/deeper/new.txt").is_err());
        assert!(resolve_within(&root, "real/new.txt").is_ok());
        assert!(resolve_within(&root, "fresh/dir/new.txt").is_ok());
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(EchoTool);
        let schema = tool.schema();
        let out = sandbox
            .execute(tool, &schema, json!({"text": "hi"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn test_panic_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(Panicky);
        let schema = tool.schema();
        let err = sandbox
            .execute(tool, &schema, json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::Panic);
        assert!(err.cause.contains("boom"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_path_escape_rejected_before_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(Slow);
        let schema = tool.schema();
        let start = Instant::now();
        let err = sandbox
            .execute(tool, &schema, json!({"path": "../../etc/shadow"}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::PathEscape);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_timeout_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), Duration::from_millis(50));
        let tool: Arc<dyn Tool> = Arc::new(Slow);
        let schema = tool.schema();
        let err = sandbox
            .execute(tool.clone(), &schema, json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::Timeout);

        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(10));
        let token = CancellationToken::new();
        token.cancel();
        let err = sandbox.execute(tool, &schema, json!({}), &token).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Cancelled);
    }
}

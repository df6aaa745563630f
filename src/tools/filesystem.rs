//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! FsReadTool / FsListTool / FsWriteTool 基于 SafeFs 提供 fs_read / fs_list / fs_write 能力。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::sandbox::resolve_within;
use crate::tools::{ArgKind, ArgSpec, Tool, ToolSchema};

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        resolve_within(&self.root_dir, path).map_err(|p| format!("Path escape attempt: {p}"))
    }

    pub async fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed: {e}"))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<usize, String> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create dir failed: {e}"))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| format!("Write failed: {e}"))?;
        Ok(content.len())
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| format!("List failed: {e}"))?;
        let mut entries = Vec::new();
        while let Some(e) = dir.next_entry().await.map_err(|e| e.to_string())? {
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{ty}"));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_arg(args: &Value) -> &str {
    args.get("path").and_then(|v| v.as_str()).unwrap_or("")
}

/// fs_read：读取文件内容
pub struct FsReadTool {
    fs: SafeFs,
}

impl FsReadTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("fs_read", "1.0.0")
            .description("Read file contents inside the sandbox. Args: {\"path\": \"relative path\"}")
            .permission("read")
            .capability("fs.read")
            .capability("read")
            .capability("open")
            .capability("load")
            .arg("path", ArgSpec::required(ArgKind::Path))
    }

    async fn invoke(&self, args: Value) -> Result<Value, String> {
        let path = path_arg(&args);
        tracing::info!(path = %path, "fs_read tool invoke");
        self.fs.read_file(path).await.map(Value::String)
    }
}

/// fs_list：列出目录
pub struct FsListTool {
    fs: SafeFs,
}

impl FsListTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("fs_list", "1.0.0")
            .description("List a directory inside the sandbox. Args: {\"path\": \"directory, default '.'\"}")
            .permission("read")
            .capability("fs.list")
            .capability("list")
            .arg("path", ArgSpec::optional(ArgKind::Path))
    }

    async fn invoke(&self, args: Value) -> Result<Value, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        tracing::info!(path = %path, "fs_list tool invoke");
        let entries = self.fs.list_dir(path).await?;
        Ok(json!(entries))
    }
}

/// fs_write：写入文件（覆盖）
pub struct FsWriteTool {
    fs: SafeFs,
}

impl FsWriteTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("fs_write", "1.0.0")
            .description("Write a file inside the sandbox. Args: {\"path\": \"relative path\", \"content\": \"text\"}")
            .permission("write")
            .capability("fs.write")
            .capability("write")
            .capability("create")
            .capability("save")
            .arg("path", ArgSpec::required(ArgKind::Path))
            .arg("content", ArgSpec::optional(ArgKind::String))
    }

    async fn invoke(&self, args: Value) -> Result<Value, String> {
        let path = path_arg(&args);
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(path = %path, bytes = content.len(), "fs_write tool invoke");
        let written = self.fs.write_file(path, content).await?;
        Ok(json!({ "path": path, "bytes": written }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let write = FsWriteTool::new(dir.path());
        let read = FsReadTool::new(dir.path());
        let list = FsListTool::new(dir.path());

        write
            .invoke(json!({"path": "notes/a.txt", "content": "hello"}))
            .await
            .unwrap();
        let content = read.invoke(json!({"path": "notes/a.txt"})).await.unwrap();
        assert_eq!(content, json!("hello"));
        let entries = list.invoke(json!({"path": "."})).await.unwrap();
        assert_eq!(entries, json!(["notes/"]));
    }

    #[tokio::test]
    async fn test_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = FsReadTool::new(dir.path());
        let err = read.invoke(json!({"path": "../../etc/passwd"})).await.unwrap_err();
        assert!(err.contains("Path escape"));
    }
}

//! 记忆日志持久化
//!
//! 将记忆记录逐行追加到 JSONL 文件（append-only），启动时可回放，用于跨进程重建同一次运行。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

use crate::memory::MemoryRecord;

/// 单文件 JSONL 日志：每行一条 MemoryRecord
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录；文件不存在时返回空 Vec，空行跳过
    pub fn load(&self) -> anyhow::Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read journal {}", self.path.display()))?;
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("journal line {} is not a memory record", i + 1))
            })
            .collect()
    }

    /// 追加一条记录；父目录不存在时自动创建
    pub fn append(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, MemoryStore};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/journal.jsonl");

        let store = InMemoryStore::with_journal(Journal::new(&path)).unwrap();
        store.record("reflection", json!({"confidence": 0.5}), Utc::now());
        store.record("plans", json!({"version": 1}), Utc::now());

        let replayed = InMemoryStore::with_journal(Journal::new(&path)).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed.namespace("plans")[0].payload, json!({"version": 1}));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("none.jsonl"));
        assert!(journal.load().unwrap().is_empty());
    }
}

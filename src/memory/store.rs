//! 记忆 / 上下文协作方契约与内存实现
//!
//! 契约只有两个操作：get_context(goal, top_k) 返回按分数排序的记录；record(namespace, payload, timestamp)
//! 追加写入，按命名空间区分，永不原地覆盖。规划器、执行器、反思引擎、策略引擎与自主循环都只通过它写入。
//! 当前实现为 InMemoryStore（关键词重叠 + 新近度），可选挂接 JSONL 日志持久化。

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Journal;

/// 单条记忆记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub namespace: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// 带分数的检索结果
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub score: f64,
    pub record: MemoryRecord,
}

/// 记忆协作方 trait：读多写少，需支持并发读
pub trait MemoryStore: Send + Sync {
    /// 按目标检索最相关的 top_k 条记录（分数降序）
    fn get_context(&self, goal: &str, top_k: usize) -> Vec<ScoredRecord>;

    /// 追加写入一条记录
    fn record(&self, namespace: &str, payload: Value, timestamp: DateTime<Utc>);

    /// 某命名空间下的全部记录（按写入顺序），用于审计重建
    fn namespace(&self, namespace: &str) -> Vec<MemoryRecord>;
}

/// 空实现：不需要记忆时使用
#[derive(Clone, Default)]
pub struct NoopMemory;

impl MemoryStore for NoopMemory {
    fn get_context(&self, _goal: &str, _top_k: usize) -> Vec<ScoredRecord> {
        Vec::new()
    }

    fn record(&self, _namespace: &str, _payload: Value, _timestamp: DateTime<Utc>) {}

    fn namespace(&self, _namespace: &str) -> Vec<MemoryRecord> {
        Vec::new()
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 新近度：1 / (1 + ln(1 + age_secs))
fn freshness(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = (now - timestamp).num_seconds().max(0) as f64;
    1.0 / (1.0 + age.ln_1p())
}

/// 内存实现：Vec 追加 + 关键词重叠检索
#[derive(Clone)]
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<(MemoryRecord, HashSet<String>)>>>,
    journal: Option<Arc<Journal>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            journal: None,
        }
    }

    /// 挂接 JSONL 日志：先回放已有记录，之后每次 record 同步追加
    pub fn with_journal(journal: Journal) -> anyhow::Result<Self> {
        let store = Self::new();
        {
            let mut records = store.records.write().unwrap_or_else(PoisonError::into_inner);
            for record in journal.load()? {
                let tokens = tokenize_lower(&record.payload.to_string());
                records.push((record, tokens));
            }
        }
        Ok(Self {
            journal: Some(Arc::new(journal)),
            ..store
        })
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore for InMemoryStore {
    fn get_context(&self, goal: &str, top_k: usize) -> Vec<ScoredRecord> {
        let query = tokenize_lower(goal);
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let now = Utc::now();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<ScoredRecord> = records
            .iter()
            .filter_map(|(record, tokens)| {
                let overlap = query.intersection(tokens).count();
                if overlap == 0 {
                    return None;
                }
                let similarity = overlap as f64 / query.len() as f64;
                let score = similarity * 0.7 + freshness(record.timestamp, now) * 0.3;
                Some(ScoredRecord {
                    score,
                    record: record.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        scored
    }

    fn record(&self, namespace: &str, payload: Value, timestamp: DateTime<Utc>) {
        let record = MemoryRecord {
            namespace: namespace.to_string(),
            payload,
            timestamp,
        };
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record) {
                tracing::warn!(namespace = %namespace, error = %e, "journal append failed");
            }
        }
        let tokens = tokenize_lower(&record.payload.to_string());
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((record, tokens));
    }

    fn namespace(&self, namespace: &str) -> Vec<MemoryRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(r, _)| r.namespace == namespace)
            .map(|(r, _)| r.clone())
            .collect()
    }
}

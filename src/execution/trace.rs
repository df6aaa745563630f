//! 执行轨迹：每个节点一条不可变结果，按批次分组

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::planning::{NodeId, NodeStatus};
use crate::policy::PolicyDecision;

/// 单个节点的执行结果（记录后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub node_id: NodeId,
    pub tool: String,
    /// Done / Failed / Skipped
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batch_index: usize,
    /// 实际调用次数（被拦截或跳过时为 0）
    pub attempts: u32,
    /// 造成拦截的策略决策
    pub policy: Option<PolicyDecision>,
}

impl ExecutionResult {
    pub fn is_policy_block(&self) -> bool {
        self.policy.as_ref().is_some_and(|p| p.is_block())
    }
}

/// 一个周期的执行轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub graph_version: u32,
    /// 按记录顺序的结果
    pub results: Vec<ExecutionResult>,
    /// 批次分组：batches[i] 为第 i 批的节点 ID
    pub batches: Vec<Vec<NodeId>>,
    /// 计划级拒绝（整图未执行）
    pub rejected: Option<PolicyDecision>,
    /// PolicyStop 原因
    pub policy_stop: Option<String>,
    /// 墙钟截止时间到达，剩余节点被跳过
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionTrace {
    pub fn new(graph_version: u32) -> Self {
        let now = Utc::now();
        Self {
            graph_version,
            results: Vec::new(),
            batches: Vec::new(),
            rejected: None,
            policy_stop: None,
            timed_out: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn result(&self, node_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.node_id == node_id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 批次内的结果
    pub fn batch(&self, index: usize) -> Vec<&ExecutionResult> {
        self.results.iter().filter(|r| r.batch_index == index).collect()
    }
}

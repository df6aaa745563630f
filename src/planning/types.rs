//! 任务图类型定义
//!
//! 定义任务节点、节点状态、任务图元数据与图错误

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type NodeId = String;

/// 节点状态（仅执行器修改）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// 等待依赖完成
    #[default]
    Pending,
    /// 依赖已完成，已进入就绪集
    Ready,
    /// 正在执行
    Running,
    /// 已完成
    Done,
    /// 失败（工具报错或被策略拦截）
    Failed,
    /// 跳过（依赖失败/跳过，或被 PolicyStop / 超时中止）
    Skipped,
}

impl NodeStatus {
    /// 终态：不会再被执行
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed | NodeStatus::Skipped)
    }
}

/// 任务图中的一个工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// 图内唯一 ID
    pub id: NodeId,
    /// 对应的子目标文本
    #[serde(default)]
    pub description: String,
    /// 工具名（必须在注册表中）
    pub tool: String,
    /// 调用参数
    #[serde(default = "empty_args")]
    pub args: Value,
    /// 前置节点
    #[serde(default)]
    pub depends_on: BTreeSet<NodeId>,
    /// 消费的资源（如 file:notes.txt）
    #[serde(default)]
    pub consumes: BTreeSet<String>,
    /// 产出的资源
    #[serde(default)]
    pub produces: BTreeSet<String>,
    /// 执行状态
    #[serde(default)]
    pub status: NodeStatus,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl TaskNode {
    pub fn new(id: impl Into<NodeId>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tool: tool.into(),
            args,
            depends_on: BTreeSet::new(),
            consumes: BTreeSet::new(),
            produces: BTreeSet::new(),
            status: NodeStatus::Pending,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn after(mut self, dep: impl Into<NodeId>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }

    pub fn consumes(mut self, resource: impl Into<String>) -> Self {
        self.consumes.insert(resource.into());
        self
    }

    pub fn produces(mut self, resource: impl Into<String>) -> Self {
        self.produces.insert(resource.into());
        self
    }
}

/// 任务图元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    /// 原始目标
    #[serde(default)]
    pub origin_goal: String,
    /// 计划版本（每次规划/重规划递增）
    #[serde(default)]
    pub version: u32,
    /// 规划过程的推理记录
    #[serde(default)]
    pub reasoning: Vec<String>,
    /// 是否为兜底单节点计划
    #[serde(default)]
    pub fallback: bool,
    /// 分解置信度（已映射子目标占比）
    #[serde(default)]
    pub confidence: f64,
    /// 未映射到任何工具的子目标
    #[serde(default)]
    pub capability_gaps: Vec<String>,
    /// 本次规划实际生效的调整提示
    #[serde(default)]
    pub applied_hints: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Default for GraphMetadata {
    fn default() -> Self {
        Self {
            origin_goal: String::new(),
            version: 0,
            reasoning: Vec::new(),
            fallback: false,
            confidence: 0.0,
            capability_gaps: Vec::new(),
            applied_hints: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// 任务图：节点 ID -> 节点，加元数据；BTreeMap 保证遍历顺序确定
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: BTreeMap<NodeId, TaskNode>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

/// 结构签名：节点 (id, tool, args) 集合 + 边集合，用于重复计划检测
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphSignature {
    pub nodes: BTreeSet<(NodeId, String, String)>,
    pub edges: BTreeSet<(NodeId, NodeId)>,
}

/// 任务图错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Node '{node}' depends on unknown node '{missing}'")]
    DanglingDependency { node: NodeId, missing: NodeId },

    #[error("Cyclic dependency detected through node '{0}'")]
    CycleDetected(NodeId),

    #[error("Node '{node}' references unknown tool '{tool}'")]
    UnknownTool { node: NodeId, tool: String },

    #[error("Node '{node}' has invalid arguments: {}", .problems.join("; "))]
    InvalidArgs { node: NodeId, problems: Vec<String> },

    #[error("Graph has no nodes")]
    Empty,
}

//! 策略决策与计划准入结果

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::planning::NodeId;

/// 决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Block,
    Rewrite,
}

/// 检查点：计划准入 / 节点准入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    Plan,
    Node,
}

/// 一次策略裁决：结果 + 原因码 + 可选的改写参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub checkpoint: Checkpoint,
    pub node_id: Option<NodeId>,
    pub outcome: Outcome,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_args: Option<Value>,
}

impl PolicyDecision {
    pub fn allow(checkpoint: Checkpoint, node_id: Option<&str>) -> Self {
        Self {
            checkpoint,
            node_id: node_id.map(str::to_string),
            outcome: Outcome::Allow,
            reasons: Vec::new(),
            rewritten_args: None,
        }
    }

    pub fn block(checkpoint: Checkpoint, node_id: Option<&str>, reasons: Vec<String>) -> Self {
        Self {
            outcome: Outcome::Block,
            reasons,
            ..Self::allow(checkpoint, node_id)
        }
    }

    pub fn rewrite(checkpoint: Checkpoint, node_id: Option<&str>, reasons: Vec<String>, args: Option<Value>) -> Self {
        Self {
            outcome: Outcome::Rewrite,
            reasons,
            rewritten_args: args,
            ..Self::allow(checkpoint, node_id)
        }
    }

    pub fn is_block(&self) -> bool {
        self.outcome == Outcome::Block
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }
}

/// 计划准入结果：整体决策 + 节点级预裁决 + 执行约束
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanAdmission {
    /// 计划级整体决策（Block 时整图不执行）
    pub decision: PolicyDecision,
    /// 准入阶段已被拦截的节点：执行器直接记为失败，不会派发
    pub blocked_nodes: BTreeMap<NodeId, PolicyDecision>,
    /// 单批最大并发
    pub parallelism: usize,
    /// 必须串行执行的节点（非确定性工具）
    pub serial_nodes: BTreeSet<NodeId>,
    /// 按顺序产生的全部决策（含节点级改写）
    pub decisions: Vec<PolicyDecision>,
}

impl PlanAdmission {
    pub fn is_rejected(&self) -> bool {
        self.decision.is_block()
    }

    /// 未经策略引擎的宽松准入（直接调用执行器时使用）
    pub fn permissive(parallelism: usize) -> Self {
        Self {
            decision: PolicyDecision::allow(Checkpoint::Plan, None),
            blocked_nodes: BTreeMap::new(),
            parallelism: parallelism.max(1),
            serial_nodes: BTreeSet::new(),
            decisions: Vec::new(),
        }
    }
}

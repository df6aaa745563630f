//! 反思类型：问题分类、计划调整建议、运营/战略视图与反思结果

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 问题类别
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum IssueKind {
    /// 子目标未映射到任何工具
    CapabilityGap,
    /// 计划级或节点级策略拦截，附原因码
    PolicyBlock(String),
    /// 同一工具在近期周期内反复失败
    RepeatedFailure,
    /// 工具调用失败
    ExecutionFailure,
    /// 因依赖失败而被跳过
    DependencySkipped,
    Timeout,
    EmptyTrace,
    /// 计划退化为兜底单节点
    FallbackPlan,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::CapabilityGap => write!(f, "capability_gap"),
            IssueKind::PolicyBlock(reason) => write!(f, "policy_block:{reason}"),
            IssueKind::RepeatedFailure => write!(f, "repeated_failure"),
            IssueKind::ExecutionFailure => write!(f, "execution_failure"),
            IssueKind::DependencySkipped => write!(f, "dependency_skipped"),
            IssueKind::Timeout => write!(f, "timeout"),
            IssueKind::EmptyTrace => write!(f, "empty_trace"),
            IssueKind::FallbackPlan => write!(f, "fallback_plan"),
        }
    }
}

/// 检出的问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// kind 的稳定字符串形式，如 policy_block:permission_denied
    pub code: String,
    pub node_id: Option<String>,
    pub tool: Option<String>,
    pub detail: String,
    /// 是否可通过重规划修正
    pub correctable: bool,
}

impl Issue {
    pub fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            code: kind.to_string(),
            kind,
            node_id: None,
            tool: None,
            detail: detail.into(),
            correctable: false,
        }
    }

    pub fn at(mut self, node_id: &str, tool: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self.tool = Some(tool.to_string());
        self
    }

    pub fn correctable(mut self) -> Self {
        self.correctable = true;
        self
    }
}

/// 交给下一周期规划器的调整建议
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAdjustment {
    /// 匹配子目标时排除该工具
    AvoidTool { tool: String, reason: String },
    /// 匹配子目标时优先该工具
    PreferTool { tool: String, reason: String },
    /// 将计划串行化（消除兄弟节点冲突或宽度超限）
    Serialize { reason: String },
}

impl PlanAdjustment {
    pub fn label(&self) -> String {
        match self {
            PlanAdjustment::AvoidTool { tool, .. } => format!("avoid_tool:{tool}"),
            PlanAdjustment::PreferTool { tool, .. } => format!("prefer_tool:{tool}"),
            PlanAdjustment::Serialize { .. } => "serialize".to_string(),
        }
    }
}

/// 运营视图：节点完成情况与失败工具统计
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationalView {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 被策略拦截的节点数（包含在 failed 内）
    pub blocked: usize,
    pub success_rate: f64,
    pub failures_by_tool: BTreeMap<String, u32>,
}

/// 战略视图：计划形态是否合适
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategicView {
    pub node_count: usize,
    /// 分解覆盖率：节点数 / (节点数 + 能力缺口数)
    #[serde(default)]
    pub coverage: f64,
    pub fallback: bool,
    /// 本目标历次计划中兜底计划的次数（含本次）
    pub fallback_count: u32,
    pub capability_gaps: Vec<String>,
    pub plan_rejected: bool,
    pub adequate: bool,
}

/// 一个周期的反思结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub correlation_id: String,
    pub cycle: u32,
    pub plan_version: u32,
    pub summary: String,
    pub issues: Vec<Issue>,
    pub adjustments: Vec<PlanAdjustment>,
    pub confidence: f64,
    pub operational: OperationalView,
    pub strategic: StrategicView,
    pub created_at: DateTime<Utc>,
}

impl Reflection {
    pub fn has_correctable_issues(&self) -> bool {
        self.issues.iter().any(|i| i.correctable)
    }

    /// 是否记录了指定 code 的问题
    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

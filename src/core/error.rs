//! 编排错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 OrchestrationError 决定记录为反思问题（可恢复）还是终止循环（Halted）。

use thiserror::Error;

use crate::core::state::HaltReason;
use crate::reflection::IssueKind;

/// 编排过程中可能出现的错误（规划、能力缺口、策略、沙箱、预算、重复计划、超时）
#[derive(Error, Debug, Clone)]
pub enum OrchestrationError {
    /// 连兜底计划也无法构造（如默认工具未注册）
    #[error("Planning failure: {0}")]
    PlanningFailure(String),

    #[error("Capability gap: no registered tool matches subgoal '{0}'")]
    CapabilityGap(String),

    /// 计划级或节点级拒绝，附带原因码
    #[error("Policy block: {}", .reasons.join(","))]
    PolicyBlock { reasons: Vec<String> },

    #[error("Sandbox execution error in tool '{tool}': {cause}")]
    SandboxExecution { tool: String, cause: String },

    /// 运行时 / 连续失败预算被突破
    #[error("Policy stop: {0}")]
    PolicyStop(String),

    #[error("Repeat plan detected at plan version {0}")]
    RepeatPlanDetected(u32),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl OrchestrationError {
    /// 稳定的 snake_case 错误码，供展示层与审计记录使用
    pub fn code(&self) -> &'static str {
        match self {
            Self::PlanningFailure(_) => "planning_failure",
            Self::CapabilityGap(_) => "capability_gap",
            Self::PolicyBlock { .. } => "policy_block",
            Self::SandboxExecution { .. } => "sandbox_execution_error",
            Self::PolicyStop(_) => "policy_stop",
            Self::RepeatPlanDetected(_) => "repeat_plan_detected",
            Self::Timeout(_) => "timeout",
            Self::ConfigError(_) => "config_error",
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 可恢复：转成反思问题，可能驱动重规划
    RecordIssue(IssueKind),
    /// 不可恢复：以给定原因终止
    Halt(HaltReason),
}

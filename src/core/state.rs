//! 状态定义：自主循环状态机与展示层快照
//!
//! 展示层只读 LoopSnapshot（状态、最新计划、最新轨迹、最新反思、周期记录）；
//! 完整运行状态由 AutonomyLoop 维护并投影到快照。

use serde::Serialize;

use crate::autonomy::AutonomyCycleRecord;
use crate::execution::ExecutionTrace;
use crate::planning::TaskGraph;
use crate::reflection::Reflection;

/// 终止类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltKind {
    Success,
    Failure,
    PolicyStop,
    Timeout,
}

/// 终止原因：稳定原因码 + 人类可读摘要，展示层无需再解释内部状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaltReason {
    pub kind: HaltKind,
    pub code: String,
    pub summary: String,
}

impl HaltReason {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            kind: HaltKind::Success,
            code: "goal_achieved".to_string(),
            summary: summary.into(),
        }
    }

    pub fn failure(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind: HaltKind::Failure,
            code: code.into(),
            summary: summary.into(),
        }
    }

    pub fn policy_stop(reason: &str) -> Self {
        Self {
            kind: HaltKind::PolicyStop,
            code: format!("policy_stop:{reason}"),
            summary: format!("Runtime policy budget breached ({reason}); remaining work aborted"),
        }
    }

    pub fn timeout(elapsed_ms: u64) -> Self {
        Self {
            kind: HaltKind::Timeout,
            code: "timeout".to_string(),
            summary: format!("Wall-clock budget exceeded after {elapsed_ms}ms"),
        }
    }
}

/// 自主循环状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Planning,
    Executing,
    Reflecting,
    Replanning,
    Halted(HaltReason),
}

impl LoopState {
    pub fn is_halted(&self) -> bool {
        matches!(self, LoopState::Halted(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Planning => "planning",
            LoopState::Executing => "executing",
            LoopState::Reflecting => "reflecting",
            LoopState::Replanning => "replanning",
            LoopState::Halted(_) => "halted",
        }
    }
}

/// 展示层看到的「投影」状态（export_state 的返回值）
#[derive(Debug, Clone, Serialize)]
pub struct LoopSnapshot {
    pub state: LoopState,
    pub goal: Option<String>,
    pub correlation_id: Option<String>,
    pub cycle: u32,
    pub plan_version: u32,
    pub latest_graph: Option<TaskGraph>,
    pub latest_trace: Option<ExecutionTrace>,
    pub latest_reflection: Option<Reflection>,
    pub records: Vec<AutonomyCycleRecord>,
}

impl Default for LoopSnapshot {
    fn default() -> Self {
        Self {
            state: LoopState::Idle,
            goal: None,
            correlation_id: None,
            cycle: 0,
            plan_version: 0,
            latest_graph: None,
            latest_trace: None,
            latest_reflection: None,
            records: Vec::new(),
        }
    }
}

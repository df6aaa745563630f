//! 周期记录与运行报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::HaltReason;
use crate::execution::ExecutionTrace;
use crate::planning::TaskGraph;
use crate::reflection::Reflection;

/// 每次循环迭代追加一条，之后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyCycleRecord {
    pub cycle: u32,
    pub correlation_id: String,
    pub plan_version: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// 本周期失败节点数
    pub failure_count: usize,
    pub done_count: usize,
    /// 对应反思的 ID（在规划阶段就终止的周期没有反思）
    pub reflection_id: Option<String>,
    pub confidence: Option<f64>,
    /// 周期结束方式：replan / success / 终止原因码
    pub outcome: String,
}

/// 一次目标运行的完整报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub correlation_id: String,
    pub goal: String,
    pub halt: HaltReason,
    pub elapsed_ms: u64,
    pub records: Vec<AutonomyCycleRecord>,
    /// 历次计划（按版本）
    pub plans: Vec<TaskGraph>,
    pub traces: Vec<ExecutionTrace>,
    pub reflections: Vec<Reflection>,
}

impl RunReport {
    pub fn cycles(&self) -> usize {
        self.records.len()
    }
}

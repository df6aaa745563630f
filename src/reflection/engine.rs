//! 反思引擎：执行轨迹 -> 结构化结论
//!
//! 运营视图统计完成/失败/跳过与各工具失败次数；战略视图判断计划形态（兜底、能力缺口、被拒绝）；
//! 置信度 = 完成率 × 分解覆盖率（能力缺口按未映射子目标计入），再扣除兜底惩罚，裁剪到 [0, 1]。可修正问题附带计划调整建议供下一周期规划器使用。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::config::ReflectionConfig;
use crate::execution::ExecutionTrace;
use crate::memory::artifact::{ArtifactMeta, NS_REFLECTION};
use crate::memory::MemoryStore;
use crate::planning::{NodeStatus, TaskGraph};
use crate::policy::engine::{
    ARTIFACT_COLLISION, CONFIRMATION_DENIED, PARALLEL_LIMIT_EXCEEDED, PERMISSION_DENIED,
};
use crate::reflection::{Issue, IssueKind, OperationalView, PlanAdjustment, Reflection, StrategicView};

const FALLBACK_PENALTY: f64 = 0.3;

pub struct ReflectionEngine {
    memory: Arc<dyn MemoryStore>,
    config: ReflectionConfig,
}

impl ReflectionEngine {
    pub fn new(memory: Arc<dyn MemoryStore>, config: ReflectionConfig) -> Self {
        Self { memory, config }
    }

    /// 分析一个周期；history 为同一目标之前的反思（旧在前）
    pub fn reflect(
        &self,
        goal: &str,
        graph: &TaskGraph,
        trace: &ExecutionTrace,
        history: &[Reflection],
        meta: &ArtifactMeta,
    ) -> Reflection {
        let window_start = history.len().saturating_sub(self.config.history_window);
        let window = &history[window_start..];

        let operational = operational_view(trace);
        let strategic = strategic_view(graph, trace, window);

        let mut issues = Vec::new();
        let mut adjustments: BTreeSet<PlanAdjustment> = BTreeSet::new();

        if let Some(rejection) = &trace.rejected {
            for reason in &rejection.reasons {
                let mut issue = Issue::new(IssueKind::PolicyBlock(reason.clone()), "plan rejected at admission");
                if reason == ARTIFACT_COLLISION || reason == PARALLEL_LIMIT_EXCEEDED {
                    issue = issue.correctable();
                    adjustments.insert(PlanAdjustment::Serialize {
                        reason: reason.clone(),
                    });
                }
                issues.push(issue);
            }
        }

        let mut dependency_skips = 0;
        for result in &trace.results {
            match result.status {
                NodeStatus::Failed if result.is_policy_block() => {
                    let reasons = result.policy.as_ref().map(|p| p.reasons.clone()).unwrap_or_default();
                    for reason in reasons {
                        let mut issue = Issue::new(
                            IssueKind::PolicyBlock(reason.clone()),
                            result.error.clone().unwrap_or_default(),
                        )
                        .at(&result.node_id, &result.tool);
                        if reason == PERMISSION_DENIED || reason == CONFIRMATION_DENIED {
                            issue = issue.correctable();
                            adjustments.insert(PlanAdjustment::AvoidTool {
                                tool: result.tool.clone(),
                                reason,
                            });
                        }
                        issues.push(issue);
                    }
                }
                NodeStatus::Failed => {
                    issues.push(
                        Issue::new(IssueKind::ExecutionFailure, result.error.clone().unwrap_or_default())
                            .at(&result.node_id, &result.tool)
                            .correctable(),
                    );
                    adjustments.insert(PlanAdjustment::AvoidTool {
                        tool: result.tool.clone(),
                        reason: "execution_failure".to_string(),
                    });
                }
                NodeStatus::Skipped
                    if result.error.as_deref().is_some_and(|e| e.starts_with("dependency")) =>
                {
                    dependency_skips += 1;
                }
                _ => {}
            }
        }
        if dependency_skips > 0 {
            issues.push(Issue::new(
                IssueKind::DependencySkipped,
                format!("{dependency_skips} node(s) skipped because a dependency did not complete"),
            ));
        }

        // 窗口内同一工具的累计失败
        let mut failure_totals: BTreeMap<&str, u32> = BTreeMap::new();
        for view in window.iter().map(|r| &r.operational).chain(std::iter::once(&operational)) {
            for (tool, count) in &view.failures_by_tool {
                *failure_totals.entry(tool.as_str()).or_default() += count;
            }
        }
        for (tool, total) in failure_totals {
            if total >= self.config.repeated_failure_threshold && operational.failures_by_tool.contains_key(tool) {
                let mut issue = Issue::new(IssueKind::RepeatedFailure, format!("tool failed {total} times recently"))
                    .correctable();
                issue.tool = Some(tool.to_string());
                issues.push(issue);
                adjustments.insert(PlanAdjustment::AvoidTool {
                    tool: tool.to_string(),
                    reason: "execution_failure".to_string(),
                });
            }
        }

        for gap in &strategic.capability_gaps {
            issues.push(Issue::new(IssueKind::CapabilityGap, format!("no registered tool matches '{gap}'")));
        }
        if strategic.fallback {
            issues.push(Issue::new(
                IssueKind::FallbackPlan,
                format!("plan degraded to a single fallback node ({} so far)", strategic.fallback_count),
            ));
        }
        if trace.timed_out {
            issues.push(Issue::new(IssueKind::Timeout, "wall-clock deadline reached during execution"));
        }
        if let Some(reason) = &trace.policy_stop {
            issues.push(Issue::new(IssueKind::PolicyBlock(reason.clone()), "runtime policy stop"));
        }
        if graph.is_empty() {
            issues.push(Issue::new(IssueKind::EmptyTrace, "graph had no nodes"));
        }

        let confidence = confidence(&operational, &strategic);
        let summary = format!(
            "{}/{} nodes done, {} failed, {} skipped; {} issue(s), confidence {:.2}",
            operational.done,
            operational.total,
            operational.failed,
            operational.skipped,
            issues.len(),
            confidence
        );

        let reflection = Reflection {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: meta.correlation_id.clone(),
            cycle: meta.cycle,
            plan_version: graph.metadata.version,
            summary,
            issues,
            adjustments: adjustments.into_iter().collect(),
            confidence,
            operational,
            strategic,
            created_at: Utc::now(),
        };

        tracing::info!(
            goal = %goal,
            cycle = reflection.cycle,
            confidence = reflection.confidence,
            issues = reflection.issues.len(),
            adjustments = reflection.adjustments.len(),
            "reflection ready"
        );
        meta.write(
            self.memory.as_ref(),
            NS_REFLECTION,
            serde_json::to_value(&reflection).unwrap_or(Value::Null),
        );
        reflection
    }
}

fn operational_view(trace: &ExecutionTrace) -> OperationalView {
    let mut view = OperationalView {
        total: trace.results.len(),
        ..OperationalView::default()
    };
    for result in &trace.results {
        match result.status {
            NodeStatus::Done => view.done += 1,
            NodeStatus::Failed => {
                view.failed += 1;
                if result.is_policy_block() {
                    view.blocked += 1;
                } else {
                    *view.failures_by_tool.entry(result.tool.clone()).or_default() += 1;
                }
            }
            NodeStatus::Skipped => view.skipped += 1,
            _ => {}
        }
    }
    view.success_rate = if view.total == 0 {
        0.0
    } else {
        view.done as f64 / view.total as f64
    };
    view
}

fn strategic_view(graph: &TaskGraph, trace: &ExecutionTrace, window: &[Reflection]) -> StrategicView {
    let fallback = graph.metadata.fallback;
    let fallback_count = window.iter().filter(|r| r.strategic.fallback).count() as u32 + u32::from(fallback);
    let plan_rejected = trace.rejected.is_some();
    let gaps = graph.metadata.capability_gaps.len();
    let coverage = if graph.len() + gaps == 0 {
        0.0
    } else {
        graph.len() as f64 / (graph.len() + gaps) as f64
    };
    StrategicView {
        node_count: graph.len(),
        coverage,
        fallback,
        fallback_count,
        capability_gaps: graph.metadata.capability_gaps.clone(),
        plan_rejected,
        adequate: !fallback && !plan_rejected && graph.metadata.capability_gaps.is_empty() && !graph.is_empty(),
    }
}

fn confidence(operational: &OperationalView, strategic: &StrategicView) -> f64 {
    if operational.total == 0 {
        return 0.0;
    }
    let penalty = if strategic.fallback { FALLBACK_PENALTY } else { 0.0 };
    (operational.success_rate * strategic.coverage * (1.0 - penalty)).clamp(0.0, 1.0)
}

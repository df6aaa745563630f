//! 自主循环：有界的有限状态机
//!
//! Idle -> Planning -> Executing -> Reflecting -> (Replanning -> Planning | Halted)。
//! 每个状态一个 step 函数；进入 Planning / Executing / Replanning 之前检查墙钟预算与策略预算。
//! 同一目标同时只运行一个周期；每个周期结束追加一条不可变的 AutonomyCycleRecord。
//! 终止性：周期数受 max_cycles 约束，时间受 max_time 约束，连续两次结构相同的计划直接终止。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::autonomy::{AutonomyCycleRecord, LoopEvent, RunReport};
use crate::config::AutonomyConfig;
use crate::core::{HaltReason, LoopSnapshot, LoopState, OrchestrationError, RecoveryAction, RecoveryEngine};
use crate::execution::{ExecutionTrace, Executor};
use crate::memory::artifact::{ArtifactMeta, NS_CYCLES, NS_GOALS};
use crate::memory::MemoryStore;
use crate::planning::{Goal, GraphSignature, NodeStatus, TaskGraph, TaskPlanner};
use crate::policy::{ApprovalGate, PlanAdmission, PolicyEngine};
use crate::reflection::{PlanAdjustment, Reflection, ReflectionEngine};
use crate::tools::ToolRegistry;

/// 单次运行的预算覆盖：「直到 N 个周期」或「直到时间耗尽」
#[derive(Debug, Clone, Copy, Default)]
pub struct RunBudget {
    pub max_cycles: Option<u32>,
    pub max_time: Option<Duration>,
}

impl RunBudget {
    pub fn cycles(max_cycles: u32) -> Self {
        Self {
            max_cycles: Some(max_cycles),
            max_time: None,
        }
    }

    pub fn time(max_time: Duration) -> Self {
        Self {
            max_cycles: None,
            max_time: Some(max_time),
        }
    }
}

/// 单次目标运行的可变状态，只属于正在运行的循环
struct RunContext {
    goal: Goal,
    goal_text: String,
    correlation_id: String,
    started: Instant,
    deadline: Instant,
    max_cycles: u32,
    state: LoopState,
    cycle: u32,
    plan_version: u32,
    hints: Vec<PlanAdjustment>,
    graph: Option<TaskGraph>,
    admission: Option<PlanAdmission>,
    trace: Option<ExecutionTrace>,
    prev_signature: Option<GraphSignature>,
    cycle_started: Instant,
    cycle_started_at: DateTime<Utc>,
    cycle_open: bool,
    plans: Vec<TaskGraph>,
    traces: Vec<ExecutionTrace>,
    reflections: Vec<Reflection>,
    records: Vec<AutonomyCycleRecord>,
}

impl RunContext {
    fn new(goal: Goal, max_cycles: u32, max_time: Duration) -> Self {
        let started = Instant::now();
        Self {
            goal_text: goal.text(),
            goal,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            started,
            deadline: started + max_time,
            max_cycles,
            state: LoopState::Idle,
            cycle: 1,
            plan_version: 1,
            hints: Vec::new(),
            graph: None,
            admission: None,
            trace: None,
            prev_signature: None,
            cycle_started: started,
            cycle_started_at: Utc::now(),
            cycle_open: false,
            plans: Vec::new(),
            traces: Vec::new(),
            reflections: Vec::new(),
            records: Vec::new(),
        }
    }

    fn meta(&self) -> ArtifactMeta {
        ArtifactMeta::new(self.correlation_id.clone(), self.cycle, self.plan_version)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct AutonomyLoop {
    planner: TaskPlanner,
    policy: Arc<PolicyEngine>,
    executor: Executor,
    reflection: ReflectionEngine,
    recovery: RecoveryEngine,
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    config: AutonomyConfig,
    state_tx: watch::Sender<LoopSnapshot>,
    events: broadcast::Sender<LoopEvent>,
    run_lock: Mutex<()>,
}

impl AutonomyLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: TaskPlanner,
        policy: Arc<PolicyEngine>,
        executor: Executor,
        reflection: ReflectionEngine,
        registry: Arc<ToolRegistry>,
        memory: Arc<dyn MemoryStore>,
        config: AutonomyConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopSnapshot::default());
        let (events, _) = broadcast::channel(256);
        Self {
            planner,
            policy,
            executor,
            reflection,
            recovery: RecoveryEngine::new(),
            registry,
            memory,
            config,
            state_tx,
            events,
            run_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    /// 展示层的确认闸门（approve / deny）
    pub fn approvals(&self) -> Arc<ApprovalGate> {
        self.policy.approvals()
    }

    /// 当前状态投影
    pub fn export_state(&self) -> LoopSnapshot {
        self.state_tx.borrow().clone()
    }

    /// 快照通道
    pub fn watch(&self) -> watch::Receiver<LoopSnapshot> {
        self.state_tx.subscribe()
    }

    /// 事件流
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// 在后台运行一个目标
    pub fn submit(self: &Arc<Self>, goal: impl Into<Goal>) -> JoinHandle<RunReport> {
        let this = Arc::clone(self);
        let goal = goal.into();
        tokio::spawn(async move { this.run(goal).await })
    }

    /// 按配置预算运行目标直到终止
    pub async fn run(&self, goal: impl Into<Goal>) -> RunReport {
        self.run_with(goal, RunBudget::default()).await
    }

    pub async fn run_with(&self, goal: impl Into<Goal>, budget: RunBudget) -> RunReport {
        let _guard = self.run_lock.lock().await;
        let max_cycles = budget.max_cycles.unwrap_or(self.config.max_cycles).max(1);
        let max_time = budget
            .max_time
            .unwrap_or_else(|| Duration::from_secs(self.config.max_time_secs));
        let goal = goal.into();
        let external = matches!(goal, Goal::Graph(_));
        let mut ctx = RunContext::new(goal, max_cycles, max_time);

        self.policy.begin_goal();
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            goal = %ctx.goal_text,
            max_cycles,
            max_time_ms = max_time.as_millis() as u64,
            "goal accepted"
        );
        ctx.meta().write(
            self.memory.as_ref(),
            NS_GOALS,
            json!({ "goal": ctx.goal_text, "external_graph": external }),
        );
        self.publish(&ctx);

        self.transition(&mut ctx, LoopState::Planning);
        while !ctx.state.is_halted() {
            let next = match self.check_budgets(&ctx) {
                Some(halt) => LoopState::Halted(halt),
                None => match ctx.state {
                    LoopState::Idle => LoopState::Planning,
                    LoopState::Planning => self.step_planning(&mut ctx),
                    LoopState::Executing => self.step_executing(&mut ctx).await,
                    LoopState::Reflecting => self.step_reflecting(&mut ctx),
                    LoopState::Replanning => self.step_replanning(&mut ctx),
                    LoopState::Halted(_) => break,
                },
            };
            self.transition(&mut ctx, next);
        }

        let halt = match &ctx.state {
            LoopState::Halted(reason) => reason.clone(),
            _ => HaltReason::failure("unrecoverable", "loop exited without halting"),
        };
        RunReport {
            correlation_id: ctx.correlation_id.clone(),
            goal: ctx.goal_text.clone(),
            halt,
            elapsed_ms: ctx.elapsed_ms(),
            records: ctx.records,
            plans: ctx.plans,
            traces: ctx.traces,
            reflections: ctx.reflections,
        }
    }

    /// 墙钟与策略预算；Reflecting 总是在执行之后进行，不在此拦截
    fn check_budgets(&self, ctx: &RunContext) -> Option<HaltReason> {
        if matches!(ctx.state, LoopState::Reflecting | LoopState::Halted(_)) {
            return None;
        }
        if Instant::now() >= ctx.deadline {
            return Some(self.halt_for(&OrchestrationError::Timeout(ctx.elapsed_ms())));
        }
        self.policy
            .budget_breach()
            .map(|reason| self.halt_for(&OrchestrationError::PolicyStop(reason)))
    }

    fn halt_for(&self, err: &OrchestrationError) -> HaltReason {
        match self.recovery.handle(err) {
            RecoveryAction::Halt(reason) => reason,
            RecoveryAction::RecordIssue(kind) => HaltReason::failure(err.code(), format!("{err} ({kind})")),
        }
    }

    fn step_planning(&self, ctx: &mut RunContext) -> LoopState {
        ctx.cycle_open = true;
        ctx.cycle_started = Instant::now();
        ctx.cycle_started_at = Utc::now();
        let meta = ctx.meta();

        let mut graph = match self.planner.plan(&ctx.goal, ctx.plan_version, &ctx.hints, &meta) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(error = %e, "planning failed");
                return LoopState::Halted(self.halt_for(&e));
            }
        };

        let signature = graph.signature();
        if ctx.prev_signature.as_ref() == Some(&signature) {
            tracing::warn!(version = ctx.plan_version, "plan structurally identical to previous cycle");
            ctx.plans.push(graph);
            return LoopState::Halted(self.halt_for(&OrchestrationError::RepeatPlanDetected(ctx.plan_version)));
        }
        ctx.prev_signature = Some(signature);

        let admission = self.policy.admit_plan(&mut graph, &meta);
        self.emit(LoopEvent::PlanReady {
            correlation_id: ctx.correlation_id.clone(),
            version: ctx.plan_version,
            nodes: graph.len(),
            fallback: graph.metadata.fallback,
        });
        ctx.plans.push(graph.clone());
        ctx.graph = Some(graph);
        ctx.admission = Some(admission);
        LoopState::Executing
    }

    async fn step_executing(&self, ctx: &mut RunContext) -> LoopState {
        let meta = ctx.meta();
        let (Some(mut graph), Some(admission)) = (ctx.graph.take(), ctx.admission.clone()) else {
            return LoopState::Halted(HaltReason::failure("planning_failure", "no admitted plan to execute"));
        };
        let trace = self
            .executor
            .execute(&mut graph, &admission, &meta, Some(ctx.deadline))
            .await;
        self.emit(LoopEvent::TraceReady {
            correlation_id: ctx.correlation_id.clone(),
            version: trace.graph_version,
            done: trace.count(NodeStatus::Done),
            failed: trace.count(NodeStatus::Failed),
            skipped: trace.count(NodeStatus::Skipped),
        });
        ctx.graph = Some(graph);
        ctx.traces.push(trace.clone());
        ctx.trace = Some(trace);
        LoopState::Reflecting
    }

    fn step_reflecting(&self, ctx: &mut RunContext) -> LoopState {
        let meta = ctx.meta();
        let (Some(graph), Some(trace)) = (ctx.graph.as_ref(), ctx.trace.as_ref()) else {
            return LoopState::Halted(HaltReason::failure("planning_failure", "no trace to reflect on"));
        };
        let reflection = self
            .reflection
            .reflect(&ctx.goal_text, graph, trace, &ctx.reflections, &meta);
        self.emit(LoopEvent::ReflectionReady {
            correlation_id: ctx.correlation_id.clone(),
            cycle: ctx.cycle,
            confidence: reflection.confidence,
            issues: reflection.issues.iter().map(|i| i.code.clone()).collect(),
        });

        let next = if let Some(reason) = &trace.policy_stop {
            LoopState::Halted(self.halt_for(&OrchestrationError::PolicyStop(reason.clone())))
        } else if trace.timed_out {
            LoopState::Halted(self.halt_for(&OrchestrationError::Timeout(ctx.elapsed_ms())))
        } else if reflection.confidence >= self.config.success_threshold && !reflection.has_correctable_issues() {
            LoopState::Halted(HaltReason::success(reflection.summary.clone()))
        } else if ctx.cycle >= ctx.max_cycles {
            LoopState::Halted(HaltReason::failure(
                "cycle_budget_exhausted",
                format!("{} cycle(s) used without success: {}", ctx.cycle, reflection.summary),
            ))
        } else if reflection.has_correctable_issues() {
            LoopState::Replanning
        } else {
            LoopState::Halted(HaltReason::failure(
                "unrecoverable",
                format!("no correctable issue to replan on: {}", reflection.summary),
            ))
        };

        let outcome = match &next {
            LoopState::Halted(reason) => reason.code.clone(),
            _ => "replan".to_string(),
        };
        if next == LoopState::Replanning {
            for adjustment in &reflection.adjustments {
                if !ctx.hints.contains(adjustment) {
                    ctx.hints.push(adjustment.clone());
                }
            }
        }
        self.close_cycle(ctx, &outcome, Some(&reflection));
        ctx.reflections.push(reflection);
        next
    }

    fn step_replanning(&self, ctx: &mut RunContext) -> LoopState {
        ctx.cycle += 1;
        ctx.plan_version += 1;
        ctx.graph = None;
        ctx.admission = None;
        ctx.trace = None;
        tracing::info!(
            cycle = ctx.cycle,
            version = ctx.plan_version,
            hints = ?ctx.hints.iter().map(PlanAdjustment::label).collect::<Vec<_>>(),
            "replanning"
        );
        LoopState::Planning
    }

    fn close_cycle(&self, ctx: &mut RunContext, outcome: &str, reflection: Option<&Reflection>) {
        if !ctx.cycle_open {
            return;
        }
        let trace = ctx.trace.as_ref();
        let record = AutonomyCycleRecord {
            cycle: ctx.cycle,
            correlation_id: ctx.correlation_id.clone(),
            plan_version: ctx.plan_version,
            started_at: ctx.cycle_started_at,
            duration_ms: ctx.cycle_started.elapsed().as_millis() as u64,
            failure_count: trace.map(|t| t.count(NodeStatus::Failed)).unwrap_or(0),
            done_count: trace.map(|t| t.count(NodeStatus::Done)).unwrap_or(0),
            reflection_id: reflection.map(|r| r.id.clone()),
            confidence: reflection.map(|r| r.confidence),
            outcome: outcome.to_string(),
        };
        ctx.meta().write(
            self.memory.as_ref(),
            NS_CYCLES,
            serde_json::to_value(&record).unwrap_or(Value::Null),
        );
        ctx.records.push(record);
        ctx.cycle_open = false;
    }

    fn transition(&self, ctx: &mut RunContext, next: LoopState) {
        if let LoopState::Halted(reason) = &next {
            let code = reason.code.clone();
            self.close_cycle(ctx, &code, None);
        }
        let from = ctx.state.name();
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            cycle = ctx.cycle,
            from,
            to = next.name(),
            "state transition"
        );
        self.emit(LoopEvent::StateChanged {
            correlation_id: ctx.correlation_id.clone(),
            from: from.to_string(),
            to: next.name().to_string(),
            cycle: ctx.cycle,
        });
        if let LoopState::Halted(reason) = &next {
            tracing::info!(kind = ?reason.kind, code = %reason.code, summary = %reason.summary, "halted");
            ctx.meta().write(
                self.memory.as_ref(),
                NS_GOALS,
                json!({ "goal": ctx.goal_text, "halt": reason }),
            );
            self.emit(LoopEvent::Halted {
                correlation_id: ctx.correlation_id.clone(),
                reason: reason.clone(),
            });
        }
        ctx.state = next;
        self.publish(ctx);
    }

    fn emit(&self, event: LoopEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }

    fn publish(&self, ctx: &RunContext) {
        self.state_tx.send_replace(LoopSnapshot {
            state: ctx.state.clone(),
            goal: Some(ctx.goal_text.clone()),
            correlation_id: Some(ctx.correlation_id.clone()),
            cycle: ctx.cycle,
            plan_version: ctx.plan_version,
            latest_graph: ctx.graph.clone().or_else(|| ctx.plans.last().cloned()),
            latest_trace: ctx.trace.clone().or_else(|| ctx.traces.last().cloned()),
            latest_reflection: ctx.reflections.last().cloned(),
            records: ctx.records.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::{HaltKind, HiveBuilder};

    fn hive(dir: &tempfile::TempDir) -> AutonomyLoop {
        HiveBuilder::new(AppConfig::default())
            .sandbox_root(dir.path())
            .build()
            .unwrap()
    }

    #[test]
    fn test_initial_snapshot_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = hive(&dir).export_state();
        assert_eq!(snapshot.state, LoopState::Idle);
        assert!(snapshot.latest_graph.is_none());
        assert!(snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_tracks_latest_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let hive = hive(&dir);
        let mut watch = hive.watch();

        let report = hive.run("write hello.txt").await;
        assert_eq!(report.halt.kind, HaltKind::Success);

        assert!(watch.has_changed().unwrap());
        let snapshot = watch.borrow_and_update().clone();
        assert!(snapshot.state.is_halted());
        assert_eq!(snapshot.correlation_id.as_deref(), Some(report.correlation_id.as_str()));
        assert_eq!(snapshot.latest_graph.unwrap().len(), 1);
        assert!(snapshot.latest_trace.is_some());
        assert!(snapshot.latest_reflection.is_some());
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_cycle_budget_still_runs_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let report = hive(&dir).run_with("write x.txt", RunBudget::cycles(0)).await;
        assert_eq!(report.cycles(), 1);
        assert_eq!(report.halt.kind, HaltKind::Success);
    }

    #[tokio::test]
    async fn test_exhausted_time_budget_halts_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let report = hive(&dir).run_with("write x.txt", RunBudget::time(Duration::ZERO)).await;
        assert_eq!(report.halt.kind, HaltKind::Timeout);
        assert!(report.plans.is_empty());
        assert!(report.records.is_empty());
    }
}

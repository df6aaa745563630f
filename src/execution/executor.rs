//! 依赖感知的并发执行器
//!
//! 反复计算就绪集（依赖全部 Done 的 Pending 节点）作为一批，批内经节点级策略准入后交给沙箱并发执行，
//! 并发度受准入给出的并行上限约束（Semaphore）；非确定性节点各自单独成批。
//! 依赖失败或跳过的节点级联标记为 Skipped，不会调用。一批全部返回后才计算下一批，
//! 这保证任何节点都不会早于其依赖完成而启动。PolicyStop 取消在途调用并跳过剩余节点，仍产出完整轨迹。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::core::OrchestrationError;
use crate::execution::{ExecutionResult, ExecutionTrace};
use crate::memory::artifact::{ArtifactMeta, NS_EXECUTION};
use crate::memory::MemoryStore;
use crate::planning::{NodeId, NodeStatus, TaskGraph, TaskNode};
use crate::policy::{Outcome, PlanAdmission, PolicyEngine};
use crate::tools::{FaultKind, Sandbox, ToolRegistry};

/// 单节点执行产出：结果 + 可能触发的 PolicyStop
struct NodeRun {
    result: ExecutionResult,
    stop: Option<String>,
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    sandbox: Sandbox,
    memory: Arc<dyn MemoryStore>,
    retries: u32,
}

fn skipped(node: &TaskNode, batch_index: usize, reason: impl Into<String>) -> ExecutionResult {
    let now = Utc::now();
    ExecutionResult {
        node_id: node.id.clone(),
        tool: node.tool.clone(),
        status: NodeStatus::Skipped,
        output: None,
        error: Some(reason.into()),
        started_at: now,
        finished_at: now,
        batch_index,
        attempts: 0,
        policy: None,
    }
}

fn is_open(status: NodeStatus) -> bool {
    matches!(status, NodeStatus::Pending | NodeStatus::Ready)
}

/// 级联跳过：依赖中有 Failed / Skipped 的待执行节点，直到不动点
fn cascade_skip(graph: &mut TaskGraph) -> Vec<(NodeId, String)> {
    let mut skipped = Vec::new();
    loop {
        let next: Vec<(NodeId, String)> = graph
            .nodes
            .values()
            .filter(|n| is_open(n.status))
            .filter_map(|n| {
                n.depends_on.iter().find_map(|d| match graph.nodes.get(d).map(|dep| dep.status) {
                    Some(NodeStatus::Failed) => Some((n.id.clone(), format!("dependency '{d}' failed"))),
                    Some(NodeStatus::Skipped) => Some((n.id.clone(), format!("dependency '{d}' skipped"))),
                    _ => None,
                })
            })
            .collect();
        if next.is_empty() {
            return skipped;
        }
        for (id, _) in &next {
            if let Some(node) = graph.nodes.get_mut(id) {
                node.status = NodeStatus::Skipped;
            }
        }
        skipped.extend(next);
    }
}

/// 就绪集：依赖全部 Done 的待执行节点，标记为 Ready 后返回
fn mark_ready(graph: &mut TaskGraph) -> Vec<NodeId> {
    let ready: Vec<NodeId> = graph
        .nodes
        .values()
        .filter(|n| is_open(n.status))
        .filter(|n| {
            n.depends_on
                .iter()
                .all(|d| graph.nodes.get(d).is_some_and(|dep| dep.status == NodeStatus::Done))
        })
        .map(|n| n.id.clone())
        .collect();
    for id in &ready {
        if let Some(node) = graph.nodes.get_mut(id) {
            node.status = NodeStatus::Ready;
        }
    }
    ready
}

impl Executor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        sandbox: Sandbox,
        memory: Arc<dyn MemoryStore>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            sandbox,
            memory,
            retries: config.retries,
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// 执行已准入的任务图；deadline 在批次之间检查
    pub async fn execute(
        &self,
        graph: &mut TaskGraph,
        admission: &PlanAdmission,
        meta: &ArtifactMeta,
        deadline: Option<Instant>,
    ) -> ExecutionTrace {
        let mut trace = ExecutionTrace::new(graph.metadata.version);
        let cancel = CancellationToken::new();

        if admission.is_rejected() {
            tracing::warn!(reasons = ?admission.decision.reasons, "plan rejected, nothing dispatched");
            trace.rejected = Some(admission.decision.clone());
            let reason = format!("policy_block:{}", admission.decision.reasons.join(","));
            self.skip_remaining(graph, &mut trace, Vec::new(), &reason);
        } else {
            self.walk(graph, admission, meta, deadline, &cancel, &mut trace).await;
        }

        // 无法到达的节点（依赖永远不会完成）
        self.skip_remaining(graph, &mut trace, Vec::new(), "unreachable");
        trace.finished_at = Utc::now();

        for result in &trace.results {
            meta.write(
                self.memory.as_ref(),
                NS_EXECUTION,
                serde_json::to_value(result).unwrap_or(Value::Null),
            );
        }
        meta.write(
            self.memory.as_ref(),
            NS_EXECUTION,
            json!({
                "trace": {
                    "graph_version": trace.graph_version,
                    "batches": trace.batches,
                    "done": trace.count(NodeStatus::Done),
                    "failed": trace.count(NodeStatus::Failed),
                    "skipped": trace.count(NodeStatus::Skipped),
                    "policy_stop": trace.policy_stop,
                    "timed_out": trace.timed_out,
                }
            }),
        );
        tracing::info!(
            version = trace.graph_version,
            batches = trace.batches.len(),
            done = trace.count(NodeStatus::Done),
            failed = trace.count(NodeStatus::Failed),
            skipped = trace.count(NodeStatus::Skipped),
            "graph walk finished"
        );
        trace
    }

    async fn walk(
        &self,
        graph: &mut TaskGraph,
        admission: &PlanAdmission,
        meta: &ArtifactMeta,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        trace: &mut ExecutionTrace,
    ) {
        loop {
            let mut cascaded = cascade_skip(graph);
            let ready = mark_ready(graph);
            if ready.is_empty() && cascaded.is_empty() {
                return;
            }

            let (serial, concurrent): (Vec<NodeId>, Vec<NodeId>) =
                ready.into_iter().partition(|id| admission.serial_nodes.contains(id));
            let mut groups: Vec<Vec<NodeId>> = Vec::new();
            if !concurrent.is_empty() {
                groups.push(concurrent);
            }
            groups.extend(serial.into_iter().map(|id| vec![id]));
            if groups.is_empty() {
                groups.push(Vec::new());
            }

            for group in groups {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tracing::warn!("deadline reached between batches");
                    trace.timed_out = true;
                    self.skip_remaining(graph, trace, cascaded, "deadline exceeded");
                    return;
                }

                let batch_index = trace.batches.len();
                let mut batch: Vec<NodeId> = Vec::new();
                for (id, reason) in cascaded.drain(..) {
                    if let Some(node) = graph.nodes.get(&id) {
                        trace.results.push(skipped(node, batch_index, reason));
                        batch.push(id);
                    }
                }

                let mut nodes = Vec::with_capacity(group.len());
                for id in &group {
                    if let Some(node) = graph.nodes.get_mut(id) {
                        node.status = NodeStatus::Running;
                        nodes.push(node.clone());
                    }
                }
                tracing::debug!(batch = batch_index, nodes = ?group, "batch dispatched");

                let semaphore = Semaphore::new(admission.parallelism.max(1));
                let runs = join_all(
                    nodes
                        .into_iter()
                        .map(|node| self.run_node(node, admission, meta, batch_index, cancel, &semaphore)),
                )
                .await;

                let mut stop = None;
                for run in runs {
                    if let Some(node) = graph.nodes.get_mut(&run.result.node_id) {
                        node.status = run.result.status;
                    }
                    batch.push(run.result.node_id.clone());
                    trace.results.push(run.result);
                    if stop.is_none() {
                        stop = run.stop;
                    }
                }
                trace.batches.push(batch);

                if let Some(reason) = stop {
                    tracing::warn!(reason = %reason, "policy stop, aborting remaining graph");
                    cancel.cancel();
                    trace.policy_stop = Some(reason.clone());
                    self.skip_remaining(graph, trace, Vec::new(), &format!("policy_stop:{reason}"));
                    return;
                }
            }
        }
    }

    async fn run_node(
        &self,
        node: TaskNode,
        admission: &PlanAdmission,
        meta: &ArtifactMeta,
        batch_index: usize,
        cancel: &CancellationToken,
        semaphore: &Semaphore,
    ) -> NodeRun {
        // Semaphore 不会被关闭
        let _permit = semaphore.acquire().await.ok();
        let mut result = ExecutionResult {
            node_id: node.id.clone(),
            tool: node.tool.clone(),
            status: NodeStatus::Failed,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            batch_index,
            attempts: 0,
            policy: None,
        };

        if cancel.is_cancelled() {
            return NodeRun {
                result: skipped(&node, batch_index, "cancelled by policy stop"),
                stop: None,
            };
        }

        if let Some(decision) = admission.blocked_nodes.get(&node.id) {
            result.error = Some(format!("policy_block:{}", decision.reasons.join(",")));
            result.policy = Some(decision.clone());
            result.finished_at = Utc::now();
            return NodeRun { result, stop: None };
        }

        let decision = match self.policy.admit_node(&node, meta).await {
            Ok(decision) => decision,
            Err(OrchestrationError::PolicyStop(reason)) => {
                cancel.cancel();
                return NodeRun {
                    result: skipped(&node, batch_index, format!("policy_stop:{reason}")),
                    stop: Some(reason),
                };
            }
            Err(e) => {
                result.error = Some(e.to_string());
                result.finished_at = Utc::now();
                return NodeRun { result, stop: None };
            }
        };
        if decision.is_block() {
            result.error = Some(format!("policy_block:{}", decision.reasons.join(",")));
            result.policy = Some(decision);
            result.finished_at = Utc::now();
            return NodeRun { result, stop: None };
        }

        let args = decision.rewritten_args.clone().unwrap_or_else(|| node.args.clone());
        if decision.outcome == Outcome::Rewrite {
            result.policy = Some(decision);
        }

        let (Some(tool), Some(schema)) = (self.registry.get(&node.tool), self.registry.schema(&node.tool)) else {
            result.error = Some(format!("tool '{}' is not registered", node.tool));
            result.finished_at = Utc::now();
            return NodeRun { result, stop: None };
        };

        result.started_at = Utc::now();
        loop {
            result.attempts += 1;
            match self.sandbox.execute(tool.clone(), &schema, args.clone(), cancel).await {
                Ok(output) => {
                    result.status = NodeStatus::Done;
                    result.output = Some(output);
                    result.error = None;
                    self.policy.record_outcome(true);
                    break;
                }
                Err(e) if e.kind == FaultKind::Cancelled => {
                    result.status = NodeStatus::Skipped;
                    result.error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    let retry = e.is_retryable() && result.attempts <= self.retries && !cancel.is_cancelled();
                    tracing::warn!(node = %node.id, tool = %node.tool, attempt = result.attempts, retry, error = %e, "node invocation failed");
                    result.error = Some(e.to_string());
                    if !retry {
                        self.policy.record_outcome(false);
                        break;
                    }
                }
            }
        }
        result.finished_at = Utc::now();

        // 预算一旦突破立即取消同批仍在运行的兄弟节点
        let stop = self.policy.budget_breach();
        if stop.is_some() {
            cancel.cancel();
        }
        NodeRun { result, stop }
    }

    /// 所有未终结的节点标记为 Skipped，归入一个新批次
    fn skip_remaining(
        &self,
        graph: &mut TaskGraph,
        trace: &mut ExecutionTrace,
        already: Vec<(NodeId, String)>,
        reason: &str,
    ) {
        let batch_index = trace.batches.len();
        let mut batch = Vec::new();
        for (id, why) in already {
            if let Some(node) = graph.nodes.get(&id) {
                trace.results.push(skipped(node, batch_index, why));
                batch.push(id);
            }
        }
        for node in graph.nodes.values_mut() {
            if node.status.is_terminal() {
                continue;
            }
            node.status = NodeStatus::Skipped;
            trace.results.push(skipped(node, batch_index, reason));
            batch.push(node.id.clone());
        }
        if !batch.is_empty() {
            trace.batches.push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::memory::NoopMemory;
    use crate::planning::TaskGraphBuilder;
    use crate::tools::{EchoTool, Tool, ToolSchema};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for Counting {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(self.name, "1.0.0")
                .description("counts invocations")
                .permission("respond")
                .capability(self.name)
        }

        async fn invoke(&self, _args: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                Err(format!("{} failed", self.name))
            } else {
                Ok(json!("ok"))
            }
        }
    }

    struct Sleeper {
        cancellable: bool,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for Sleeper {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("sleeper", "1.0.0")
                .description("sleeps before answering")
                .permission("respond")
                .capability("sleeper")
        }

        fn supports_cancellation(&self) -> bool {
            self.cancellable
        }

        async fn invoke(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(600)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(json!("slept"))
        }
    }

    struct Fixture {
        executor: Executor,
        policy: Arc<PolicyEngine>,
        build_calls: Arc<AtomicUsize>,
        deploy_calls: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn fixture(build_fails: bool, config: PolicyConfig, retries: u32) -> Fixture {
        fixture_with(build_fails, config, retries, |_| {})
    }

    fn fixture_with(
        build_fails: bool,
        config: PolicyConfig,
        retries: u32,
        extra: impl FnOnce(&ToolRegistry),
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let build_calls = Arc::new(AtomicUsize::new(0));
        let deploy_calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool).unwrap();
        registry
            .register(Counting {
                name: "build",
                calls: build_calls.clone(),
                fail: build_fails,
            })
            .unwrap();
        registry
            .register(Counting {
                name: "deploy",
                calls: deploy_calls.clone(),
                fail: false,
            })
            .unwrap();
        extra(registry.as_ref());
        let memory: Arc<dyn MemoryStore> = Arc::new(NoopMemory);
        let policy = Arc::new(PolicyEngine::new(config, registry.clone(), memory.clone(), dir.path()).unwrap());
        policy.begin_goal();
        let sandbox = Sandbox::new(dir.path(), Duration::from_secs(2));
        let executor = Executor::new(
            registry,
            policy.clone(),
            sandbox,
            memory,
            &ExecutorConfig {
                node_timeout_secs: 2,
                retries,
            },
        );
        Fixture {
            executor,
            policy,
            build_calls,
            deploy_calls,
            _dir: dir,
        }
    }

    fn build_then_deploy() -> TaskGraph {
        TaskGraphBuilder::new("build then deploy")
            .node("build", "build", json!({}))
            .node("deploy", "deploy", json!({}))
            .sequential("build", "deploy")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_dependency_cascades_skip() {
        let f = fixture(true, PolicyConfig::default(), 0);
        let mut graph = build_then_deploy();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;

        assert_eq!(trace.batches, vec![vec!["build".to_string()], vec!["deploy".to_string()]]);
        assert_eq!(trace.result("build").unwrap().status, NodeStatus::Failed);
        assert_eq!(trace.result("deploy").unwrap().status, NodeStatus::Skipped);
        assert_eq!(trace.result("deploy").unwrap().batch_index, 1);
        assert_eq!(f.deploy_calls.load(Ordering::SeqCst), 0);
        assert_eq!(graph.get("deploy").unwrap().status, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_dependencies_finish_before_dependents_start() {
        let f = fixture(false, PolicyConfig::default(), 0);
        let mut graph = build_then_deploy();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        let build = trace.result("build").unwrap();
        let deploy = trace.result("deploy").unwrap();
        assert_eq!(deploy.status, NodeStatus::Done);
        assert!(deploy.started_at >= build.finished_at);
        assert!(graph.all_done());
    }

    #[tokio::test]
    async fn test_rerun_on_done_graph_invokes_nothing() {
        let f = fixture(false, PolicyConfig::default(), 0);
        let mut graph = build_then_deploy();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        assert_eq!(f.build_calls.load(Ordering::SeqCst), 1);

        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        assert!(trace.is_empty());
        assert!(trace.batches.is_empty());
        assert_eq!(f.build_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.deploy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_records_attempts() {
        let f = fixture(true, PolicyConfig::default(), 2);
        let mut graph = TaskGraphBuilder::new("build")
            .node("build", "build", json!({}))
            .build()
            .unwrap();
        let admission = PlanAdmission::permissive(4);
        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        assert_eq!(trace.result("build").unwrap().attempts, 3);
        assert_eq!(f.build_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_policy_stop_skips_remaining() {
        let config = PolicyConfig {
            max_consecutive_failures: 1,
            ..PolicyConfig::default()
        };
        let f = fixture(true, config, 0);
        let mut graph = TaskGraphBuilder::new("g")
            .node("build", "build", json!({}))
            .node("later", "echo", json!({"text": "after"}))
            .sequential("build", "later")
            .node("other", "deploy", json!({}))
            .sequential("build", "other")
            .build()
            .unwrap();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        assert_eq!(trace.policy_stop.as_deref(), Some("failure_budget_exceeded"));
        assert_eq!(trace.result("later").unwrap().status, NodeStatus::Skipped);
        assert_eq!(trace.result("other").unwrap().status, NodeStatus::Skipped);
        assert_eq!(trace.results.len(), 3);
        assert_eq!(f.deploy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_plan_dispatches_nothing() {
        let f = fixture(false, PolicyConfig::default(), 0);
        let mut graph = TaskGraphBuilder::new("g")
            .node("build", "build", json!({}))
            .node("x", "missing_tool", json!({}))
            .build()
            .unwrap();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        let trace = f.executor.execute(&mut graph, &admission, &ArtifactMeta::detached(), None).await;
        assert!(trace.rejected.is_some());
        assert_eq!(trace.count(NodeStatus::Skipped), 2);
        assert_eq!(f.build_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_everything() {
        let f = fixture(false, PolicyConfig::default(), 0);
        let mut graph = build_then_deploy();
        let admission = f.policy.admit_plan(&mut graph, &ArtifactMeta::detached());
        let trace = f
            .executor
            .execute(&mut graph, &admission, &ArtifactMeta::detached(), Some(Instant::now()))
            .await;
        assert!(trace.timed_out);
        assert_eq!(trace.count(NodeStatus::Skipped), 2);
        assert_eq!(f.build_calls.load(Ordering::SeqCst), 0);
    }

    fn stop_after_one_failure() -> PolicyConfig {
        PolicyConfig {
            max_consecutive_failures: 1,
            ..PolicyConfig::default()
        }
    }

    fn failing_build_beside_sleeper() -> TaskGraph {
        TaskGraphBuilder::new("build beside sleeper")
            .node("build", "build", json!({}))
            .node("slow", "sleeper", json!({}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_policy_stop_cancels_running_sibling() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let f = fixture_with(true, stop_after_one_failure(), 0, move |registry| {
            registry
                .register(Sleeper {
                    cancellable: true,
                    finished: flag,
                })
                .unwrap();
        });
        let mut graph = failing_build_beside_sleeper();
        let start = Instant::now();
        let trace = f
            .executor
            .execute(&mut graph, &PlanAdmission::permissive(4), &ArtifactMeta::detached(), None)
            .await;

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(trace.policy_stop.as_deref(), Some("failure_budget_exceeded"));
        assert_eq!(trace.batches.len(), 1);
        assert_eq!(trace.result("build").unwrap().status, NodeStatus::Failed);
        let slow = trace.result("slow").unwrap();
        assert_eq!(slow.status, NodeStatus::Skipped);
        assert!(slow.error.as_deref().unwrap().contains("Cancelled"));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_policy_stop_lets_uncancellable_sibling_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let f = fixture_with(true, stop_after_one_failure(), 0, move |registry| {
            registry
                .register(Sleeper {
                    cancellable: false,
                    finished: flag,
                })
                .unwrap();
        });
        let mut graph = failing_build_beside_sleeper();
        let trace = f
            .executor
            .execute(&mut graph, &PlanAdmission::permissive(4), &ArtifactMeta::detached(), None)
            .await;

        assert_eq!(trace.policy_stop.as_deref(), Some("failure_budget_exceeded"));
        assert_eq!(trace.result("slow").unwrap().status, NodeStatus::Done);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mark_ready_only_marks_satisfied_nodes() {
        let mut graph = build_then_deploy();
        assert_eq!(mark_ready(&mut graph), vec!["build".to_string()]);
        assert_eq!(graph.get("build").unwrap().status, NodeStatus::Ready);
        assert_eq!(graph.get("deploy").unwrap().status, NodeStatus::Pending);

        graph.nodes.get_mut("build").unwrap().status = NodeStatus::Done;
        assert_eq!(mark_ready(&mut graph), vec!["deploy".to_string()]);
        assert_eq!(graph.get("deploy").unwrap().status, NodeStatus::Ready);
    }
}

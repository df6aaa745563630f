//! 策略引擎：计划准入与节点准入两个检查点，外加滚动的运行时 / 连续失败预算
//!
//! 单次调用无状态（相同的图与工具集合得到相同的决策序列），预算与审计日志跨调用累积。
//! 所有决策按顺序进入审计日志，并写入记忆的 policy_events 命名空间。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;

use crate::config::{CollisionMode, PolicyConfig, WidthMode};
use crate::core::OrchestrationError;
use crate::memory::artifact::{ArtifactMeta, NS_POLICY};
use crate::memory::MemoryStore;
use crate::planning::{NodeId, TaskGraph, TaskNode};
use crate::policy::{ApprovalGate, Checkpoint, PlanAdmission, PolicyDecision};
use crate::tools::{resolve_within, ToolRegistry, ToolSchema};

pub const PERMISSION_DENIED: &str = "permission_denied";
pub const SCHEMA_MISSING: &str = "schema_missing";
pub const SCHEMA_INCOMPLETE: &str = "schema_incomplete";
pub const PARALLEL_LIMIT_EXCEEDED: &str = "parallel_limit_exceeded";
pub const NONDETERMINISTIC_SERIALIZED: &str = "nondeterministic_serialized";
pub const ARTIFACT_COLLISION: &str = "artifact_collision";
pub const UNSAFE_ARGUMENT: &str = "unsafe_argument";
pub const UNSAFE_PATH: &str = "unsafe_path";
pub const PARALLEL_FLAG_DISABLED: &str = "parallel_flag_disabled";
pub const CONFIRMATION_DENIED: &str = "confirmation_denied";
pub const CONFIRMATION_REQUIRED: &str = "confirmation_required";
pub const RUNTIME_BUDGET_EXCEEDED: &str = "runtime_budget_exceeded";
pub const FAILURE_BUDGET_EXCEEDED: &str = "failure_budget_exceeded";

/// 滚动预算
#[derive(Debug, Default)]
struct Budget {
    started: Option<Instant>,
    consecutive_failures: u32,
    /// 一旦突破即保持，直到下一个目标
    breached: Option<String>,
}

pub struct PolicyEngine {
    config: PolicyConfig,
    deny: Vec<Regex>,
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    sandbox_root: PathBuf,
    approvals: Arc<ApprovalGate>,
    budget: Mutex<Budget>,
    audit: RwLock<Vec<PolicyDecision>>,
}

impl PolicyEngine {
    pub fn new(
        config: PolicyConfig,
        registry: Arc<ToolRegistry>,
        memory: Arc<dyn MemoryStore>,
        sandbox_root: impl Into<PathBuf>,
    ) -> Result<Self, OrchestrationError> {
        let deny = config
            .deny_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| OrchestrationError::ConfigError(format!("deny pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sandbox_root = sandbox_root.into();
        let sandbox_root = sandbox_root.canonicalize().unwrap_or(sandbox_root);
        Ok(Self {
            config,
            deny,
            registry,
            memory,
            sandbox_root,
            approvals: Arc::new(ApprovalGate::new()),
            budget: Mutex::new(Budget::default()),
            audit: RwLock::new(Vec::new()),
        })
    }

    pub fn approvals(&self) -> Arc<ApprovalGate> {
        self.approvals.clone()
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// 新目标开始：重置预算与确认信号
    pub fn begin_goal(&self) {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner) = Budget {
            started: Some(Instant::now()),
            ..Budget::default()
        };
        self.approvals.clear();
    }

    /// 计划级准入；可能就地插入串行化边
    pub fn admit_plan(&self, graph: &mut TaskGraph, meta: &ArtifactMeta) -> PlanAdmission {
        let mut decisions = Vec::new();
        let mut blocked_nodes = BTreeMap::new();
        let mut serial_nodes = BTreeSet::new();
        let mut plan_blocks: BTreeSet<String> = BTreeSet::new();
        let mut plan_rewrites: BTreeSet<String> = BTreeSet::new();

        let mut schemas: BTreeMap<NodeId, ToolSchema> = BTreeMap::new();
        for node in graph.nodes.values() {
            let Some(schema) = self.registry.schema(&node.tool) else {
                plan_blocks.insert(SCHEMA_MISSING.to_string());
                continue;
            };
            if !schema.is_complete() {
                plan_blocks.insert(SCHEMA_INCOMPLETE.to_string());
                continue;
            }
            if let Some(denied) = self.denied_permissions(&schema) {
                let decision = PolicyDecision::block(
                    Checkpoint::Plan,
                    Some(node.id.as_str()),
                    vec![PERMISSION_DENIED.to_string()],
                );
                tracing::warn!(node = %node.id, tool = %node.tool, permissions = %denied, "permission outside allow-list");
                decisions.push(decision.clone());
                blocked_nodes.insert(node.id.clone(), decision);
            } else if !schema.deterministic {
                serial_nodes.insert(node.id.clone());
                decisions.push(PolicyDecision::rewrite(
                    Checkpoint::Plan,
                    Some(node.id.as_str()),
                    vec![NONDETERMINISTIC_SERIALIZED.to_string()],
                    None,
                ));
                plan_rewrites.insert(NONDETERMINISTIC_SERIALIZED.to_string());
            }
            schemas.insert(node.id.clone(), schema);
        }

        // 兄弟节点资源冲突：同一产出，或一方产出另一方消费，且互不可达
        let ids: Vec<NodeId> = graph.nodes.keys().cloned().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                if graph.has_path(a, b) || graph.has_path(b, a) {
                    continue;
                }
                let (na, nb) = (&graph.nodes[a], &graph.nodes[b]);
                if !collides(na, nb) {
                    continue;
                }
                match self.config.collision_mode {
                    CollisionMode::Serialize => {
                        if graph.add_edge(a, b) {
                            tracing::info!(from = %a, to = %b, "serializing edge inserted for artifact collision");
                            decisions.push(PolicyDecision::rewrite(
                                Checkpoint::Plan,
                                Some(b.as_str()),
                                vec![ARTIFACT_COLLISION.to_string()],
                                None,
                            ));
                            plan_rewrites.insert(ARTIFACT_COLLISION.to_string());
                        }
                    }
                    CollisionMode::Reject => {
                        plan_blocks.insert(ARTIFACT_COLLISION.to_string());
                    }
                }
            }
        }

        let width = graph.max_width();
        if width > self.config.max_parallel {
            match self.config.width_mode {
                WidthMode::Serialize => {
                    plan_rewrites.insert(PARALLEL_LIMIT_EXCEEDED.to_string());
                }
                WidthMode::Reject => {
                    plan_blocks.insert(PARALLEL_LIMIT_EXCEEDED.to_string());
                }
            }
        }

        let decision = if !plan_blocks.is_empty() {
            PolicyDecision::block(Checkpoint::Plan, None, plan_blocks.into_iter().collect())
        } else if !plan_rewrites.is_empty() {
            PolicyDecision::rewrite(Checkpoint::Plan, None, plan_rewrites.into_iter().collect(), None)
        } else {
            PolicyDecision::allow(Checkpoint::Plan, None)
        };
        decisions.push(decision.clone());

        tracing::info!(
            version = graph.metadata.version,
            outcome = ?decision.outcome,
            reasons = ?decision.reasons,
            width,
            "plan admission"
        );
        for d in &decisions {
            self.record(d, meta);
        }

        PlanAdmission {
            decision,
            blocked_nodes,
            parallelism: self.config.max_parallel.max(1),
            serial_nodes,
            decisions,
        }
    }

    /// 节点级准入；Err 表示预算突破（PolicyStop），执行器必须中止剩余图
    pub async fn admit_node(&self, node: &TaskNode, meta: &ArtifactMeta) -> Result<PolicyDecision, OrchestrationError> {
        if let Some(reason) = self.budget_breach() {
            let decision = PolicyDecision::block(Checkpoint::Node, Some(node.id.as_str()), vec![reason.clone()]);
            self.record(&decision, meta);
            return Err(OrchestrationError::PolicyStop(reason));
        }

        let decision = self.check_node(node).await;
        if decision.is_block() {
            tracing::warn!(node = %node.id, tool = %node.tool, reasons = ?decision.reasons, "node blocked");
        }
        self.record(&decision, meta);
        Ok(decision)
    }

    async fn check_node(&self, node: &TaskNode) -> PolicyDecision {
        let block = |reason: &str| PolicyDecision::block(Checkpoint::Node, Some(node.id.as_str()), vec![reason.to_string()]);

        let Some(schema) = self.registry.schema(&node.tool) else {
            return block(SCHEMA_MISSING);
        };
        if self.denied_permissions(&schema).is_some() {
            return block(PERMISSION_DENIED);
        }
        if self.has_unsafe_string(&node.args) {
            return block(UNSAFE_ARGUMENT);
        }
        if let Some(obj) = node.args.as_object() {
            let escapes = obj.iter().any(|(name, value)| {
                schema.is_path_arg(name)
                    && value
                        .as_str()
                        .is_some_and(|raw| resolve_within(&self.sandbox_root, raw).is_err())
            });
            if escapes {
                return block(UNSAFE_PATH);
            }
        }

        if schema.requires_confirmation || self.config.confirm_tools.iter().any(|t| *t == node.tool) {
            let timeout = Duration::from_millis(self.config.confirmation_timeout_ms);
            match self.approvals.wait(&node.id, timeout).await {
                Some(true) => {}
                Some(false) => return block(CONFIRMATION_DENIED),
                None => return block(CONFIRMATION_REQUIRED),
            }
        }

        // 请求的并行标志改写为关闭，而非整体拦截
        if node.args.get("parallel").and_then(Value::as_bool) == Some(true) {
            let mut args = node.args.clone();
            if let Some(obj) = args.as_object_mut() {
                obj.insert("parallel".to_string(), Value::Bool(false));
            }
            return PolicyDecision::rewrite(
                Checkpoint::Node,
                Some(node.id.as_str()),
                vec![PARALLEL_FLAG_DISABLED.to_string()],
                Some(args),
            );
        }
        PolicyDecision::allow(Checkpoint::Node, Some(node.id.as_str()))
    }

    /// 记录一次节点调用结果，更新连续失败计数
    pub fn record_outcome(&self, success: bool) {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        if success {
            budget.consecutive_failures = 0;
        } else {
            budget.consecutive_failures += 1;
        }
    }

    /// 预算是否已突破；突破后保持到下一个目标
    pub fn budget_breach(&self) -> Option<String> {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        if budget.breached.is_some() {
            return budget.breached.clone();
        }
        let runtime_exceeded = budget
            .started
            .is_some_and(|s| s.elapsed() >= Duration::from_secs(self.config.max_runtime_secs));
        let reason = if runtime_exceeded {
            Some(RUNTIME_BUDGET_EXCEEDED)
        } else if self.config.max_consecutive_failures > 0
            && budget.consecutive_failures >= self.config.max_consecutive_failures
        {
            Some(FAILURE_BUDGET_EXCEEDED)
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::warn!(reason, failures = budget.consecutive_failures, "policy budget breached");
            budget.breached = Some(reason.to_string());
        }
        budget.breached.clone()
    }

    /// 全部决策（按产生顺序）
    pub fn audit_log(&self) -> Vec<PolicyDecision> {
        self.audit.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, decision: &PolicyDecision, meta: &ArtifactMeta) {
        self.audit
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decision.clone());
        meta.write(
            self.memory.as_ref(),
            NS_POLICY,
            serde_json::to_value(decision).unwrap_or(Value::Null),
        );
    }

    fn denied_permissions(&self, schema: &ToolSchema) -> Option<String> {
        let denied: Vec<&str> = schema
            .permissions
            .iter()
            .filter(|p| !self.config.allowed_permissions.contains(p))
            .map(String::as_str)
            .collect();
        (!denied.is_empty()).then(|| denied.join(","))
    }

    fn has_unsafe_string(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.deny.iter().any(|re| re.is_match(s)),
            Value::Array(items) => items.iter().any(|v| self.has_unsafe_string(v)),
            Value::Object(obj) => obj.values().any(|v| self.has_unsafe_string(v)),
            _ => false,
        }
    }
}

fn collides(a: &TaskNode, b: &TaskNode) -> bool {
    !a.produces.is_disjoint(&b.produces)
        || !a.produces.is_disjoint(&b.consumes)
        || !a.consumes.is_disjoint(&b.produces)
}

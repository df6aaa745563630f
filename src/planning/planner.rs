//! 任务规划器：目标 -> 已校验的 TaskGraph
//!
//! 目标按连接词（then / and / 逗号 / 分号）拆成有序子目标，每个子目标按工具声明的能力标签匹配
//! （不做自由推断）；路径参数取子目标中的对象词，字符串参数取动词之后的剩余文本。
//! 写类工具的路径产出 `file:<path>` 资源、读类工具消费它，消费者依赖最近的前序产出者。
//! 组装后做环与悬空依赖校验；无子目标可映射或置信度低于下限时，输出调用默认无风险工具的单节点兜底图。
//! 连兜底都无法构造（默认工具未注册）才返回 PlanningFailure。

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::PlannerConfig;
use crate::core::OrchestrationError;
use crate::memory::artifact::{ArtifactMeta, NS_PLANS};
use crate::memory::MemoryStore;
use crate::planning::types::*;
use crate::reflection::PlanAdjustment;
use crate::tools::{ArgKind, ToolRegistry, ToolSchema};

/// 目标输入：自由文本或外部预制图，下游不区分
#[derive(Debug, Clone)]
pub enum Goal {
    Text(String),
    Graph(TaskGraph),
}

impl Goal {
    /// 用于日志、记忆检索与兜底参数的目标文本
    pub fn text(&self) -> String {
        match self {
            Goal::Text(text) => text.clone(),
            Goal::Graph(graph) if !graph.metadata.origin_goal.trim().is_empty() => {
                graph.metadata.origin_goal.clone()
            }
            Goal::Graph(_) => "external graph".to_string(),
        }
    }
}

impl From<&str> for Goal {
    fn from(text: &str) -> Self {
        Goal::Text(text.to_string())
    }
}

impl From<String> for Goal {
    fn from(text: String) -> Self {
        Goal::Text(text)
    }
}

impl From<TaskGraph> for Goal {
    fn from(graph: TaskGraph) -> Self {
        Goal::Graph(graph)
    }
}

/// 不作为路径对象的填充词
const FILLERS: &[&str] = &[
    "a", "an", "the", "file", "files", "dir", "directory", "folder", "to", "into", "from", "in", "of",
    "on", "for", "with", "please",
];

fn clause_splitter() -> Option<&'static Regex> {
    static SPLIT: OnceLock<Option<Regex>> = OnceLock::new();
    SPLIT
        .get_or_init(|| Regex::new(r"(?i)\s*(?:;|,|\bthen\b|\band\b)\s*").ok())
        .as_ref()
}

/// 拆分目标为有序子目标；分隔模式不可用时整个目标作为单一子目标
pub fn split_goal(goal: &str) -> Vec<String> {
    let clauses: Vec<&str> = match clause_splitter() {
        Some(re) => re.split(goal).collect(),
        None => vec![goal],
    };
    clauses
        .into_iter()
        .map(|c| c.trim().trim_end_matches('.').trim())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect()
}

fn clean_token(token: &str) -> &str {
    token.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == ',' || c == ':')
}

fn tag_matches(tag: &str, word: &str) -> bool {
    tag == word || tag.rsplit('.').next() == Some(word)
}

/// 能力匹配得分：命中的能力标签数
fn capability_score(schema: &ToolSchema, words: &[String]) -> usize {
    schema
        .capabilities
        .iter()
        .filter(|tag| words.iter().any(|w| tag_matches(tag, w)))
        .count()
}

/// 子目标映射到一个工具后的结果
struct MappedClause {
    schema: ToolSchema,
    args: Value,
}

/// 任务规划器
pub struct TaskPlanner {
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    config: PlannerConfig,
}

impl TaskPlanner {
    pub fn new(registry: Arc<ToolRegistry>, memory: Arc<dyn MemoryStore>, config: PlannerConfig) -> Self {
        Self {
            registry,
            memory,
            config,
        }
    }

    /// 生成版本为 version 的任务图；hints 为上一周期反思给出的调整
    pub fn plan(
        &self,
        goal: &Goal,
        version: u32,
        hints: &[PlanAdjustment],
        meta: &ArtifactMeta,
    ) -> Result<TaskGraph, OrchestrationError> {
        let goal_text = goal.text();
        let context = self.memory.get_context(&goal_text, self.config.context_top_k);
        let mut applied: BTreeSet<usize> = BTreeSet::new();

        let mut graph = match goal {
            Goal::Text(text) => self.plan_text(text, version, hints, &mut applied)?,
            Goal::Graph(external) => self.adopt(external, &goal_text, version)?,
        };
        if !context.is_empty() {
            graph
                .metadata
                .reasoning
                .push(format!("context: {} related records consulted", context.len()));
        }

        for (idx, hint) in hints.iter().enumerate() {
            if matches!(hint, PlanAdjustment::Serialize { .. }) && serialize_chain(&mut graph) {
                applied.insert(idx);
            }
            let label = hint.label();
            if applied.contains(&idx) {
                graph.metadata.reasoning.push(format!("hint applied: {label}"));
                graph.metadata.applied_hints.push(label);
            } else {
                graph.metadata.reasoning.push(format!("hint inapplicable: {label}"));
            }
        }

        tracing::info!(
            goal = %goal_text,
            version,
            nodes = graph.len(),
            fallback = graph.metadata.fallback,
            confidence = graph.metadata.confidence,
            "plan produced"
        );
        meta.write(
            self.memory.as_ref(),
            NS_PLANS,
            serde_json::to_value(&graph).unwrap_or(Value::Null),
        );
        Ok(graph)
    }

    fn plan_text(
        &self,
        text: &str,
        version: u32,
        hints: &[PlanAdjustment],
        applied: &mut BTreeSet<usize>,
    ) -> Result<TaskGraph, OrchestrationError> {
        let clauses = split_goal(text);
        let catalog = self.registry.catalog();
        let mut graph = TaskGraph::new(text, version);
        let mut order: Vec<NodeId> = Vec::new();
        let mut gaps = Vec::new();

        for (idx, clause) in clauses.iter().enumerate() {
            match self.map_clause(clause, &catalog, hints, applied) {
                Some(mapped) => {
                    let id = format!("task_{:02}_{}", idx + 1, mapped.schema.name);
                    let (consumes, produces) = resources(&mapped.schema, &mapped.args);
                    let mut node = TaskNode::new(id.clone(), mapped.schema.name.clone(), mapped.args)
                        .describe(clause.clone());
                    node.consumes = consumes;
                    node.produces = produces;
                    graph
                        .metadata
                        .reasoning
                        .push(format!("subgoal '{clause}' -> {}", mapped.schema.name));
                    if graph.insert(node).is_ok() {
                        order.push(id);
                    }
                }
                None => {
                    tracing::debug!(subgoal = %clause, "capability gap");
                    graph
                        .metadata
                        .reasoning
                        .push(format!("subgoal '{clause}' has no matching capability"));
                    gaps.push(clause.clone());
                }
            }
        }

        let confidence = if clauses.is_empty() {
            0.0
        } else {
            order.len() as f64 / clauses.len() as f64
        };
        if order.is_empty() || confidence < self.config.confidence_floor {
            let reason = format!(
                "decomposition confidence {confidence:.2} below floor {:.2} ({} of {} subgoals mapped)",
                self.config.confidence_floor,
                order.len(),
                clauses.len()
            );
            return self.fallback(text, version, reason, gaps, confidence);
        }

        // 消费者依赖最近的前序产出者
        for (pos, id) in order.iter().enumerate() {
            let consumes = graph.nodes[id].consumes.clone();
            for resource in consumes {
                let producer = order[..pos]
                    .iter()
                    .rev()
                    .find(|p| graph.nodes[*p].produces.contains(&resource))
                    .cloned();
                if let Some(producer) = producer {
                    graph.add_edge(&producer, id);
                }
            }
        }

        graph.metadata.confidence = confidence;
        graph.metadata.capability_gaps = gaps;
        if let Err(e) = graph.validate_against(&self.registry) {
            return self.fallback(text, version, format!("assembled graph rejected: {e}"), Vec::new(), 0.0);
        }
        Ok(graph)
    }

    /// 按能力标签挑选工具：得分高者优先，其次确定性工具，再按名称
    fn map_clause(
        &self,
        clause: &str,
        catalog: &[ToolSchema],
        hints: &[PlanAdjustment],
        applied: &mut BTreeSet<usize>,
    ) -> Option<MappedClause> {
        let words: Vec<String> = clause
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut candidates: Vec<(usize, &ToolSchema)> = Vec::new();
        for schema in catalog {
            let mut score = capability_score(schema, &words);
            if score == 0 {
                continue;
            }
            let mut avoided = false;
            for (idx, hint) in hints.iter().enumerate() {
                match hint {
                    PlanAdjustment::AvoidTool { tool, .. } if *tool == schema.name => {
                        avoided = true;
                        applied.insert(idx);
                    }
                    PlanAdjustment::PreferTool { tool, .. } if *tool == schema.name => {
                        score += 100;
                        applied.insert(idx);
                    }
                    _ => {}
                }
            }
            if !avoided {
                candidates.push((score, schema));
            }
        }
        candidates.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then(b.deterministic.cmp(&a.deterministic))
                .then(a.name.cmp(&b.name))
        });

        candidates.into_iter().find_map(|(_, schema)| {
            fill_args(schema, clause).ok().map(|args| MappedClause {
                schema: schema.clone(),
                args,
            })
        })
    }

    /// 外部预制图：校验通过则沿用（换上新版本号、状态归零），否则兜底
    fn adopt(&self, external: &TaskGraph, goal_text: &str, version: u32) -> Result<TaskGraph, OrchestrationError> {
        match external.validate_against(&self.registry) {
            Ok(()) => {
                let mut graph = external.clone();
                graph.reset_status();
                graph.metadata.version = version;
                graph.metadata.origin_goal = goal_text.to_string();
                graph.metadata.confidence = 1.0;
                graph.metadata.fallback = false;
                graph.metadata.applied_hints.clear();
                graph.metadata.reasoning.push("external graph accepted".to_string());
                Ok(graph)
            }
            Err(e) => {
                tracing::warn!(error = %e, "external graph rejected");
                self.fallback(goal_text, version, format!("external graph rejected: {e}"), Vec::new(), 0.0)
            }
        }
    }

    /// 单节点兜底图：调用默认无风险工具，保证前进
    fn fallback(
        &self,
        goal_text: &str,
        version: u32,
        reason: String,
        gaps: Vec<String>,
        confidence: f64,
    ) -> Result<TaskGraph, OrchestrationError> {
        let tool = &self.config.default_tool;
        let schema = self.registry.schema(tool).ok_or_else(|| {
            OrchestrationError::PlanningFailure(format!(
                "{reason}; default tool '{tool}' is not registered"
            ))
        })?;

        let mut args = Map::new();
        for name in schema.required_args() {
            let value = match schema.args.get(name).map(|s| s.kind) {
                Some(ArgKind::String) => Value::String(goal_text.to_string()),
                Some(ArgKind::Path) => Value::String(".".to_string()),
                _ => {
                    return Err(OrchestrationError::PlanningFailure(format!(
                        "{reason}; default tool '{tool}' requires non-text argument '{name}'"
                    )))
                }
            };
            args.insert(name.to_string(), value);
        }

        let mut graph = TaskGraph::new(goal_text, version);
        graph
            .insert(TaskNode::new(format!("fallback_{tool}"), tool.clone(), Value::Object(args)).describe(goal_text))
            .map_err(|e| OrchestrationError::PlanningFailure(e.to_string()))?;
        graph.metadata.fallback = true;
        graph.metadata.confidence = confidence;
        graph.metadata.capability_gaps = gaps;
        graph.metadata.reasoning.push(reason);
        graph.metadata.reasoning.push(format!("fallback to default tool '{tool}'"));
        Ok(graph)
    }
}

/// 按工具参数形状从子目标中填参；必填参数无法填出时返回 Err
fn fill_args(schema: &ToolSchema, clause: &str) -> Result<Value, String> {
    let tokens: Vec<&str> = clause.split_whitespace().map(clean_token).filter(|t| !t.is_empty()).collect();
    let verb_pos = tokens.iter().position(|t| {
        let lower = t.to_lowercase();
        schema.capabilities.iter().any(|tag| tag_matches(tag, &lower))
    });
    let rest: &[&str] = match verb_pos {
        Some(pos) => &tokens[pos + 1..],
        None => &tokens[..],
    };
    let object = rest
        .iter()
        .find(|t| t.contains('/') || (t.contains('.') && !t.ends_with('.')))
        .or_else(|| rest.iter().rev().find(|t| !FILLERS.contains(t)))
        .map(|t| t.to_string());
    let remainder = if rest.is_empty() {
        clause.to_string()
    } else {
        rest.join(" ")
    };

    let mut args = Map::new();
    for (name, spec) in &schema.args {
        if schema.is_path_arg(name) {
            match &object {
                Some(path) => {
                    args.insert(name.clone(), Value::String(path.clone()));
                }
                None if spec.required => return Err(format!("no path object for '{name}'")),
                None => {}
            }
            continue;
        }
        match spec.kind {
            ArgKind::String if spec.required => {
                args.insert(name.clone(), Value::String(remainder.clone()));
            }
            _ if spec.required => return Err(format!("cannot infer argument '{name}'")),
            _ => {}
        }
    }
    Ok(Value::Object(args))
}

/// 节点资源：schema 声明的静态资源 + 路径参数派生的 file:<path>
fn resources(schema: &ToolSchema, args: &Value) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut consumes: BTreeSet<String> = schema.consumes.iter().cloned().collect();
    let mut produces: BTreeSet<String> = schema.produces.iter().cloned().collect();
    let writes = schema.permissions.iter().any(|p| p == "write");
    let reads = schema.permissions.iter().any(|p| p == "read");
    if let Some(obj) = args.as_object() {
        for (name, value) in obj {
            let Some(path) = value.as_str() else { continue };
            if !schema.is_path_arg(name) {
                continue;
            }
            let resource = format!("file:{}", path.trim_start_matches("./"));
            if writes {
                produces.insert(resource);
            } else if reads {
                consumes.insert(resource);
            }
        }
    }
    (consumes, produces)
}

/// 按拓扑序把所有节点串成一条链；有新边加入或已是链时返回 true
fn serialize_chain(graph: &mut TaskGraph) -> bool {
    if graph.len() < 2 {
        return false;
    }
    let Ok(order) = graph.topological_order() else {
        return false;
    };
    for pair in order.windows(2) {
        if !graph.has_path(&pair[0], &pair[1]) {
            graph.add_edge(&pair[0], &pair[1]);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, NoopMemory};
    use crate::tools::{EchoTool, FsReadTool, FsWriteTool};
    use serde_json::json;

    fn planner(root: &std::path::Path) -> TaskPlanner {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool).unwrap();
        registry.register(FsWriteTool::new(root)).unwrap();
        registry.register(FsReadTool::new(root)).unwrap();
        TaskPlanner::new(registry, Arc::new(NoopMemory), PlannerConfig::default())
    }

    fn plan(planner: &TaskPlanner, goal: &str, hints: &[PlanAdjustment]) -> TaskGraph {
        planner
            .plan(&Goal::from(goal), 1, hints, &ArtifactMeta::detached())
            .unwrap()
    }

    #[test]
    fn test_split_goal() {
        assert_eq!(
            split_goal("write file A and write file B, then read file A; report done."),
            vec!["write file A", "write file B", "read file A", "report done"]
        );
        assert!(split_goal("  ,, ; ").is_empty());
    }

    #[test]
    fn test_clause_splitter_compiles() {
        assert!(clause_splitter().is_some());
        assert_eq!(split_goal("Write a.txt THEN read a.txt"), vec!["Write a.txt", "read a.txt"]);
    }

    #[test]
    fn test_single_write() {
        let dir = tempfile::tempdir().unwrap();
        let graph = plan(&planner(dir.path()), "write file A", &[]);
        assert_eq!(graph.len(), 1);
        let node = graph.nodes.values().next().unwrap();
        assert_eq!(node.tool, "fs_write");
        assert_eq!(node.args, json!({"path": "A"}));
        assert!(node.produces.contains("file:A"));
        assert!(!graph.metadata.fallback);
        assert_eq!(graph.metadata.confidence, 1.0);
    }

    #[test]
    fn test_independent_writes_have_no_edges() {
        let dir = tempfile::tempdir().unwrap();
        let graph = plan(&planner(dir.path()), "write file A and write file B", &[]);
        assert_eq!(graph.len(), 2);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.max_width(), 2);
    }

    #[test]
    fn test_reader_depends_on_writer() {
        let dir = tempfile::tempdir().unwrap();
        let graph = plan(&planner(dir.path()), "write notes/a.txt then read notes/a.txt", &[]);
        assert_eq!(graph.len(), 2);
        assert!(graph.has_path("task_01_fs_write", "task_02_fs_read"));
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_unmapped_goal_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let graph = plan(&planner(dir.path()), "dance wildly", &[]);
        assert!(graph.metadata.fallback);
        assert_eq!(graph.len(), 1);
        let node = graph.nodes.values().next().unwrap();
        assert_eq!(node.tool, "echo");
        assert_eq!(node.args, json!({"text": "dance wildly"}));
        assert_eq!(graph.metadata.capability_gaps, vec!["dance wildly".to_string()]);
    }

    #[test]
    fn test_planning_failure_without_default_tool() {
        let registry = Arc::new(ToolRegistry::new());
        let planner = TaskPlanner::new(registry, Arc::new(NoopMemory), PlannerConfig::default());
        let err = planner
            .plan(&Goal::from("anything"), 1, &[], &ArtifactMeta::detached())
            .unwrap_err();
        assert_eq!(err.code(), "planning_failure");
    }

    #[test]
    fn test_avoid_hint_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let hint = PlanAdjustment::AvoidTool {
            tool: "fs_write".into(),
            reason: "failed".into(),
        };
        let graph = plan(&planner(dir.path()), "write file A", &[hint.clone()]);
        assert!(graph.nodes.values().all(|n| n.tool != "fs_write"));
        assert_eq!(graph.metadata.applied_hints, vec![hint.label()]);
    }

    #[test]
    fn test_serialize_hint_chains_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let hint = PlanAdjustment::Serialize {
            reason: "collision".into(),
        };
        let graph = plan(&planner(dir.path()), "write file A and write file B", &[hint]);
        assert_eq!(graph.max_width(), 1);
        assert_eq!(graph.metadata.applied_hints.len(), 1);
    }

    #[test]
    fn test_invalid_external_graph_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let external = crate::planning::TaskGraphBuilder::new("cyclic")
            .node("a", "echo", json!({"text": "a"}))
            .node("b", "echo", json!({"text": "b"}))
            .sequential("a", "b")
            .sequential("b", "a")
            .build_unchecked();
        let graph = planner(dir.path())
            .plan(&Goal::Graph(external), 2, &[], &ArtifactMeta::detached())
            .unwrap();
        assert!(graph.metadata.fallback);
        assert_eq!(graph.metadata.version, 2);
    }

    #[test]
    fn test_plan_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool).unwrap();
        registry.register(FsWriteTool::new(dir.path())).unwrap();
        let memory = Arc::new(InMemoryStore::new());
        let planner = TaskPlanner::new(registry, memory.clone(), PlannerConfig::default());
        planner
            .plan(&Goal::from("write file A"), 1, &[], &ArtifactMeta::new("run", 1, 1))
            .unwrap();
        let plans = memory.namespace(NS_PLANS);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].payload["correlation_id"], "run");
    }
}

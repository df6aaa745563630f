//! 任务图构建器
//!
//! 提供流畅的 API 构建外部提交的预制任务图（跳过目标分解，直接交给自主循环）

use serde_json::Value;

use crate::planning::types::*;

/// 任务图构建器
pub struct TaskGraphBuilder {
    goal: String,
    version: u32,
    nodes: Vec<TaskNode>,
    reasoning: Vec<String>,
}

impl TaskGraphBuilder {
    /// 创建新的构建器
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            version: 1,
            nodes: Vec::new(),
            reasoning: Vec::new(),
        }
    }

    /// 设置计划版本
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// 添加节点
    pub fn node(mut self, id: impl Into<NodeId>, tool: impl Into<String>, args: Value) -> Self {
        self.nodes.push(TaskNode::new(id, tool, args));
        self
    }

    /// 添加已构造的节点（可携带资源声明）
    pub fn task(mut self, node: TaskNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// 设置顺序依赖：to 在 from 之后执行
    pub fn sequential(mut self, from: impl Into<NodeId>, to: &str) -> Self {
        let from = from.into();
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == to) {
            node.depends_on.insert(from);
        }
        self
    }

    /// 设置 AND 依赖（所有前置节点）
    pub fn depends_on_all(mut self, id: &str, deps: &[&str]) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
            node.depends_on.extend(deps.iter().map(|d| d.to_string()));
        }
        self
    }

    /// 追加推理说明
    pub fn note(mut self, text: impl Into<String>) -> Self {
        self.reasoning.push(text.into());
        self
    }

    /// 构建并做结构校验（重复 ID、悬空依赖、环）
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        let mut graph = TaskGraph::new(self.goal, self.version);
        graph.metadata.reasoning = self.reasoning;
        graph.metadata.confidence = 1.0;
        for node in self.nodes {
            graph.insert(node)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// 构建但不校验（用于构造非法图交给规划器兜底）
    pub fn build_unchecked(self) -> TaskGraph {
        let mut graph = TaskGraph::new(self.goal, self.version);
        graph.metadata.reasoning = self.reasoning;
        for node in self.nodes {
            graph.nodes.insert(node.id.clone(), node);
        }
        graph
    }
}

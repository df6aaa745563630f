//! 任务图操作：校验（悬空依赖 + DFS 三色环检测）、拓扑排序、可达性、宽度与结构签名

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::planning::types::*;
use crate::tools::ToolRegistry;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

impl TaskGraph {
    /// 创建空图
    pub fn new(origin_goal: impl Into<String>, version: u32) -> Self {
        Self {
            nodes: BTreeMap::new(),
            metadata: GraphMetadata {
                origin_goal: origin_goal.into(),
                version,
                ..GraphMetadata::default()
            },
        }
    }

    /// 插入节点，ID 重复时报错
    pub fn insert(&mut self, node: TaskNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 全部边 (from, to)：to 依赖 from
    pub fn edges(&self) -> BTreeSet<(NodeId, NodeId)> {
        self.nodes
            .values()
            .flat_map(|n| n.depends_on.iter().map(move |d| (d.clone(), n.id.clone())))
            .collect()
    }

    /// 直接依赖 id 的节点
    pub fn dependents(&self, id: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.contains(id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// 结构校验：所有依赖可解析，且无环
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            if let Some(missing) = node.depends_on.iter().find(|d| !self.nodes.contains_key(*d)) {
                return Err(GraphError::DanglingDependency {
                    node: node.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let mut colors: BTreeMap<&str, Color> =
            self.nodes.keys().map(|k| (k.as_str(), Color::White)).collect();
        for id in self.nodes.keys() {
            if colors.get(id.as_str()) == Some(&Color::White) {
                self.visit(id, &mut colors)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(&'a self, id: &'a str, colors: &mut BTreeMap<&'a str, Color>) -> Result<(), GraphError> {
        colors.insert(id, Color::Grey);
        if let Some(node) = self.nodes.get(id) {
            for dep in &node.depends_on {
                match colors.get(dep.as_str()).copied() {
                    Some(Color::Grey) => return Err(GraphError::CycleDetected(dep.clone())),
                    Some(Color::White) => self.visit(dep, colors)?,
                    _ => {}
                }
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    /// 结构校验 + 工具存在性 + 必填参数形状
    pub fn validate_against(&self, registry: &ToolRegistry) -> Result<(), GraphError> {
        if self.is_empty() {
            return Err(GraphError::Empty);
        }
        self.validate()?;
        for node in self.nodes.values() {
            let schema = registry.schema(&node.tool).ok_or_else(|| GraphError::UnknownTool {
                node: node.id.clone(),
                tool: node.tool.clone(),
            })?;
            let problems = schema.check_args(&node.args);
            if !problems.is_empty() {
                return Err(GraphError::InvalidArgs {
                    node: node.id.clone(),
                    problems,
                });
            }
        }
        Ok(())
    }

    /// Kahn 拓扑排序（同层按 ID 排序）；有环时报错
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        self.validate()?;
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.id.as_str(), n.depends_on.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for node in self.nodes.values().filter(|n| n.depends_on.contains(id)) {
                if let Some(degree) = in_degree.get_mut(node.id.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(node.id.as_str());
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            let stuck = in_degree
                .into_iter()
                .find(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .unwrap_or_default();
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// to 是否（传递地）依赖 from
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![to];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for dep in &node.depends_on {
                    if dep == from {
                        return true;
                    }
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// 增加边 from -> to；会成环或节点不存在时返回 false
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if from == to || !self.nodes.contains_key(from) || self.has_path(to, from) {
            return false;
        }
        match self.nodes.get_mut(to) {
            Some(node) => node.depends_on.insert(from.to_string()),
            None => false,
        }
    }

    /// 各节点所在层（最长前驱链长度）
    pub fn levels(&self) -> BTreeMap<NodeId, usize> {
        let mut levels = BTreeMap::new();
        if let Ok(order) = self.topological_order() {
            for id in order {
                let level = self.nodes[&id]
                    .depends_on
                    .iter()
                    .filter_map(|d| levels.get(d).map(|l| l + 1))
                    .max()
                    .unwrap_or(0);
                levels.insert(id, level);
            }
        }
        levels
    }

    /// 最大并发分支宽度：同层节点数的最大值
    pub fn max_width(&self) -> usize {
        let mut per_level: BTreeMap<usize, usize> = BTreeMap::new();
        for level in self.levels().into_values() {
            *per_level.entry(level).or_default() += 1;
        }
        per_level.into_values().max().unwrap_or(0)
    }

    pub fn signature(&self) -> GraphSignature {
        GraphSignature {
            nodes: self
                .nodes
                .values()
                .map(|n| (n.id.clone(), n.tool.clone(), n.args.to_string()))
                .collect(),
            edges: self.edges(),
        }
    }

    pub fn all_done(&self) -> bool {
        self.nodes.values().all(|n| n.status == NodeStatus::Done)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    /// 所有节点重置为 Pending（外部提交的图重新执行前使用）
    pub fn reset_status(&mut self) {
        for node in self.nodes.values_mut() {
            node.status = NodeStatus::Pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(edges: &[(&str, &str)], ids: &[&str]) -> TaskGraph {
        let mut g = TaskGraph::new("test", 1);
        for id in ids {
            g.insert(TaskNode::new(*id, "echo", json!({"text": id}))).unwrap();
        }
        for (from, to) in edges {
            g.nodes.get_mut(*to).unwrap().depends_on.insert(from.to_string());
        }
        g
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut g = TaskGraph::new("g", 1);
        g.insert(TaskNode::new("a", "echo", json!({}))).unwrap();
        assert_eq!(
            g.insert(TaskNode::new("a", "echo", json!({}))),
            Err(GraphError::DuplicateNode("a".into()))
        );
    }

    #[test]
    fn test_dangling_dependency() {
        let g = graph(&[("ghost", "a")], &["a"]);
        assert!(matches!(g.validate(), Err(GraphError::DanglingDependency { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")], &["a", "b", "c"]);
        assert!(matches!(g.validate(), Err(GraphError::CycleDetected(_))));
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let g = graph(&[("a", "c"), ("b", "c"), ("c", "d")], &["d", "c", "b", "a"]);
        let order = g.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("c"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_has_path_and_add_edge() {
        let mut g = graph(&[("a", "b")], &["a", "b", "c"]);
        assert!(g.has_path("a", "b"));
        assert!(!g.has_path("b", "a"));
        assert!(!g.add_edge("b", "a"));
        assert!(g.add_edge("b", "c"));
        assert!(g.has_path("a", "c"));
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_width() {
        let g = graph(&[("a", "d")], &["a", "b", "c", "d"]);
        assert_eq!(g.max_width(), 3);
        assert_eq!(g.levels()["d"], 1);
    }

    #[test]
    fn test_signature_ignores_status_and_metadata() {
        let mut a = graph(&[("a", "b")], &["a", "b"]);
        let mut b = a.clone();
        b.metadata.version = 7;
        b.metadata.reasoning.push("different".into());
        b.nodes.get_mut("a").unwrap().status = NodeStatus::Done;
        assert_eq!(a.signature(), b.signature());
        a.nodes.get_mut("b").unwrap().args = json!({"text": "other"});
        assert_ne!(a.signature(), b.signature());
    }
}

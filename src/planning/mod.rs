//! 规划层：任务图（DAG）模型、构建器与基于能力标签的规划器

pub mod builder;
pub mod graph;
pub mod planner;
pub mod types;

pub use builder::TaskGraphBuilder;
pub use planner::{split_goal, Goal, TaskPlanner};
pub use types::{GraphError, GraphMetadata, GraphSignature, NodeId, NodeStatus, TaskGraph, TaskNode};

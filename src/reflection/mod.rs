//! 反思层：执行轨迹分析、问题分类与计划调整建议

pub mod engine;
pub mod types;

pub use engine::ReflectionEngine;
pub use types::{Issue, IssueKind, OperationalView, PlanAdjustment, Reflection, StrategicView};

//! Hive - Rust 自主任务图编排引擎
//!
//! 模块划分：
//! - **autonomy**: 有界自主循环（Planning -> Executing -> Reflecting -> Replanning / Halted）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复、状态投影、组件构建器
//! - **execution**: 依赖感知的并发执行器与执行轨迹
//! - **memory**: 记忆协作方契约、内存实现、JSONL 日志
//! - **observability**: tracing 初始化
//! - **planning**: 任务图模型、构建器、基于能力的规划器
//! - **policy**: 计划级 / 节点级准入、运行预算、人工确认
//! - **reflection**: 轨迹分析与计划调整建议
//! - **tools**: 工具契约、注册表、沙箱与内置工具

pub mod autonomy;
pub mod config;
pub mod core;
pub mod execution;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod policy;
pub mod reflection;
pub mod tools;

pub use autonomy::{AutonomyLoop, LoopEvent, RunBudget, RunReport};
pub use core::{HaltKind, HaltReason, HiveBuilder, LoopSnapshot, LoopState, OrchestrationError};
pub use planning::{Goal, TaskGraph, TaskGraphBuilder, TaskNode};

//! 执行层：依赖感知的并发执行器与执行轨迹

pub mod executor;
pub mod trace;

pub use executor::Executor;
pub use trace::{ExecutionResult, ExecutionTrace};

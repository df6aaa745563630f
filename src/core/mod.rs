//! 核心层：错误与恢复、循环状态投影、组件构建器

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::HiveBuilder;
pub use error::{OrchestrationError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{HaltKind, HaltReason, LoopSnapshot, LoopState};

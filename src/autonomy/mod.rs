//! 自主层：有界状态机循环、周期记录与展示层事件

pub mod events;
pub mod loop_;
pub mod record;

pub use events::LoopEvent;
pub use loop_::{AutonomyLoop, RunBudget};
pub use record::{AutonomyCycleRecord, RunReport};

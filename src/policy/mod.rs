//! 策略层：计划 / 节点两级准入、运行预算、人工确认闸门

pub mod approval;
pub mod decision;
pub mod engine;

pub use approval::ApprovalGate;
pub use decision::{Checkpoint, Outcome, PlanAdmission, PolicyDecision};
pub use engine::PolicyEngine;

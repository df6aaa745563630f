//! 展示层事件流（broadcast）；最新快照另走 watch 通道

use serde::Serialize;

use crate::core::HaltReason;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    StateChanged {
        correlation_id: String,
        from: String,
        to: String,
        cycle: u32,
    },
    PlanReady {
        correlation_id: String,
        version: u32,
        nodes: usize,
        fallback: bool,
    },
    TraceReady {
        correlation_id: String,
        version: u32,
        done: usize,
        failed: usize,
        skipped: usize,
    },
    ReflectionReady {
        correlation_id: String,
        cycle: u32,
        confidence: f64,
        issues: Vec<String>,
    },
    Halted {
        correlation_id: String,
        reason: HaltReason,
    },
}

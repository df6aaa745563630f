//! 错误恢复引擎
//!
//! 根据 OrchestrationError 类型返回 RecoveryAction：可恢复的错误记为反思问题（驱动重规划），
//! 不可恢复的错误直接给出终止原因。

use crate::core::{HaltReason, OrchestrationError, RecoveryAction};
use crate::reflection::IssueKind;

/// 错误到恢复动作的映射
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &OrchestrationError) -> RecoveryAction {
        match err {
            OrchestrationError::CapabilityGap(_) => RecoveryAction::RecordIssue(IssueKind::CapabilityGap),
            OrchestrationError::PolicyBlock { reasons } => {
                let reason = reasons.first().cloned().unwrap_or_else(|| "unspecified".to_string());
                RecoveryAction::RecordIssue(IssueKind::PolicyBlock(reason))
            }
            OrchestrationError::SandboxExecution { .. } => RecoveryAction::RecordIssue(IssueKind::ExecutionFailure),
            OrchestrationError::PolicyStop(reason) => RecoveryAction::Halt(HaltReason::policy_stop(reason)),
            OrchestrationError::Timeout(elapsed_ms) => RecoveryAction::Halt(HaltReason::timeout(*elapsed_ms)),
            OrchestrationError::RepeatPlanDetected(version) => RecoveryAction::Halt(HaltReason::failure(
                err.code(),
                format!("Plan version {version} is structurally identical to its predecessor; no progress possible"),
            )),
            OrchestrationError::PlanningFailure(_) | OrchestrationError::ConfigError(_) => {
                RecoveryAction::Halt(HaltReason::failure(err.code(), err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HaltKind;

    #[test]
    fn test_recoverable_errors_become_issues() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&OrchestrationError::CapabilityGap("sing a song".into()));
        assert!(matches!(action, RecoveryAction::RecordIssue(IssueKind::CapabilityGap)));

        let action = engine.handle(&OrchestrationError::PolicyBlock {
            reasons: vec!["permission_denied".into(), "unsafe_path".into()],
        });
        match action {
            RecoveryAction::RecordIssue(IssueKind::PolicyBlock(reason)) => assert_eq!(reason, "permission_denied"),
            other => panic!("expected policy block issue, got {other:?}"),
        }

        let action = engine.handle(&OrchestrationError::SandboxExecution {
            tool: "shell".into(),
            cause: "exit 1".into(),
        });
        assert!(matches!(action, RecoveryAction::RecordIssue(IssueKind::ExecutionFailure)));
    }

    #[test]
    fn test_policy_stop_and_timeout_halt() {
        let engine = RecoveryEngine::new();
        match engine.handle(&OrchestrationError::PolicyStop("runtime_budget_exceeded".into())) {
            RecoveryAction::Halt(reason) => {
                assert_eq!(reason.kind, HaltKind::PolicyStop);
                assert_eq!(reason.code, "policy_stop:runtime_budget_exceeded");
            }
            other => panic!("expected halt, got {other:?}"),
        }
        match engine.handle(&OrchestrationError::Timeout(1200)) {
            RecoveryAction::Halt(reason) => assert_eq!(reason.kind, HaltKind::Timeout),
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn test_repeat_plan_halts_with_stable_code() {
        let engine = RecoveryEngine::new();
        match engine.handle(&OrchestrationError::RepeatPlanDetected(3)) {
            RecoveryAction::Halt(reason) => {
                assert_eq!(reason.kind, HaltKind::Failure);
                assert_eq!(reason.code, "repeat_plan_detected");
                assert!(reason.summary.contains('3'));
            }
            other => panic!("expected halt, got {other:?}"),
        }
        match engine.handle(&OrchestrationError::PlanningFailure("no default tool".into())) {
            RecoveryAction::Halt(reason) => assert_eq!(reason.code, "planning_failure"),
            other => panic!("expected halt, got {other:?}"),
        }
    }
}

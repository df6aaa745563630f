//! 人工确认闸门
//!
//! 展示层唯一允许的写操作之一：对标记为需确认的节点发出 approve / deny。
//! 信号可在节点执行前预先给出；策略引擎在节点准入时等待，超时视为未确认。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Default)]
pub struct ApprovalGate {
    decisions: Mutex<HashMap<String, bool>>,
    notify: Notify,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, node_id: &str) {
        self.set(node_id, true);
    }

    pub fn deny(&self, node_id: &str) {
        self.set(node_id, false);
    }

    fn set(&self, node_id: &str, approved: bool) {
        tracing::info!(node = %node_id, approved, "confirmation signal");
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), approved);
        self.notify.notify_waiters();
    }

    /// 当前信号（不等待）
    pub fn lookup(&self, node_id: &str) -> Option<bool> {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .copied()
    }

    /// 等待 node_id 的信号；超时返回 None
    pub async fn wait(&self, node_id: &str, timeout: Duration) -> Option<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(decision) = self.lookup(node_id) {
                return Some(decision);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lookup(node_id);
            }
        }
    }

    /// 清除所有信号（新目标开始时）
    pub fn clear(&self) {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pre_approval() {
        let gate = ApprovalGate::new();
        gate.approve("n1");
        assert_eq!(gate.wait("n1", Duration::from_millis(10)).await, Some(true));
    }

    #[tokio::test]
    async fn test_timeout_without_signal() {
        let gate = ApprovalGate::new();
        assert_eq!(gate.wait("n1", Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_signal_while_waiting() {
        let gate = Arc::new(ApprovalGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait("n1", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.deny("n1");
        assert_eq!(waiter.await.unwrap(), Some(false));
    }
}

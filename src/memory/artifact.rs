//! 运行产物信封：计划、执行轨迹、反思、策略事件等持久化记录的统一形状
//!
//! 每条记录都带 namespace、timestamp、plan_version / cycle 与 correlation_id，
//! 同一次目标运行的全部记录可跨命名空间重建。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::memory::MemoryStore;

pub const NS_GOALS: &str = "goals";
pub const NS_PLANS: &str = "plans";
pub const NS_EXECUTION: &str = "execution";
pub const NS_REFLECTION: &str = "reflection";
pub const NS_POLICY: &str = "policy_events";
pub const NS_CYCLES: &str = "autonomy_cycles";

/// 一次目标运行内的关联元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub correlation_id: String,
    pub cycle: u32,
    pub plan_version: u32,
}

impl ArtifactMeta {
    pub fn new(correlation_id: impl Into<String>, cycle: u32, plan_version: u32) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            cycle,
            plan_version,
        }
    }

    /// 未绑定运行的记录（如单独调用执行器时）
    pub fn detached() -> Self {
        Self::new("detached", 0, 0)
    }

    /// 包装并写入记忆
    pub fn write(&self, memory: &dyn MemoryStore, namespace: &str, data: Value) {
        let timestamp = Utc::now();
        let payload = json!({
            "namespace": namespace,
            "timestamp": timestamp.to_rfc3339(),
            "correlation_id": self.correlation_id,
            "cycle": self.cycle,
            "plan_version": self.plan_version,
            "data": data,
        });
        memory.record(namespace, payload, timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn test_envelope_shape() {
        let store = InMemoryStore::new();
        let meta = ArtifactMeta::new("run-1", 2, 3);
        meta.write(&store, NS_PLANS, json!({"nodes": 1}));
        let recs = store.namespace(NS_PLANS);
        assert_eq!(recs.len(), 1);
        let p = &recs[0].payload;
        assert_eq!(p["correlation_id"], "run-1");
        assert_eq!(p["cycle"], 2);
        assert_eq!(p["plan_version"], 3);
        assert_eq!(p["namespace"], NS_PLANS);
        assert_eq!(p["data"]["nodes"], 1);
    }
}

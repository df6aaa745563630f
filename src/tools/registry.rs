//! 工具注册表
//!
//! 所有工具实现 Tool trait（schema / invoke），由 ToolRegistry 按名注册与查找。
//! 注册时校验 schema 完整性与名称唯一性；注册表显式构造、以 Arc 注入规划器、执行器与策略引擎，
//! 读多写少（RwLock），支持运行期动态注册。

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolSchema;

/// 工具 trait：能力契约 = schema() + invoke(args)
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具的声明式描述（注册时读取一次并冻结）
    fn schema(&self) -> ToolSchema;

    /// 是否支持协作式取消；不支持的工具在 PolicyStop 后仍运行到自身超时
    fn supports_cancellation(&self) -> bool {
        true
    }

    /// 执行工具
    async fn invoke(&self, args: Value) -> Result<Value, String>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Schema incomplete for tool '{tool}': missing {}", .missing.join(", "))]
    SchemaIncomplete { tool: String, missing: Vec<String> },

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),
}

struct RegisteredTool {
    schema: ToolSchema,
    tool: Arc<dyn Tool>,
}

/// 工具注册表：按名称存储 (ToolSchema, Arc<dyn Tool>)
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    /// 注册已包装的工具；运行期动态注册走同一校验
    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let schema = tool.schema();
        let missing = schema.missing_fields();
        if !missing.is_empty() {
            return Err(RegistryError::SchemaIncomplete {
                tool: schema.name.clone(),
                missing,
            });
        }
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&schema.name) {
            return Err(RegistryError::DuplicateTool(schema.name));
        }
        tracing::info!(tool = %schema.name, version = %schema.version, "tool registered");
        tools.insert(schema.name.clone(), RegisteredTool { schema, tool });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|t| t.tool.clone())
    }

    pub fn schema(&self, name: &str) -> Option<ToolSchema> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|t| t.schema.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// 按名称排序的能力目录（仅 schema），供规划器匹配
    pub fn catalog(&self) -> Vec<ToolSchema> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.schema.clone())
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 能力目录 JSON（含参数形状），用于展示或导出
    pub fn to_catalog_json(&self) -> String {
        serde_json::to_string_pretty(&self.catalog()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ArgKind, ArgSpec, EchoTool};

    struct Incomplete;

    #[async_trait]
    impl Tool for Incomplete {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("broken", "1.0")
        }

        async fn invoke(&self, _args: Value) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.schema("echo").unwrap().permissions, vec!["respond"]);
        assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert_eq!(
            registry.register(EchoTool),
            Err(RegistryError::DuplicateTool("echo".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_incomplete_schema_rejected() {
        let registry = ToolRegistry::new();
        match registry.register(Incomplete) {
            Err(RegistryError::SchemaIncomplete { tool, missing }) => {
                assert_eq!(tool, "broken");
                assert!(missing.contains(&"version".to_string()));
                assert!(missing.contains(&"permissions".to_string()));
            }
            other => panic!("expected SchemaIncomplete, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dynamic_registration_through_shared_handle() {
        struct Late;

        #[async_trait]
        impl Tool for Late {
            fn schema(&self) -> ToolSchema {
                ToolSchema::new("late", "0.1.0")
                    .description("registered after startup")
                    .permission("read")
                    .arg("path", ArgSpec::required(ArgKind::Path))
            }

            async fn invoke(&self, _args: Value) -> Result<Value, String> {
                Ok(Value::Null)
            }
        }

        let registry = Arc::new(ToolRegistry::new());
        let shared = registry.clone();
        shared.register(Late).unwrap();
        assert!(registry.contains("late"));
        assert_eq!(registry.catalog().len(), 1);
    }
}

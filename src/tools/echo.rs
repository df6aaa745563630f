//! Echo 工具：无风险的默认能力（兜底计划使用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ArgKind, ArgSpec, Tool, ToolSchema};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("echo", "1.0.0")
            .description("Echo text back (no side effects). Args: {\"text\": \"message\"}")
            .permission("respond")
            .capability("respond")
            .capability("echo")
            .capability("report")
            .arg("text", ArgSpec::required(ArgKind::String).describe("text to echo"))
    }

    async fn invoke(&self, args: Value) -> Result<Value, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(Value::String(text.to_string()))
    }
}

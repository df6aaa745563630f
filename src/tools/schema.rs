//! 工具能力描述（ToolSchema）与完整性校验
//!
//! 注册表只接受完整的 schema：名称、semver 版本、描述、权限集合、参数形状；
//! 注册后不可变。JSON Schema 由 schemars 自动生成，供外部工具作者对照。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 参数类型；Path 类参数在沙箱中会被解析并校验不逃逸根目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Path,
    Number,
    Bool,
    Object,
    Array,
}

impl ArgKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::String | ArgKind::Path => value.is_string(),
            ArgKind::Number => value.is_number(),
            ArgKind::Bool => value.is_boolean(),
            ArgKind::Object => value.is_object(),
            ArgKind::Array => value.is_array(),
        }
    }
}

/// 单个参数的形状描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArgSpec {
    pub kind: ArgKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ArgSpec {
    pub fn required(kind: ArgKind) -> Self {
        Self {
            kind,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(kind: ArgKind) -> Self {
        Self {
            kind,
            required: false,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// 工具的声明式契约
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolSchema {
    /// 唯一名称（TaskNode.tool 引用它）
    pub name: String,
    /// semver，如 1.0.0
    pub version: String,
    pub description: String,
    /// 声明的权限（read / write / exec / respond ...），策略引擎按 allow-list 校验
    pub permissions: Vec<String>,
    /// 非确定性工具会被策略强制串行
    pub deterministic: bool,
    /// 参数形状：参数名 -> 类型与是否必填
    #[serde(default)]
    pub args: BTreeMap<String, ArgSpec>,
    /// 能力标签，规划器按标签匹配子目标（如 fs.write、respond）
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 声明消费的资源（规划器据此建立依赖边）
    #[serde(default)]
    pub consumes: Vec<String>,
    /// 声明产出的资源
    #[serde(default)]
    pub produces: Vec<String>,
    /// 执行前需要展示层显式批准
    #[serde(default)]
    pub requires_confirmation: bool,
}

fn is_semver(version: &str) -> bool {
    static SEMVER: OnceLock<Option<Regex>> = OnceLock::new();
    SEMVER
        .get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(version))
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            permissions: Vec::new(),
            deterministic: true,
            args: BTreeMap::new(),
            capabilities: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
            requires_confirmation: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn nondeterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub fn arg(mut self, name: impl Into<String>, spec: ArgSpec) -> Self {
        self.args.insert(name.into(), spec);
        self
    }

    pub fn capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn consumes(mut self, resource: impl Into<String>) -> Self {
        self.consumes.push(resource.into());
        self
    }

    pub fn produces(mut self, resource: impl Into<String>) -> Self {
        self.produces.push(resource.into());
        self
    }

    pub fn confirm(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// 返回缺失或非法的字段名列表；为空表示 schema 完整
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name".to_string());
        }
        if !is_semver(&self.version) {
            missing.push("version".to_string());
        }
        if self.description.trim().is_empty() {
            missing.push("description".to_string());
        }
        if self.permissions.is_empty() || self.permissions.iter().any(|p| p.trim().is_empty()) {
            missing.push("permissions".to_string());
        }
        if self.args.keys().any(|k| k.trim().is_empty()) {
            missing.push("args".to_string());
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// 必填参数名
    pub fn required_args(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }

    /// 是否为路径形参数：声明为 Path，或参数名本身是路径语义（path / file / dir / *_path）
    pub fn is_path_arg(&self, name: &str) -> bool {
        if let Some(spec) = self.args.get(name) {
            if spec.kind == ArgKind::Path {
                return true;
            }
        }
        matches!(name, "path" | "file" | "dir" | "cwd") || name.ends_with("_path")
    }

    /// 按参数形状校验一组参数：缺少必填项或类型不符时返回问题描述
    pub fn check_args(&self, args: &Value) -> Vec<String> {
        let mut problems = Vec::new();
        let Some(obj) = args.as_object() else {
            if self.required_args().next().is_some() {
                problems.push("arguments must be an object".to_string());
            }
            return problems;
        };
        for (name, spec) in &self.args {
            match obj.get(name) {
                None if spec.required => problems.push(format!("missing required argument '{name}'")),
                Some(value) if !spec.kind.accepts(value) => {
                    problems.push(format!("argument '{name}' is not of kind {:?}", spec.kind))
                }
                _ => {}
            }
        }
        problems
    }
}

/// 返回 ToolSchema 的 JSON Schema 字符串（外部能力注册时对照）
pub fn tool_schema_json() -> String {
    let schema = schema_for!(ToolSchema);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> ToolSchema {
        ToolSchema::new("fs_write", "1.0.0")
            .description("Write a file")
            .permission("write")
            .arg("path", ArgSpec::required(ArgKind::Path))
            .arg("content", ArgSpec::optional(ArgKind::String))
    }

    #[test]
    fn test_complete_schema_has_no_missing_fields() {
        assert!(complete().is_complete());
    }

    #[test]
    fn test_missing_fields_reported() {
        let schema = ToolSchema::new("", "v1");
        let missing = schema.missing_fields();
        assert!(missing.contains(&"name".to_string()));
        assert!(missing.contains(&"version".to_string()));
        assert!(missing.contains(&"description".to_string()));
        assert!(missing.contains(&"permissions".to_string()));
    }

    #[test]
    fn test_semver_pattern() {
        assert!(is_semver("1.2.3"));
        assert!(is_semver("10.0.42"));
        assert!(!is_semver("1.2"));
        assert!(!is_semver("v1.2.3"));
        assert!(!is_semver("1.2.3-beta"));
    }

    #[test]
    fn test_check_args() {
        let schema = complete();
        assert!(schema.check_args(&json!({"path": "a.txt"})).is_empty());
        assert_eq!(schema.check_args(&json!({})).len(), 1);
        assert_eq!(schema.check_args(&json!({"path": 3})).len(), 1);
    }

    #[test]
    fn test_path_arg_detection() {
        let schema = complete();
        assert!(schema.is_path_arg("path"));
        assert!(schema.is_path_arg("output_path"));
        assert!(!schema.is_path_arg("content"));
    }

    #[test]
    fn test_json_schema_mentions_fields() {
        let s = tool_schema_json();
        assert!(s.contains("permissions"));
        assert!(s.contains("deterministic"));
    }
}

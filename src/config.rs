//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__POLICY__MAX_PARALLEL=2`）。
//! 并行上限、成功置信度阈值等都是可调配置而非协议常量，默认值在此处与 default.toml 中一并记录。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub planner: PlannerConfig,
    pub policy: PolicyConfig,
    pub executor: ExecutorConfig,
    pub autonomy: AutonomyConfig,
    pub reflection: ReflectionConfig,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、沙箱根目录、记忆日志路径
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub sandbox_root: Option<PathBuf>,
    /// JSONL 记忆日志；未设置时只保存在内存
    pub journal_path: Option<PathBuf>,
}

impl AppSection {
    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// 兜底计划使用的无风险工具
    pub default_tool: String,
    /// 分解置信度下限，低于此值走兜底
    pub confidence_floor: f64,
    /// 规划时从记忆检索的上下文条数
    pub context_top_k: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_tool: "echo".to_string(),
            confidence_floor: 0.5,
            context_top_k: 5,
        }
    }
}

/// 并发宽度超限时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthMode {
    /// 超出上限的部分排队串行
    #[default]
    Serialize,
    Reject,
}

/// 兄弟节点资源冲突时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionMode {
    /// 插入串行化依赖边
    #[default]
    Serialize,
    Reject,
}

/// [policy] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// 允许的工具权限
    pub allowed_permissions: Vec<String>,
    /// 单批最大并发
    pub max_parallel: usize,
    pub width_mode: WidthMode,
    pub collision_mode: CollisionMode,
    /// 参数黑名单（正则，匹配任意字符串参数即拦截）
    pub deny_patterns: Vec<String>,
    /// 单个目标累计运行时间上限（秒）
    pub max_runtime_secs: u64,
    /// 连续节点失败上限
    pub max_consecutive_failures: u32,
    /// 额外要求人工确认的工具（除 schema 声明 requires_confirmation 的之外）
    pub confirm_tools: Vec<String>,
    /// 等待确认信号的时长（毫秒）
    pub confirmation_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_permissions: vec!["read".into(), "write".into(), "respond".into()],
            max_parallel: 4,
            width_mode: WidthMode::Serialize,
            collision_mode: CollisionMode::Serialize,
            deny_patterns: vec![
                r"rm\s+-(rf|fr)".into(),
                r"\bmkfs\b".into(),
                r"\bdd\s+if=".into(),
                r"chmod\s+777".into(),
                r"curl[^|]*\|\s*(ba)?sh".into(),
                r":\(\)\s*\{".into(),
            ],
            max_runtime_secs: 300,
            max_consecutive_failures: 5,
            confirm_tools: Vec::new(),
            confirmation_timeout_ms: 30_000,
        }
    }
}

/// [executor] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 单节点调用超时（秒）
    pub node_timeout_secs: u64,
    /// 工具报错 / panic 时的重试次数
    pub retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: 30,
            retries: 1,
        }
    }
}

/// [autonomy] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub max_cycles: u32,
    /// 整个目标的墙钟预算（秒）
    pub max_time_secs: u64,
    /// 反思置信度达到该值且无可修正问题即判定成功
    pub success_threshold: f64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            max_cycles: 3,
            max_time_secs: 600,
            success_threshold: 0.8,
        }
    }
}

/// [reflection] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// 同一工具在窗口内失败达到该次数记为 repeated_failure
    pub repeated_failure_threshold: u32,
    /// 参考的历史反思条数
    pub history_window: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            repeated_failure_threshold: 2,
            history_window: 5,
        }
    }
}

/// [tools] 段：内置工具开关
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 是否注册 shell 工具（需要 exec 权限与人工确认）
    pub enable_shell: bool,
    pub shell: ShellSection,
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep、cargo）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "cargo".into(),
            ],
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("policy.allowed_permissions")
            .with_list_parse_key("policy.confirm_tools")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.policy.max_parallel, 4);
        assert_eq!(cfg.autonomy.success_threshold, 0.8);
        assert_eq!(cfg.autonomy.max_cycles, 3);
        assert_eq!(cfg.planner.default_tool, "echo");
        assert!(!cfg.policy.allowed_permissions.contains(&"exec".to_string()));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[policy]\nmax_parallel = 2\ncollision_mode = \"reject\"\n[autonomy]\nmax_cycles = 1\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.policy.max_parallel, 2);
        assert_eq!(cfg.policy.collision_mode, CollisionMode::Reject);
        assert_eq!(cfg.autonomy.max_cycles, 1);
        assert_eq!(cfg.executor.retries, 1);
    }
}

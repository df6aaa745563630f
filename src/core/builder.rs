//! Hive 构建器：统一的组件初始化逻辑
//!
//! 从 AppConfig 构造注册表、记忆、策略引擎、规划器、执行器、反思引擎并组装成 AutonomyLoop。
//! 嵌入方可替换注册表 / 记忆、追加自定义工具或改写沙箱根目录。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::autonomy::AutonomyLoop;
use crate::config::AppConfig;
use crate::core::OrchestrationError;
use crate::execution::Executor;
use crate::memory::{InMemoryStore, Journal, MemoryStore};
use crate::planning::TaskPlanner;
use crate::policy::PolicyEngine;
use crate::reflection::ReflectionEngine;
use crate::tools::{EchoTool, FsListTool, FsReadTool, FsWriteTool, Sandbox, ShellTool, Tool, ToolRegistry};

/// 构建器：按配置组装自主循环
pub struct HiveBuilder {
    config: AppConfig,
    sandbox_root: Option<PathBuf>,
    registry: Option<Arc<ToolRegistry>>,
    memory: Option<Arc<dyn MemoryStore>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    builtin_tools: bool,
}

impl HiveBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            sandbox_root: None,
            registry: None,
            memory: None,
            extra_tools: Vec::new(),
            builtin_tools: true,
        }
    }

    /// 覆盖配置中的沙箱根目录
    pub fn sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = Some(root.into());
        self
    }

    /// 使用外部注册表（仍会注册内置工具，除非 with_builtin_tools(false)）
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// 追加一个自定义工具
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.push(Arc::new(tool));
        self
    }

    pub fn with_builtin_tools(mut self, enable: bool) -> Self {
        self.builtin_tools = enable;
        self
    }

    fn resolved_root(&self) -> PathBuf {
        self.sandbox_root
            .clone()
            .unwrap_or_else(|| self.config.app.sandbox_root())
    }

    /// 构建工具注册表：echo、fs_read、fs_list、fs_write，shell 需显式开启
    pub fn build_tool_registry(&self, root: &Path) -> Result<Arc<ToolRegistry>, OrchestrationError> {
        let registry = self.registry.clone().unwrap_or_default();
        let register = |tool: Arc<dyn Tool>| {
            registry
                .register_arc(tool)
                .map_err(|e| OrchestrationError::ConfigError(e.to_string()))
        };
        if self.builtin_tools {
            register(Arc::new(EchoTool))?;
            register(Arc::new(FsReadTool::new(root)))?;
            register(Arc::new(FsListTool::new(root)))?;
            register(Arc::new(FsWriteTool::new(root)))?;
            if self.config.tools.enable_shell {
                register(Arc::new(ShellTool::new(
                    self.config.tools.shell.allowed_commands.clone(),
                    root,
                )))?;
            }
        }
        for tool in &self.extra_tools {
            register(tool.clone())?;
        }
        Ok(registry)
    }

    /// 构建记忆：配置了 journal_path 时回放并持续追加
    pub fn build_memory(&self) -> Result<Arc<dyn MemoryStore>, OrchestrationError> {
        if let Some(memory) = &self.memory {
            return Ok(memory.clone());
        }
        match &self.config.app.journal_path {
            Some(path) => {
                let store = InMemoryStore::with_journal(Journal::new(path))
                    .map_err(|e| OrchestrationError::ConfigError(format!("journal {}: {e}", path.display())))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(InMemoryStore::new())),
        }
    }

    pub fn build(self) -> Result<AutonomyLoop, OrchestrationError> {
        let root = self.resolved_root();
        std::fs::create_dir_all(&root)
            .map_err(|e| OrchestrationError::ConfigError(format!("sandbox root {}: {e}", root.display())))?;

        let registry = self.build_tool_registry(&root)?;
        let memory = self.build_memory()?;
        let config = self.config;

        let policy = Arc::new(PolicyEngine::new(
            config.policy.clone(),
            registry.clone(),
            memory.clone(),
            root.clone(),
        )?);
        let planner = TaskPlanner::new(registry.clone(), memory.clone(), config.planner.clone());
        let sandbox = Sandbox::new(&root, Duration::from_secs(config.executor.node_timeout_secs.max(1)));
        let executor = Executor::new(
            registry.clone(),
            policy.clone(),
            sandbox,
            memory.clone(),
            &config.executor,
        );
        let reflection = ReflectionEngine::new(memory.clone(), config.reflection.clone());

        tracing::info!(
            root = %root.display(),
            tools = ?registry.tool_names(),
            max_cycles = config.autonomy.max_cycles,
            "hive assembled"
        );
        Ok(AutonomyLoop::new(
            planner,
            policy,
            executor,
            reflection,
            registry,
            memory,
            config.autonomy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_without_shell() {
        let dir = tempfile::tempdir().unwrap();
        let builder = HiveBuilder::new(AppConfig::default());
        let registry = builder.build_tool_registry(dir.path()).unwrap();
        assert_eq!(registry.tool_names(), vec!["echo", "fs_list", "fs_read", "fs_write"]);
    }

    #[test]
    fn test_shell_registered_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.tools.enable_shell = true;
        let registry = HiveBuilder::new(config)
            .build_tool_registry(dir.path())
            .unwrap();
        assert!(registry.contains("shell"));
    }

    #[test]
    fn test_duplicate_custom_tool_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = HiveBuilder::new(AppConfig::default())
            .tool(EchoTool)
            .build_tool_registry(dir.path());
        assert!(matches!(result, Err(OrchestrationError::ConfigError(_))));
    }

    #[test]
    fn test_build_creates_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sandbox");
        let hive = HiveBuilder::new(AppConfig::default())
            .sandbox_root(&root)
            .build()
            .unwrap();
        assert!(root.is_dir());
        assert_eq!(hive.registry().len(), 4);
    }
}

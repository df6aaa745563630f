//! 工具层：能力契约（Tool / ToolSchema）、注册表、沙箱与内置工具（echo、fs_*、shell）

pub mod echo;
pub mod filesystem;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod shell;

pub use echo::EchoTool;
pub use filesystem::{FsListTool, FsReadTool, FsWriteTool, SafeFs};
pub use registry::{RegistryError, Tool, ToolRegistry};
pub use sandbox::{resolve_within, FaultKind, Sandbox, SandboxExecutionError};
pub use schema::{tool_schema_json, ArgKind, ArgSpec, ToolSchema};
pub use shell::ShellTool;

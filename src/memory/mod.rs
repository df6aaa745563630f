//! 记忆层：上下文检索 / 追加写入契约（MemoryStore）、内存实现、JSONL 日志、运行产物信封

pub mod artifact;
pub mod journal;
pub mod store;

pub use artifact::ArtifactMeta;
pub use journal::Journal;
pub use store::{InMemoryStore, MemoryRecord, MemoryStore, NoopMemory, ScoredRecord};

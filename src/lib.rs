//! Hive - 控制器编排的多 Worker 问答系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 消息信封、查询状态机、错误分类
//! - **memory**: 类型化只追加记忆存储、特征哈希嵌入、融合检索、持久化
//! - **orchestrator**: 分类、记忆门控、计划、逐步执行、响应合成
//! - **workers**: Worker trait、注册表与执行器、内置研究 / 分析 Worker
//! - **observability**: tracing 初始化与 trace 渲染

pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod workers;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{HiveError, Result};
pub use crate::memory::MemoryStore;
pub use crate::orchestrator::{Controller, QueryOutcome, SharedController};

//! 错误类型
//!
//! 传播策略：Worker 级错误在 Controller 内被吸收（零置信度占位结果 + trace 记录）；
//! 记忆存储的结构性错误（格式错误的记录、按 id 查找失败）直接向调用方返回。

use thiserror::Error;

use crate::memory::RecordId;

/// 记忆存储错误：属于编程错误或调用方错误，不做降级
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Worker 调用失败（不可用 / 执行报错 / 超时），由 Controller 吸收
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Worker {worker} failed: {reason}")]
    Failed { worker: String, reason: String },

    #[error("Worker {worker} timed out after {secs}s")]
    TimedOut { worker: String, secs: u64 },
}

impl WorkerError {
    pub fn failed(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            worker: worker.into(),
            reason: reason.into(),
        }
    }
}

/// 配置加载 / 校验错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 库顶层错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Knowledge source parse error: {0}")]
    Knowledge(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, HiveError>;

//! 核心类型：消息信封、查询状态机、错误分类

pub mod error;
pub mod message;
pub mod state;

pub use error::{ConfigError, HiveError, MemoryError, Result, WorkerError};
pub use message::{
    AnalysisKind, DependencyResult, Finding, MemoryContext, Message, MessageBody, MessageId,
    QueryPayload, ResponsePayload, ResponseStatus, RetrievePayload, StepId, StorePayload,
    TaskPayload, WorkerOutput, CONTROLLER, MEMORY_STORE, USER,
};
pub use state::QueryState;

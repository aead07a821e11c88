//! Worker 层：注册表、带超时与审计的执行器、内置研究 / 分析 Worker

pub mod analysis;
pub mod executor;
pub mod knowledge;
pub mod registry;
pub mod research;

pub use analysis::AnalysisWorker;
pub use executor::WorkerExecutor;
pub use knowledge::{KnowledgeBase, KnowledgeEntry};
pub use registry::{Worker, WorkerRegistry};
pub use research::ResearchWorker;

/// 计划中研究 / 分析步骤使用的 Worker 名
pub const RESEARCH: &str = "research";
pub const ANALYSIS: &str = "analysis";

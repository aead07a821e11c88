//! 编排引擎：分类 → 记忆检查 → 计划 → 逐步执行 → 合成 → 写回记忆

pub mod classifier;
pub mod context;
pub mod controller;
pub mod planner;
pub mod shared;
pub mod synthesis;
pub mod trace;

pub use classifier::{Classification, ComplexityTier, CueConfig, QueryClassifier};
pub use context::{QueryContext, StepResult, StepStatus};
pub use controller::{Controller, QueryOutcome};
pub use planner::{AnalysisDetector, ExecutionPlan, GateDecision, MemoryGate, PlanStep, Planner, TopicExtractor};
pub use shared::SharedController;
pub use synthesis::{mean_confidence, SynthesizedResponse, Synthesizer};
pub use trace::{QueryTrace, TraceEvent, TraceRecord};

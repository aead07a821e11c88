//! 单次查询的上下文：分类、检索结果、各步骤结果、当前状态

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::{DependencyResult, QueryState, StepId, WorkerOutput};
use crate::memory::RetrievalHit;
use crate::orchestrator::classifier::{Classification, ComplexityTier};
use crate::orchestrator::trace::{QueryTrace, TraceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    /// 未派发：由记忆记录代替
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: StepId,
    pub worker: String,
    pub status: StepStatus,
    pub output: WorkerOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 只在一次 handle 调用内存活
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub classification: Classification,
    pub hits: Vec<RetrievalHit>,
    /// 最佳融合分；无命中时为 0
    pub memory_confidence: f64,
    results: BTreeMap<StepId, StepResult>,
    state: QueryState,
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            classification: Classification {
                tier: ComplexityTier::Medium,
                memory_only: false,
                matched_cue: None,
            },
            hits: Vec::new(),
            memory_confidence: 0.0,
            results: BTreeMap::new(),
            state: QueryState::Received,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn tier(&self) -> ComplexityTier {
        self.classification.tier
    }

    /// 迁移到下一状态并写入 trace
    pub fn advance(&mut self, next: QueryState, trace: &mut QueryTrace) {
        if !self.state.can_transition_to(&next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        tracing::debug!(from = %self.state, to = %next, "query state");
        trace.push(TraceEvent::StateTransition {
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    pub fn record(&mut self, result: StepResult) {
        self.results.insert(result.step, result);
    }

    pub fn result(&self, step: StepId) -> Option<&StepResult> {
        self.results.get(&step)
    }

    pub fn results(&self) -> impl Iterator<Item = &StepResult> {
        self.results.values()
    }

    /// 依赖步骤的结果（按步骤编号）；尚未产出结果的依赖不会出现
    pub fn dependency_results<'a>(
        &self,
        depends_on: impl IntoIterator<Item = &'a StepId>,
    ) -> Vec<DependencyResult> {
        depends_on
            .into_iter()
            .filter_map(|id| self.results.get(id))
            .map(|r| DependencyResult {
                step: r.step,
                worker: r.worker.clone(),
                output: r.output.clone(),
            })
            .collect()
    }

    /// 到目前为止所有步骤置信度的均值
    pub fn running_confidence(&self) -> f64 {
        crate::orchestrator::synthesis::mean_confidence(
            self.results.values().map(|r| r.output.confidence),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(step: usize, confidence: f64) -> StepResult {
        let mut output = WorkerOutput::empty("x");
        output.confidence = confidence;
        StepResult {
            step: StepId(step),
            worker: "research".into(),
            status: StepStatus::Completed,
            output,
            error: None,
        }
    }

    #[test]
    fn test_advance_records_transition() {
        let mut ctx = QueryContext::new("q");
        let mut trace = QueryTrace::new();
        ctx.advance(QueryState::Classified, &mut trace);
        assert_eq!(ctx.state(), QueryState::Classified);
        assert_eq!(trace.final_state(), Some(QueryState::Classified));
    }

    #[test]
    fn test_dependency_results_and_running_confidence() {
        let mut ctx = QueryContext::new("q");
        ctx.record(result(1, 0.9));
        ctx.record(result(2, 0.5));
        let deps = ctx.dependency_results(&[StepId(1), StepId(2), StepId(7)]);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].step, StepId(1));
        assert!((ctx.running_confidence() - 0.7).abs() < 1e-12);
    }
}

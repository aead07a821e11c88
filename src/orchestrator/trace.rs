//! 查询 trace：消息、分类、检索、状态迁移等全部以数据形式记录
//!
//! Controller 从不直接打印；渲染（日志 / JSON）由调用方决定，见 observability::log_trace。

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::{Message, QueryState, StepId};
use crate::memory::{RecordId, RecordKind, RetrievalHit};
use crate::orchestrator::classifier::ComplexityTier;
use crate::orchestrator::planner::{ExecutionPlan, GateDecision};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    QueryReceived {
        query: String,
    },
    StateTransition {
        from: QueryState,
        to: QueryState,
    },
    Classified {
        tier: ComplexityTier,
        memory_only: bool,
        matched_cue: Option<String>,
    },
    Retrieval {
        query: String,
        kinds: Vec<RecordKind>,
        top_k: usize,
        hits: Vec<RetrievalHit>,
        memory_confidence: f64,
    },
    Decision {
        decision: GateDecision,
        memory_confidence: f64,
    },
    PlanBuilt {
        plan: ExecutionPlan,
    },
    MessageSent {
        message: Message,
    },
    StepCompleted {
        step: StepId,
        worker: String,
        confidence: f64,
    },
    StepSkipped {
        step: StepId,
        reason: String,
    },
    StepFailed {
        step: StepId,
        worker: String,
        error: String,
        confidence: f64,
    },
    /// 每步之后到目前为止的平均置信度
    ConfidenceUpdated {
        step: StepId,
        running_confidence: f64,
    },
    MemoryStored {
        record_id: RecordId,
        kind: RecordKind,
    },
    ResponseSynthesized {
        confidence: f64,
        sources: usize,
    },
}

impl TraceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::QueryReceived { .. } => "query_received",
            TraceEvent::StateTransition { .. } => "state_transition",
            TraceEvent::Classified { .. } => "classified",
            TraceEvent::Retrieval { .. } => "retrieval",
            TraceEvent::Decision { .. } => "decision",
            TraceEvent::PlanBuilt { .. } => "plan_built",
            TraceEvent::MessageSent { .. } => "message_sent",
            TraceEvent::StepCompleted { .. } => "step_completed",
            TraceEvent::StepSkipped { .. } => "step_skipped",
            TraceEvent::StepFailed { .. } => "step_failed",
            TraceEvent::ConfidenceUpdated { .. } => "confidence_updated",
            TraceEvent::MemoryStored { .. } => "memory_stored",
            TraceEvent::ResponseSynthesized { .. } => "response_synthesized",
        }
    }
}

/// 带序号与时间戳的一条 trace 记录
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub seq: usize,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// 单次查询的完整 trace
#[derive(Debug, Clone, Serialize)]
pub struct QueryTrace {
    pub query_id: Uuid,
    pub records: Vec<TraceRecord>,
}

impl QueryTrace {
    pub fn new() -> Self {
        Self {
            query_id: Uuid::new_v4(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.records.push(TraceRecord {
            seq: self.records.len(),
            at: Utc::now(),
            event,
        });
    }

    pub fn message(&mut self, message: Message) {
        self.push(TraceEvent::MessageSent { message });
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.records.iter().map(|r| &r.event)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.events().filter_map(|e| match e {
            TraceEvent::MessageSent { message } => Some(message),
            _ => None,
        })
    }

    /// 状态迁移序列（起始状态 + 每次迁移的目标）
    pub fn states(&self) -> Vec<QueryState> {
        let mut states = Vec::new();
        for event in self.events() {
            if let TraceEvent::StateTransition { from, to } = event {
                if states.is_empty() {
                    states.push(*from);
                }
                states.push(*to);
            }
        }
        states
    }

    pub fn final_state(&self) -> Option<QueryState> {
        self.states().last().copied()
    }

    /// (失败步骤, 记录的置信度)
    pub fn failed_steps(&self) -> Vec<(StepId, f64)> {
        self.events()
            .filter_map(|e| match e {
                TraceEvent::StepFailed {
                    step, confidence, ..
                } => Some((*step, *confidence)),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for QueryTrace {
    fn default() -> Self {
        Self::new()
    }
}

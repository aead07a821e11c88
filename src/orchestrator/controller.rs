//! Controller：单次查询的状态机
//!
//! Received → Classified → MemoryChecked → Planned → Executing(i) → Synthesizing → Stored → Done。
//! 步骤严格按计划顺序逐个同步派发；Worker 失败被吸收为零置信度占位结果，
//! 记忆存储的结构性错误直接返回给调用方。

use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::core::{
    ConfigError, Finding, HiveError, MemoryContext, Message, QueryState, ResponsePayload,
    ResponseStatus, Result, RetrievePayload, StorePayload, TaskPayload, WorkerOutput, CONTROLLER,
};
use crate::memory::{MemoryRecord, MemoryStore, NewRecord, RecordId, RecordKind, RecordMetadata, Retriever};
use crate::orchestrator::classifier::QueryClassifier;
use crate::orchestrator::context::{QueryContext, StepResult, StepStatus};
use crate::orchestrator::planner::{
    memory_context, AnalysisDetector, ExecutionPlan, GateDecision, MemoryGate, PlanStep, Planner,
    TopicExtractor,
};
use crate::orchestrator::synthesis::{mean_confidence, SynthesizedResponse, Synthesizer};
use crate::orchestrator::trace::{QueryTrace, TraceEvent};
use crate::workers::{AnalysisWorker, KnowledgeBase, ResearchWorker, WorkerExecutor, WorkerRegistry};

/// handle 的返回：响应 + 完整 trace + 本次使用的计划
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: SynthesizedResponse,
    pub trace: QueryTrace,
    pub plan: ExecutionPlan,
    /// 本次写入的记录
    pub stored: Vec<RecordId>,
}

pub struct Controller {
    classifier: QueryClassifier,
    planner: Planner,
    retriever: Retriever,
    synthesizer: Synthesizer,
    executor: WorkerExecutor,
    top_k: usize,
}

impl Controller {
    pub fn new(config: &AppConfig, registry: WorkerRegistry) -> Result<Self> {
        config.validate()?;
        let invalid = |e: regex::Error| HiveError::from(ConfigError::Invalid(e.to_string()));

        let gate = MemoryGate {
            high: config.orchestrator.high_confidence,
            min: config.orchestrator.min_confidence,
        };
        let planner = Planner::new(
            TopicExtractor::builtin(config.orchestrator.max_topics).map_err(invalid)?,
            AnalysisDetector::new(&config.classifier).map_err(invalid)?,
            gate,
        );
        Ok(Self {
            classifier: QueryClassifier::new(&config.classifier).map_err(invalid)?,
            planner,
            retriever: Retriever::new(config.retrieval.fusion_weights()),
            synthesizer: Synthesizer::new(config.retrieval.recall_floor),
            executor: WorkerExecutor::new(registry, config.orchestrator.worker_timeout_secs),
            top_k: config.retrieval.top_k,
        })
    }

    /// 注册内置研究 / 分析 Worker（知识源来自 config/knowledge.toml）
    pub fn with_builtin_workers(config: &AppConfig) -> Result<Self> {
        let mut registry = WorkerRegistry::new();
        registry.register(ResearchWorker::new(Arc::new(KnowledgeBase::builtin()?)));
        registry.register(AnalysisWorker::new());
        Self::new(config, registry)
    }

    pub fn registry(&self) -> &WorkerRegistry {
        self.executor.registry()
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    /// 处理一条查询；store 在整个调用期间独占借用
    pub async fn handle(&self, store: &mut MemoryStore, query: &str) -> Result<QueryOutcome> {
        let mut trace = QueryTrace::new();
        let mut ctx = QueryContext::new(query);
        tracing::info!(query_id = %trace.query_id, query = %query, "query received");
        trace.push(TraceEvent::QueryReceived {
            query: query.to_string(),
        });
        trace.message(Message::query(query));

        // Received → Classified
        ctx.classification = self.classifier.classify(query);
        trace.push(TraceEvent::Classified {
            tier: ctx.classification.tier,
            memory_only: ctx.classification.memory_only,
            matched_cue: ctx.classification.matched_cue.clone(),
        });
        ctx.advance(QueryState::Classified, &mut trace);

        // Classified → MemoryChecked → Planned
        let kinds = if ctx.classification.memory_only {
            vec![RecordKind::Conversation]
        } else {
            vec![RecordKind::Knowledge, RecordKind::Conversation]
        };
        trace.message(Message::retrieve(RetrievePayload {
            query: query.to_string(),
            kinds: kinds.clone(),
            top_k: self.top_k,
        }));
        let (plan, recalled) = {
            let hits = self.retriever.retrieve_where(
                store,
                query,
                Some(kinds.as_slice()),
                self.top_k,
                |r| !is_recalled_answer(r),
            );
            ctx.memory_confidence = hits.first().map(|h| h.fused_score).unwrap_or(0.0);
            ctx.hits = hits.iter().map(|h| h.to_hit()).collect();
            trace.push(TraceEvent::Retrieval {
                query: query.to_string(),
                kinds,
                top_k: self.top_k,
                hits: ctx.hits.clone(),
                memory_confidence: ctx.memory_confidence,
            });
            ctx.advance(QueryState::MemoryChecked, &mut trace);

            let decision = self
                .planner
                .gate()
                .decide(&ctx.classification, ctx.memory_confidence);
            tracing::debug!(
                decision = %decision,
                memory_confidence = ctx.memory_confidence,
                tier = %ctx.tier(),
                "memory gate"
            );
            trace.push(TraceEvent::Decision {
                decision,
                memory_confidence: ctx.memory_confidence,
            });

            let plan = self.planner.plan(query, &ctx.classification, decision, &hits);
            let recalled: Vec<MemoryContext> = hits.iter().map(memory_context).collect();
            (plan, recalled)
        };
        trace.push(TraceEvent::PlanBuilt { plan: plan.clone() });
        ctx.advance(QueryState::Planned, &mut trace);

        // Planned → Executing(i)
        for (i, step) in plan.steps.iter().enumerate() {
            ctx.advance(QueryState::Executing { step: i + 1 }, &mut trace);
            self.run_step(step, &plan, &mut ctx, &mut trace).await;
            trace.push(TraceEvent::ConfidenceUpdated {
                step: step.id,
                running_confidence: ctx.running_confidence(),
            });
        }

        // → Synthesizing
        ctx.advance(QueryState::Synthesizing, &mut trace);
        let response = if plan.decision.skips_workers() {
            self.synthesizer.from_memory(&ctx, plan.decision, &recalled)
        } else {
            self.synthesizer.from_steps(&ctx, &plan)
        };
        trace.push(TraceEvent::ResponseSynthesized {
            confidence: response.confidence,
            sources: response.sources.len(),
        });

        // Synthesizing → Stored → Done
        let stored = self.commit(store, &ctx, &plan, &response, &mut trace)?;
        ctx.advance(QueryState::Stored, &mut trace);
        ctx.advance(QueryState::Done, &mut trace);

        tracing::info!(
            query_id = %trace.query_id,
            tier = %response.tier,
            decision = %response.decision,
            steps = plan.len(),
            confidence = response.confidence,
            "query done"
        );
        Ok(QueryOutcome {
            response,
            trace,
            plan,
            stored,
        })
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        plan: &ExecutionPlan,
        ctx: &mut QueryContext,
        trace: &mut QueryTrace,
    ) {
        if let Some(reason) = &step.skip_reason {
            let output = step
                .covered_by
                .as_ref()
                .map(|m| memory_output(step, m))
                .unwrap_or_else(|| WorkerOutput::empty(reason.clone()));
            trace.push(TraceEvent::StepSkipped {
                step: step.id,
                reason: reason.clone(),
            });
            ctx.record(StepResult {
                step: step.id,
                worker: step.worker.clone(),
                status: StepStatus::Skipped,
                output,
                error: None,
            });
            return;
        }

        let payload = TaskPayload {
            step: step.id,
            query: ctx.query.clone(),
            task: step.task_description.clone(),
            topic: step.topic.clone(),
            analysis: step.analysis,
            dependencies: ctx.dependency_results(&step.depends_on),
            memory: if step.is_research() {
                None
            } else {
                plan.merged_memory.clone()
            },
        };
        trace.message(Message::task(step.worker.clone(), payload.clone()));

        let result = match self.executor.dispatch(&step.worker, &payload).await {
            Ok(output) => {
                trace.push(TraceEvent::StepCompleted {
                    step: step.id,
                    worker: step.worker.clone(),
                    confidence: output.confidence,
                });
                StepResult {
                    step: step.id,
                    worker: step.worker.clone(),
                    status: StepStatus::Completed,
                    output,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(step = %step.id, worker = %step.worker, error = %e, "step failed, continuing");
                trace.push(TraceEvent::StepFailed {
                    step: step.id,
                    worker: step.worker.clone(),
                    error: e.to_string(),
                    confidence: 0.0,
                });
                StepResult {
                    step: step.id,
                    worker: step.worker.clone(),
                    status: StepStatus::Failed,
                    output: WorkerOutput::empty(format!("{} produced no result", step.worker)),
                    error: Some(e.to_string()),
                }
            }
        };

        trace.message(Message::response(
            step.worker.clone(),
            ResponsePayload {
                step: step.id,
                status: match result.status {
                    StepStatus::Failed => ResponseStatus::Failed,
                    _ => ResponseStatus::Completed,
                },
                output: result.output.clone(),
                error: result.error.clone(),
            },
        ));
        ctx.record(result);
    }

    /// 写入 conversation、每条新颖 Worker 结果的 knowledge，以及每个被调用 Worker 一条 agent_state
    fn commit(
        &self,
        store: &mut MemoryStore,
        ctx: &QueryContext,
        plan: &ExecutionPlan,
        response: &SynthesizedResponse,
        trace: &mut QueryTrace,
    ) -> Result<Vec<RecordId>> {
        let mut stored = Vec::new();
        let topics: Vec<&str> = plan
            .research_steps()
            .filter_map(|s| s.topic.as_deref())
            .collect();

        let mut meta = RecordMetadata::default()
            .with_source_agent(CONTROLLER)
            .with_confidence(response.confidence)
            .with_extra("tier", response.tier.as_str())
            .with_extra("decision", response.decision.as_str());
        if let Some(topic) = topics.first() {
            meta = meta.with_topic(*topic);
        }
        let conversation = NewRecord::conversation(format!("Q: {}\nA: {}", ctx.query.trim(), response.text))
            .with_metadata(meta);
        stored.push(store_record(store, conversation, trace)?);

        for step in &plan.steps {
            let Some(result) = ctx.result(step.id) else {
                continue;
            };
            if result.status != StepStatus::Completed {
                continue;
            }
            for record in knowledge_records(step, &result.output, &topics) {
                let topic = record.metadata.topic.clone().unwrap_or_default();
                if store.has_knowledge(&topic, &record.content) {
                    continue;
                }
                stored.push(store_record(store, record, trace)?);
            }
        }

        // 每个被调用的 Worker 一条 agent_state，按首次调用顺序
        let mut invoked: Vec<(&str, Vec<&StepResult>)> = Vec::new();
        for result in ctx.results().filter(|r| r.status != StepStatus::Skipped) {
            match invoked.iter_mut().find(|(w, _)| *w == result.worker) {
                Some((_, results)) => results.push(result),
                None => invoked.push((result.worker.as_str(), vec![result])),
            }
        }
        for (worker, results) in invoked {
            let record = agent_state_record(worker, &results);
            stored.push(store_record(store, record, trace)?);
        }

        Ok(stored)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.executor.registry().worker_names())
            .field("top_k", &self.top_k)
            .finish()
    }
}

/// 被记忆覆盖的研究步骤：记忆记录即步骤结果
fn memory_output(step: &PlanStep, memory: &MemoryContext) -> WorkerOutput {
    let mut output = WorkerOutput::empty(format!("Recalled from {}", memory.record_id));
    output.findings = vec![Finding {
        topic: step.topic.clone().unwrap_or_default(),
        summary: memory.content.clone(),
        details: String::new(),
        source: memory.record_id.to_string(),
        confidence: memory.score,
    }];
    output.confidence = memory.score;
    output
}

/// 研究结论逐条成记录；分析结果整体成一条记录
fn knowledge_records(step: &PlanStep, output: &WorkerOutput, topics: &[&str]) -> Vec<NewRecord> {
    if step.is_research() {
        return output
            .findings
            .iter()
            .map(|f| {
                NewRecord::knowledge(f.summary.clone()).with_metadata(
                    RecordMetadata::default()
                        .with_topic(f.topic.clone())
                        .with_source_agent(step.worker.clone())
                        .with_source(f.source.clone())
                        .with_confidence(f.confidence)
                        .with_extra("step", step.id.to_string()),
                )
            })
            .collect();
    }
    if output.is_empty() {
        return Vec::new();
    }

    let mut content = output.summary.clone();
    for point in &output.points {
        content.push_str("\n- ");
        content.push_str(point);
    }
    if let Some(rec) = &output.recommendation {
        content.push('\n');
        content.push_str(rec);
    }
    let kind = output.analysis.or(step.analysis).map(|k| k.as_str()).unwrap_or("general");
    let topic = if topics.is_empty() {
        format!("{kind} analysis")
    } else {
        format!("{} ({kind})", topics.join(" / "))
    };
    vec![NewRecord::knowledge(content).with_metadata(
        RecordMetadata::default()
            .with_topic(topic)
            .with_source_agent(step.worker.clone())
            .with_source(step.worker.clone())
            .with_confidence(output.confidence)
            .with_extra("analysis", kind)
            .with_extra("step", step.id.to_string()),
    )]
}

/// 汇总一个 Worker 本次查询内的全部调用
fn agent_state_record(worker: &str, results: &[&StepResult]) -> NewRecord {
    let content = results
        .iter()
        .map(|r| match &r.error {
            Some(err) => format!("{} failed: {}", r.step, err),
            None => format!("{}: {}", r.step, r.output.summary),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let failed = results.iter().filter(|r| r.status == StepStatus::Failed).count();
    let status = match failed {
        0 => "completed",
        n if n == results.len() => "failed",
        _ => "partial",
    };
    let steps = results.iter().map(|r| r.step.to_string()).collect::<Vec<_>>().join(",");
    NewRecord::agent_state(content).with_metadata(
        RecordMetadata::default()
            .with_source_agent(worker)
            .with_confidence(mean_confidence(results.iter().map(|r| r.output.confidence)))
            .with_extra("steps", steps)
            .with_extra("status", status),
    )
}

/// 由记忆直接生成的回答；检索时排除，回答不会再引用回答
fn is_recalled_answer(record: &MemoryRecord) -> bool {
    record.kind == RecordKind::Conversation
        && record.metadata.extra.get("decision").is_some_and(|d| {
            d == GateDecision::MemoryOnly.as_str() || d == GateDecision::AnswerFromMemory.as_str()
        })
}

/// 写入一条记录并在 trace 中留下 store 消息
fn store_record(store: &mut MemoryStore, record: NewRecord, trace: &mut QueryTrace) -> Result<RecordId> {
    let kind = record.kind;
    let content = record.content.clone();
    let metadata = record.metadata.clone();
    let record_id = store.insert(record)?;
    trace.message(Message::store(StorePayload {
        record_id,
        kind,
        content,
        metadata,
    }));
    trace.push(TraceEvent::MemoryStored { record_id, kind });
    Ok(record_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepId;

    #[tokio::test]
    async fn test_simple_query_runs_to_done() {
        let controller = Controller::with_builtin_workers(&AppConfig::default()).unwrap();
        let mut store = MemoryStore::default();
        let outcome = controller
            .handle(&mut store, "What are the main types of neural networks?")
            .await
            .unwrap();
        assert_eq!(outcome.trace.final_state(), Some(QueryState::Done));
        assert_eq!(outcome.plan.decision, GateDecision::FullPipeline);
        assert_eq!(outcome.response.confidence, 0.95);
        // conversation + knowledge + agent_state
        assert_eq!(outcome.stored.len(), 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_findings_not_stored_twice() {
        let controller = Controller::with_builtin_workers(&AppConfig::default()).unwrap();
        let mut store = MemoryStore::default();
        controller.handle(&mut store, "Tell me about transformers").await.unwrap();
        controller.handle(&mut store, "Tell me about transformers").await.unwrap();
        assert_eq!(store.stats().knowledge_count, 1);
    }

    #[tokio::test]
    async fn test_agent_state_written_once_per_worker() {
        let controller = Controller::with_builtin_workers(&AppConfig::default()).unwrap();
        let mut store = MemoryStore::default();
        let outcome = controller.handle(&mut store, "Compare CNNs and RNNs").await.unwrap();
        assert_eq!(outcome.plan.research_steps().count(), 2);

        let kinds = [RecordKind::AgentState];
        let states: Vec<_> = store.all(Some(&kinds[..])).collect();
        assert_eq!(states.len(), 2);
        let research = states
            .iter()
            .find(|r| r.metadata.source_agent.as_deref() == Some("research"))
            .unwrap();
        assert_eq!(research.metadata.extra.get("steps").map(String::as_str), Some("step_1,step_2"));
        assert_eq!(research.metadata.extra.get("status").map(String::as_str), Some("completed"));
        assert!(research.content.contains("step_1: ") && research.content.contains("step_2: "));
        let confidence = research.metadata.confidence.unwrap();
        assert!((confidence - (0.91 + 0.89) / 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_running_confidence_traced_after_each_step() {
        let controller = Controller::with_builtin_workers(&AppConfig::default()).unwrap();
        let mut store = MemoryStore::default();
        let outcome = controller.handle(&mut store, "Compare CNNs and RNNs").await.unwrap();
        let running: Vec<(StepId, f64)> = outcome
            .trace
            .events()
            .filter_map(|e| match e {
                TraceEvent::ConfidenceUpdated { step, running_confidence } => {
                    Some((*step, *running_confidence))
                }
                _ => None,
            })
            .collect();
        assert_eq!(running.len(), outcome.plan.len());
        assert_eq!(running[0], (StepId(1), 0.91));
        assert!((running[1].1 - 0.90).abs() < 1e-9);
    }
}

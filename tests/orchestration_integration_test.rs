//! 编排引擎集成测试：场景、记忆门控、依赖顺序、降级

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use hive::config::AppConfig;
    use hive::core::{MessageBody, QueryState, StepId, TaskPayload, WorkerError, WorkerOutput};
    use hive::memory::{MemoryStore, NewRecord, RecordKind, RecordMetadata};
    use hive::orchestrator::{ComplexityTier, Controller, GateDecision, TraceEvent};
    use hive::workers::{KnowledgeBase, ResearchWorker, Worker, WorkerRegistry, ANALYSIS};

    fn controller() -> Controller {
        Controller::with_builtin_workers(&AppConfig::default()).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    struct BrokenAnalysis;

    #[async_trait]
    impl Worker for BrokenAnalysis {
        fn name(&self) -> &str {
            ANALYSIS
        }

        async fn invoke(&self, _task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
            Err(WorkerError::failed(ANALYSIS, "template engine crashed"))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Worker for Sleepy {
        fn name(&self) -> &str {
            "research"
        }

        async fn invoke(&self, _task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok(WorkerOutput::empty("too late"))
        }
    }

    #[tokio::test]
    async fn test_simple_query_single_research_step() {
        let mut store = MemoryStore::default();
        let outcome = controller()
            .handle(&mut store, "What are the main types of neural networks?")
            .await
            .unwrap();

        assert_eq!(outcome.response.tier, ComplexityTier::Simple);
        assert_eq!(outcome.plan.research_steps().count(), 1);
        assert!(outcome.plan.analysis_step().is_none());
        let step = &outcome.plan.steps[0];
        assert_eq!(step.topic.as_deref(), Some("neural networks"));

        let step_confidence = outcome
            .trace
            .events()
            .find_map(|e| match e {
                TraceEvent::StepCompleted { confidence, .. } => Some(*confidence),
                _ => None,
            })
            .unwrap();
        assert!(approx(outcome.response.confidence, step_confidence));
        assert!(outcome.response.text.contains("Neural networks are computing systems"));
    }

    #[tokio::test]
    async fn test_complex_comparison_query() {
        let mut store = MemoryStore::default();
        let outcome = controller()
            .handle(
                &mut store,
                "Compare CNNs and RNNs and recommend which is better for image processing",
            )
            .await
            .unwrap();

        assert_eq!(outcome.response.tier, ComplexityTier::Complex);
        let topics: Vec<_> = outcome
            .plan
            .research_steps()
            .map(|s| s.topic.clone().unwrap())
            .collect();
        assert_eq!(
            topics,
            vec!["convolutional neural networks", "recurrent neural networks"]
        );
        let analysis = outcome.plan.analysis_step().unwrap();
        assert_eq!(analysis.depends_on, BTreeSet::from([StepId(1), StepId(2)]));

        // 0.91 / 0.89 / 0.85 的算术平均
        assert!(approx(outcome.response.confidence, (0.91 + 0.89 + 0.85) / 3.0));
        assert!(outcome
            .response
            .text
            .contains("convolutional neural networks appears best suited"));
    }

    #[tokio::test]
    async fn test_memory_reference_answered_from_conversation() {
        let controller = controller();
        let mut store = MemoryStore::default();
        let first = controller
            .handle(&mut store, "What are the main types of neural networks?")
            .await
            .unwrap();
        let conversation_id = first.stored[0];
        assert_eq!(store.get_by_id(conversation_id).unwrap().kind, RecordKind::Conversation);

        let outcome = controller
            .handle(&mut store, "What did we discuss about neural networks earlier?")
            .await
            .unwrap();
        assert!(outcome.response.memory_only);
        assert_eq!(outcome.response.tier, ComplexityTier::Simple);
        assert_eq!(outcome.plan.decision, GateDecision::MemoryOnly);
        assert!(outcome.plan.is_empty());
        assert_eq!(outcome.response.sources, vec![conversation_id.to_string()]);
        assert!(outcome
            .response
            .text
            .contains("Q: What are the main types of neural networks?"));
        // 没有任何 task 消息
        assert!(outcome
            .trace
            .messages()
            .all(|m| !matches!(m.body(), MessageBody::Task(_))));
    }

    #[tokio::test]
    async fn test_repeated_memory_queries_stay_bounded() {
        let controller = controller();
        let mut store = MemoryStore::default();
        let first = controller
            .handle(&mut store, "What are the main types of neural networks?")
            .await
            .unwrap();
        let conversation_id = first.stored[0].to_string();

        let mut lengths = Vec::new();
        for _ in 0..12 {
            let outcome = controller
                .handle(&mut store, "What did we discuss about neural networks earlier?")
                .await
                .unwrap();
            assert_eq!(outcome.plan.decision, GateDecision::MemoryOnly);
            // 记忆回答本身不会被再次召回
            assert_eq!(outcome.response.sources, vec![conversation_id.clone()]);
            assert!(outcome.response.text.len() < 1000);
            lengths.push(outcome.response.text.len());
        }
        assert!(lengths.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_high_memory_confidence_skips_research_for_simple_query() {
        let mut store = MemoryStore::default();
        store
            .insert(NewRecord::knowledge("What is reinforcement learning?"))
            .unwrap();
        let outcome = controller()
            .handle(&mut store, "What is reinforcement learning?")
            .await
            .unwrap();

        assert_eq!(outcome.plan.decision, GateDecision::AnswerFromMemory);
        assert_eq!(outcome.plan.research_steps().count(), 0);
        assert!(outcome.response.confidence > 0.8);
        assert_eq!(outcome.trace.final_state(), Some(QueryState::Done));

        let controller = controller();
        for _ in 0..3 {
            let again = controller
                .handle(&mut store, "What is reinforcement learning?")
                .await
                .unwrap();
            assert_eq!(again.plan.decision, GateDecision::AnswerFromMemory);
            assert_eq!(again.response.text, outcome.response.text);
            assert_eq!(again.response.sources, outcome.response.sources);
        }
    }

    #[tokio::test]
    async fn test_merge_band_skips_covered_topic() {
        let mut store = MemoryStore::default();
        store
            .insert(
                NewRecord::knowledge("Compare transformers and reinforcement learning")
                    .with_metadata(RecordMetadata::default().with_topic("transformers")),
            )
            .unwrap();
        let outcome = controller()
            .handle(&mut store, "Compare transformers and reinforcement learning")
            .await
            .unwrap();

        assert_eq!(outcome.plan.decision, GateDecision::Merge);
        assert!(outcome.plan.merged_memory.is_some());
        assert!(outcome.plan.steps[0].is_skipped());
        assert!(outcome
            .trace
            .events()
            .any(|e| matches!(e, TraceEvent::StepSkipped { step, .. } if *step == StepId(1))));

        let dispatched: Vec<StepId> = outcome
            .trace
            .messages()
            .filter_map(|m| match m.body() {
                MessageBody::Task(t) => Some(t.step),
                _ => None,
            })
            .collect();
        assert_eq!(dispatched, vec![StepId(2), StepId(3)]);
    }

    #[tokio::test]
    async fn test_dependencies_precede_and_are_injected() {
        let mut store = MemoryStore::default();
        let outcome = controller()
            .handle(&mut store, "Compare transformers and RNNs")
            .await
            .unwrap();

        let tasks: Vec<TaskPayload> = outcome
            .trace
            .messages()
            .filter_map(|m| match m.body() {
                MessageBody::Task(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert!(outcome.plan.is_well_ordered());
        for (i, step) in outcome.plan.steps.iter().enumerate() {
            let task = tasks.iter().find(|t| t.step == step.id).unwrap();
            let injected: BTreeSet<StepId> = task.dependencies.iter().map(|d| d.step).collect();
            assert_eq!(injected, step.depends_on);
            for dep in &step.depends_on {
                let pos = outcome.plan.steps.iter().position(|s| s.id == *dep).unwrap();
                assert!(pos < i);
            }
        }
    }

    #[tokio::test]
    async fn test_failing_worker_degrades_gracefully() {
        let mut registry = WorkerRegistry::new();
        registry.register(ResearchWorker::new(Arc::new(KnowledgeBase::builtin().unwrap())));
        registry.register(BrokenAnalysis);
        let controller = Controller::new(&AppConfig::default(), registry).unwrap();

        let mut store = MemoryStore::default();
        let outcome = controller
            .handle(&mut store, "Compare CNNs and RNNs")
            .await
            .unwrap();

        assert_eq!(outcome.trace.final_state(), Some(QueryState::Done));
        assert_eq!(outcome.trace.failed_steps(), vec![(StepId(3), 0.0)]);
        assert_eq!(outcome.response.failed_steps, vec![StepId(3)]);
        assert!(approx(outcome.response.confidence, (0.91 + 0.89 + 0.0) / 3.0));
        // 失败的 Worker 也留下 agent_state 记录
        assert_eq!(store.stats().agent_state_count, 2);
    }

    #[tokio::test]
    async fn test_all_workers_missing_still_answers() {
        let controller = Controller::new(&AppConfig::default(), WorkerRegistry::new()).unwrap();
        let mut store = MemoryStore::default();
        let outcome = controller
            .handle(&mut store, "What is deep learning?")
            .await
            .unwrap();
        assert_eq!(outcome.trace.final_state(), Some(QueryState::Done));
        assert_eq!(outcome.response.confidence, 0.0);
        assert!(outcome.response.text.starts_with("I could not gather reliable information"));
        assert_eq!(outcome.trace.failed_steps().len(), 1);
    }

    #[tokio::test]
    async fn test_worker_timeout_is_absorbed() {
        let mut registry = WorkerRegistry::new();
        registry.register(Sleepy);
        let mut config = AppConfig::default();
        config.orchestrator.worker_timeout_secs = 1;
        let controller = Controller::new(&config, registry).unwrap();

        let mut store = MemoryStore::default();
        let outcome = controller.handle(&mut store, "What is ML?").await.unwrap();
        let failed = outcome
            .trace
            .events()
            .find_map(|e| match e {
                TraceEvent::StepFailed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .unwrap();
        assert!(failed.contains("timed out"));
        assert_eq!(outcome.trace.final_state(), Some(QueryState::Done));
    }

    #[tokio::test]
    async fn test_trace_covers_every_message_type_and_state() {
        let mut store = MemoryStore::default();
        let outcome = controller()
            .handle(&mut store, "Explain transformers")
            .await
            .unwrap();

        let types: BTreeSet<&str> = outcome.trace.messages().map(|m| m.type_name()).collect();
        assert_eq!(
            types,
            BTreeSet::from(["query", "retrieve", "task", "response", "store"])
        );
        let states = outcome.trace.states();
        assert_eq!(states.first(), Some(&QueryState::Received));
        assert!(states.windows(2).all(|w| w[0].can_transition_to(&w[1])));
        assert!(outcome.trace.events().any(|e| matches!(e, TraceEvent::Classified { .. })));
        assert!(outcome.trace.events().any(|e| matches!(e, TraceEvent::Retrieval { .. })));
    }

    #[tokio::test]
    async fn test_store_phase_writes_provenance() {
        let mut store = MemoryStore::default();
        let outcome = controller()
            .handle(&mut store, "What is deep learning?")
            .await
            .unwrap();

        let kinds = [RecordKind::Knowledge];
        let knowledge: Vec<_> = store.all(Some(&kinds[..])).collect();
        assert_eq!(knowledge.len(), 1);
        let meta = &knowledge[0].metadata;
        assert_eq!(meta.topic.as_deref(), Some("deep learning"));
        assert_eq!(meta.source_agent.as_deref(), Some("research"));
        assert_eq!(meta.source.as_deref(), Some("Deep Learning Literature"));
        assert_eq!(meta.confidence, Some(0.94));

        let conversation = store.get_by_id(outcome.stored[0]).unwrap();
        assert!(conversation.content.starts_with("Q: What is deep learning?\nA: "));
        assert_eq!(conversation.metadata.source_agent.as_deref(), Some("controller"));
    }
}

//! 研究 Worker：按主题查询知识源，返回带出处的研究结论

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{TaskPayload, WorkerError, WorkerOutput};
use crate::workers::{KnowledgeBase, Worker, RESEARCH};

pub struct ResearchWorker {
    name: String,
    knowledge: Arc<KnowledgeBase>,
}

impl ResearchWorker {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self {
            name: RESEARCH.to_string(),
            knowledge,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Worker for ResearchWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[&'static str] {
        &["research", "lookup", "summarize"]
    }

    async fn invoke(&self, task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
        let topic = task.topic.as_deref().unwrap_or(&task.query);
        let findings = self.knowledge.lookup(topic);
        tracing::debug!(worker = %self.name, topic = %topic, findings = findings.len(), "research");

        let Some(best) = findings.first() else {
            return Ok(WorkerOutput::empty(format!("No information found for '{topic}'")));
        };
        let mut out = WorkerOutput::empty(format!(
            "Found {} result(s) for '{}'",
            findings.len(),
            topic
        ));
        out.confidence = best.confidence;
        out.findings = findings;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepId;

    fn task(topic: &str) -> TaskPayload {
        TaskPayload {
            step: StepId(1),
            query: format!("What are {topic}?"),
            task: format!("Research {topic}"),
            topic: Some(topic.to_string()),
            analysis: None,
            dependencies: vec![],
            memory: None,
        }
    }

    #[tokio::test]
    async fn test_research_known_topic() {
        let worker = ResearchWorker::new(Arc::new(KnowledgeBase::builtin().unwrap()));
        let out = worker.invoke(&task("recurrent neural networks")).await.unwrap();
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.confidence, 0.89);
        assert!(out.summary.contains("recurrent neural networks"));
    }

    #[tokio::test]
    async fn test_research_empty_knowledge_is_zero_confidence() {
        let worker = ResearchWorker::new(Arc::new(KnowledgeBase::from_toml_str("").unwrap()));
        let out = worker.invoke(&task("anything")).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(out.confidence, 0.0);
    }
}

//! Worker 注册表
//!
//! 所有 Worker 实现 Worker trait（name / capabilities / invoke），由 WorkerRegistry 按名注册与查找，
//! WorkerExecutor 在调用时加超时并统一转 WorkerError。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{TaskPayload, WorkerError, WorkerOutput};

/// Worker trait：名称、能力标签、异步执行一个 task
///
/// 「没有结果」应返回零置信度的 WorkerOutput，而不是 Err；Err 只表示调用本身失败。
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker 名称（消息中的 sender / recipient）
    fn name(&self) -> &str;

    /// 能力标签（research / compare / trade_offs ...）
    fn capabilities(&self) -> &[&'static str] {
        &[]
    }

    async fn invoke(&self, task: &TaskPayload) -> Result<WorkerOutput, WorkerError>;
}

/// Worker 注册表：按名称存储 Arc<dyn Worker>
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名注册会替换旧 Worker
    pub fn register(&mut self, worker: impl Worker + 'static) {
        self.register_arc(Arc::new(worker));
    }

    pub fn register_arc(&mut self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        if self.workers.insert(name.clone(), worker).is_some() {
            tracing::warn!(worker = %name, "worker replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub async fn invoke(&self, name: &str, task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
        let worker = self
            .get(name)
            .ok_or_else(|| WorkerError::Unavailable(name.to_string()))?;
        worker.invoke(task).await
    }

    /// 按名称排序
    pub fn worker_names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// (name, capabilities) 列表，用于 status 输出
    pub fn capabilities(&self) -> Vec<(String, Vec<&'static str>)> {
        self.workers
            .iter()
            .map(|(name, w)| (name.clone(), w.capabilities().to_vec()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.worker_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepId;

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> &[&'static str] {
            &["echo"]
        }

        async fn invoke(&self, task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
            let mut out = WorkerOutput::empty(task.task.clone());
            out.confidence = 1.0;
            Ok(out)
        }
    }

    fn task() -> TaskPayload {
        TaskPayload {
            step: StepId(1),
            query: "q".into(),
            task: "say hi".into(),
            topic: None,
            analysis: None,
            dependencies: vec![],
            memory: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = WorkerRegistry::new();
        registry.register(Echo);
        assert!(registry.contains("echo"));
        assert_eq!(registry.capabilities(), vec![("echo".to_string(), vec!["echo"])]);

        let out = registry.invoke("echo", &task()).await.unwrap();
        assert_eq!(out.summary, "say hi");
    }

    #[tokio::test]
    async fn test_unknown_worker_is_unavailable() {
        let registry = WorkerRegistry::new();
        let err = registry.invoke("ghost", &task()).await.unwrap_err();
        assert_eq!(err, WorkerError::Unavailable("ghost".into()));
    }
}

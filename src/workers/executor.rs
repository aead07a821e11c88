//! Worker 执行器
//!
//! 持有 WorkerRegistry 与单次调用超时，dispatch(worker, task) 在超时内调用 registry.invoke，
//! 超时转为 WorkerError::TimedOut；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{TaskPayload, WorkerError, WorkerOutput};
use crate::workers::WorkerRegistry;

/// Worker 执行器：对每次调用施加超时，并校验返回的置信度
#[derive(Debug, Clone)]
pub struct WorkerExecutor {
    registry: WorkerRegistry,
    timeout: Duration,
}

impl WorkerExecutor {
    pub fn new(registry: WorkerRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 调用指定 Worker；置信度非有限值视为失败，超出 [0,1] 时截断
    pub async fn dispatch(&self, worker: &str, task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
        let start = Instant::now();
        let result = match timeout(self.timeout, self.registry.invoke(worker, task)).await {
            Ok(inner) => inner.and_then(|out| checked(worker, out)),
            Err(_) => Err(WorkerError::TimedOut {
                worker: worker.to_string(),
                secs: self.timeout.as_secs(),
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(WorkerError::Unavailable(_)) => "unavailable",
            Err(WorkerError::Failed { .. }) => "error",
            Err(WorkerError::TimedOut { .. }) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "worker_audit",
            "worker": worker,
            "step": task.step.0,
            "ok": result.is_ok(),
            "outcome": outcome,
            "confidence": result.as_ref().map(|o| o.confidence).unwrap_or(0.0),
            "duration_ms": start.elapsed().as_millis() as u64,
            "task_preview": preview(&task.task),
        });
        tracing::info!(audit = %audit, "worker");

        result
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn checked(worker: &str, mut out: WorkerOutput) -> Result<WorkerOutput, WorkerError> {
    if !out.confidence.is_finite() {
        return Err(WorkerError::failed(worker, "non-finite confidence"));
    }
    out.confidence = out.confidence.clamp(0.0, 1.0);
    Ok(out)
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepId;
    use crate::workers::Worker;
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Worker for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(WorkerOutput::empty("late"))
        }
    }

    struct Overconfident;

    #[async_trait]
    impl Worker for Overconfident {
        fn name(&self) -> &str {
            "overconfident"
        }

        async fn invoke(&self, _task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
            let mut out = WorkerOutput::empty("sure");
            out.confidence = 3.0;
            Ok(out)
        }
    }

    fn task() -> TaskPayload {
        TaskPayload {
            step: StepId(1),
            query: "q".into(),
            task: "t".into(),
            topic: None,
            analysis: None,
            dependencies: vec![],
            memory: None,
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timed_out() {
        let mut registry = WorkerRegistry::new();
        registry.register(Slow);
        let executor = WorkerExecutor::new(registry, 1);
        let err = executor.dispatch("slow", &task()).await.unwrap_err();
        assert_eq!(
            err,
            WorkerError::TimedOut {
                worker: "slow".into(),
                secs: 1
            }
        );
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let mut registry = WorkerRegistry::new();
        registry.register(Overconfident);
        let executor = WorkerExecutor::new(registry, 5);
        let out = executor.dispatch("overconfident", &task()).await.unwrap();
        assert_eq!(out.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_missing_worker() {
        let executor = WorkerExecutor::new(WorkerRegistry::new(), 5);
        let err = executor.dispatch("nobody", &task()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Unavailable(_)));
    }
}

//! 多调用方共享：存储放在 tokio Mutex 后面，整条查询期间持锁，
//! 并发查询因此按到达顺序串行执行，记忆写入与 trace 顺序保持确定。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::Result;
use crate::memory::{MemoryStats, MemoryStore};
use crate::orchestrator::controller::{Controller, QueryOutcome};

#[derive(Clone)]
pub struct SharedController {
    controller: Arc<Controller>,
    store: Arc<Mutex<MemoryStore>>,
}

impl SharedController {
    pub fn new(controller: Controller, store: MemoryStore) -> Self {
        Self {
            controller: Arc::new(controller),
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn handle(&self, query: &str) -> Result<QueryOutcome> {
        let mut store = self.store.lock().await;
        self.controller.handle(&mut store, query).await
    }

    pub async fn stats(&self) -> MemoryStats {
        self.store.lock().await.stats()
    }

    /// 在持锁状态下访问存储（保存快照等）
    pub async fn with_store<R>(&self, f: impl FnOnce(&MemoryStore) -> R) -> R {
        let store = self.store.lock().await;
        f(&store)
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_concurrent_queries_are_serialized() {
        let shared = SharedController::new(
            Controller::with_builtin_workers(&AppConfig::default()).unwrap(),
            MemoryStore::default(),
        );
        let handles: Vec<_> = ["What is deep learning?", "What is machine learning?", "What is RL?"]
            .into_iter()
            .map(|q| {
                let shared = shared.clone();
                tokio::spawn(async move { shared.handle(q).await.map(|o| o.stored) })
            })
            .collect();

        let mut all_ids = Vec::new();
        for h in handles {
            let stored = h.await.unwrap().unwrap();
            // 每次查询的记录 ID 连续：没有交错写入
            assert!(stored.windows(2).all(|w| w[1].0 == w[0].0 + 1));
            all_ids.extend(stored);
        }
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(shared.stats().await.total, all_ids.len());
        assert_eq!(shared.stats().await.conversation_count, 3);
    }
}

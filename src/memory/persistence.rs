//! 记忆持久化
//!
//! 将整个存储（记录 + 嵌入 + ID 计数器）写入 / 从 JSON 文件加载。
//! 嵌入原样保存，重新加载后检索行为与保存前一致。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::MemoryError;
use crate::memory::embedding::Embedder;
use crate::memory::record::MemoryRecord;
use crate::memory::store::MemoryStore;

const SNAPSHOT_VERSION: u32 = 1;

/// 存储快照：可序列化的完整记录列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub dimensions: usize,
    pub next_id: u64,
    pub records: Vec<MemoryRecord>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            dimensions: self.embedder().dimensions(),
            next_id: self.next_id(),
            records: self.records().to_vec(),
        }
    }

    /// 从快照恢复；嵌入维度必须与 embedder 一致
    pub fn restore(snapshot: StoreSnapshot, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        if snapshot.dimensions != embedder.dimensions() {
            return Err(MemoryError::DimensionMismatch {
                expected: embedder.dimensions(),
                found: snapshot.dimensions,
            });
        }
        MemoryStore::from_parts(snapshot.records, snapshot.next_id, embedder)
    }

    pub fn to_json(&self) -> Result<String, MemoryError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn from_json(data: &str, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        let snapshot: StoreSnapshot = serde_json::from_str(data)?;
        Self::restore(snapshot, embedder)
    }
}

/// 单文件 JSON 持久化
#[derive(Debug, Clone)]
pub struct StorePersistence {
    path: PathBuf,
}

impl StorePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回空存储
    pub fn load(&self, embedder: Arc<dyn Embedder>) -> Result<MemoryStore, MemoryError> {
        if !self.path.exists() {
            return Ok(MemoryStore::new(embedder));
        }
        let data = std::fs::read_to_string(&self.path)?;
        let store = MemoryStore::from_json(&data, embedder)?;
        tracing::info!(path = %self.path.display(), records = store.len(), "memory loaded");
        Ok(store)
    }

    /// 写入 JSON；父目录不存在时自动创建
    pub fn save(&self, store: &MemoryStore) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, store.to_json()?)?;
        tracing::debug!(path = %self.path.display(), records = store.len(), "memory saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HashEmbedder, NewRecord, RecordMetadata, Retriever};

    fn store_with_records() -> MemoryStore {
        let mut store = MemoryStore::default();
        store
            .insert(
                NewRecord::knowledge("Transformers rely on self-attention")
                    .with_metadata(RecordMetadata::default().with_topic("transformers").with_confidence(0.92)),
            )
            .unwrap();
        store.insert(NewRecord::conversation("Q: transformers?\nA: attention")).unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_retrieval() {
        let store = store_with_records();
        let json = store.to_json().unwrap();
        let restored = MemoryStore::from_json(&json, Arc::new(HashEmbedder::default())).unwrap();

        let retriever = Retriever::default();
        let before: Vec<_> = retriever
            .retrieve(&store, "self-attention transformers", None, 5)
            .iter()
            .map(|s| (s.record.id, s.fused_score))
            .collect();
        let after: Vec<_> = retriever
            .retrieve(&restored, "self-attention transformers", None, 5)
            .iter()
            .map(|s| (s.record.id, s.fused_score))
            .collect();
        assert_eq!(before.len(), after.len());
        for ((id_a, score_a), (id_b, score_b)) in before.iter().zip(after.iter()) {
            assert_eq!(id_a, id_b);
            assert!((score_a - score_b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_restored_store_continues_ids() {
        let store = store_with_records();
        let mut restored =
            MemoryStore::restore(store.snapshot(), Arc::new(HashEmbedder::default())).unwrap();
        let id = restored.insert(NewRecord::conversation("next")).unwrap();
        assert_eq!(id.0, 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = store_with_records();
        let err = MemoryStore::restore(store.snapshot(), Arc::new(HashEmbedder::new(8))).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { expected: 8, found: 384 }));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StorePersistence::new(dir.path().join("nested").join("memory.json"));

        let empty = persistence.load(Arc::new(HashEmbedder::default())).unwrap();
        assert!(empty.is_empty());

        let store = store_with_records();
        persistence.save(&store).unwrap();
        let loaded = persistence.load(Arc::new(HashEmbedder::default())).unwrap();
        assert_eq!(loaded.len(), store.len());
        for (a, b) in loaded.all(None).zip(store.all(None)) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.content, b.content);
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.embedding.len(), b.embedding.len());
        }
    }
}

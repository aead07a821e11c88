//! 记忆层：类型化只追加存储、特征哈希嵌入、融合检索、持久化

pub mod embedding;
pub mod persistence;
pub mod record;
pub mod retrieval;
pub mod store;
pub mod tokenizer;

pub use embedding::{Embedder, HashEmbedder};
pub use persistence::{StorePersistence, StoreSnapshot};
pub use record::{MemoryRecord, NewRecord, RecordId, RecordKind, RecordMetadata};
pub use retrieval::{FusionWeights, RetrievalHit, Retriever, ScoredRecord};
pub use store::{MemoryStats, MemoryStore};

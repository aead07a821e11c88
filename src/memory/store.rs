//! 记忆存储：按类型区分的只追加记录日志 + 每条记录的嵌入
//!
//! 没有 update / delete：新信息通过插入新记录「取代」旧记录，检索层在分数相同时优先最新记录。
//! 存储实例显式持有、按引用传递；写入需要 &mut，天然单写者。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::core::MemoryError;
use crate::memory::embedding::{Embedder, HashEmbedder};
use crate::memory::record::{MemoryRecord, NewRecord, RecordId, RecordKind};
use crate::memory::tokenizer;

/// 记忆统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub conversation_count: usize,
    pub knowledge_count: usize,
    pub agent_state_count: usize,
    /// 不同知识主题数
    pub knowledge_topics: usize,
    /// 有状态记录的不同 Worker 数
    pub agent_states: usize,
    pub total: usize,
}

const KNOWLEDGE: &[RecordKind] = &[RecordKind::Knowledge];

pub struct MemoryStore {
    records: Vec<MemoryRecord>,
    /// 与 records 一一对应的关键词集合（正文 ∪ 主题），由内容确定，可随时重建
    keywords: Vec<HashSet<String>>,
    index: HashMap<RecordId, usize>,
    next_id: u64,
    embedder: Arc<dyn Embedder>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            records: Vec::new(),
            keywords: Vec::new(),
            index: HashMap::new(),
            next_id: 0,
            embedder,
        }
    }

    /// 使用默认特征哈希嵌入
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self::new(Arc::new(HashEmbedder::new(dimensions)))
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// 用存储自身的嵌入器向量化文本（查询侧）
    pub fn embed(&self, text: &str) -> Vec<f32> {
        self.embedder.embed(text)
    }

    /// 追加一条记录，计算一次嵌入，返回新 ID
    pub fn insert(&mut self, record: NewRecord) -> Result<RecordId, MemoryError> {
        validate(&record)?;

        let embedding = self.embedder.embed(&record.embedding_text());
        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                found: embedding.len(),
            });
        }

        let id = RecordId(self.next_id);
        // 时间戳不早于上一条，保证「最新」与插入顺序一致
        let now = Utc::now();
        let timestamp = self
            .records
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);

        let stored = MemoryRecord {
            id,
            kind: record.kind,
            content: record.content,
            metadata: record.metadata,
            timestamp,
            embedding,
        };
        self.push(stored);
        self.next_id += 1;

        tracing::debug!(record = %id, kind = %record.kind, "memory insert");
        Ok(id)
    }

    fn push(&mut self, record: MemoryRecord) {
        self.keywords.push(keyword_set(&record));
        self.index.insert(record.id, self.records.len());
        self.records.push(record);
    }

    pub fn get_by_id(&self, id: RecordId) -> Result<&MemoryRecord, MemoryError> {
        self.index
            .get(&id)
            .map(|&i| &self.records[i])
            .ok_or(MemoryError::RecordNotFound(id))
    }

    /// 按类型过滤的惰性遍历；可重复调用，遍历期间内容不变（借用期间无法写入）
    pub fn all<'a>(
        &'a self,
        kinds: Option<&'a [RecordKind]>,
    ) -> impl Iterator<Item = &'a MemoryRecord> + 'a {
        self.records.iter().filter(move |r| r.kind.matches(kinds))
    }

    /// 检索用：记录 + 关键词集合
    pub(crate) fn entries<'a>(
        &'a self,
        kinds: Option<&'a [RecordKind]>,
    ) -> impl Iterator<Item = (&'a MemoryRecord, &'a HashSet<String>)> + 'a {
        self.records
            .iter()
            .zip(self.keywords.iter())
            .filter(move |(r, _)| r.kind.matches(kinds))
    }

    /// 是否已有同主题、同内容的知识记录（用于判断 Worker 结果是否新颖）
    pub fn has_knowledge(&self, topic: &str, content: &str) -> bool {
        self.all(Some(KNOWLEDGE))
            .any(|r| r.topic() == Some(topic) && r.content == content)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats::default();
        let mut topics = BTreeSet::new();
        let mut agents = BTreeSet::new();
        for r in &self.records {
            match r.kind {
                RecordKind::Conversation => stats.conversation_count += 1,
                RecordKind::Knowledge => {
                    stats.knowledge_count += 1;
                    if let Some(t) = r.topic() {
                        topics.insert(t);
                    }
                }
                RecordKind::AgentState => {
                    stats.agent_state_count += 1;
                    if let Some(a) = r.metadata.source_agent.as_deref() {
                        agents.insert(a);
                    }
                }
            }
        }
        stats.knowledge_topics = topics.len();
        stats.agent_states = agents.len();
        stats.total = self.records.len();
        stats
    }

    pub(crate) fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    /// 从已有记录重建（持久化恢复用）；嵌入原样保留，不重新计算
    pub(crate) fn from_parts(
        records: Vec<MemoryRecord>,
        next_id: u64,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, MemoryError> {
        let expected = embedder.dimensions();
        let mut store = Self::new(embedder);
        for record in records {
            if record.embedding.len() != expected {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    found: record.embedding.len(),
                });
            }
            if store.index.contains_key(&record.id) || record.id.0 >= next_id {
                return Err(MemoryError::MalformedRecord(format!(
                    "duplicate or out-of-range id {}",
                    record.id
                )));
            }
            store.push(record);
        }
        store.next_id = next_id;
        Ok(store)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_dimensions(HashEmbedder::DEFAULT_DIMENSIONS)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records.len())
            .field("next_id", &self.next_id)
            .field("dimensions", &self.embedder.dimensions())
            .finish()
    }
}

fn validate(record: &NewRecord) -> Result<(), MemoryError> {
    if record.content.trim().is_empty() {
        return Err(MemoryError::MalformedRecord(format!(
            "{} record with empty content",
            record.kind
        )));
    }
    if let Some(c) = record.metadata.confidence {
        if !c.is_finite() || !(0.0..=1.0).contains(&c) {
            return Err(MemoryError::MalformedRecord(format!(
                "confidence {c} outside [0, 1]"
            )));
        }
    }
    Ok(())
}

fn keyword_set(record: &MemoryRecord) -> HashSet<String> {
    let mut set = tokenizer::tokenize_to_set(&record.content);
    if let Some(topic) = record.topic() {
        set.extend(tokenizer::tokenize(topic));
    }
    set
}

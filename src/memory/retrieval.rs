//! 检索引擎：向量相似度 + 关键词重叠 → 加权融合排序
//!
//! fused = w_v * vector_similarity + w_k * keyword_overlap，权重为可调常量（默认 0.6 / 0.4）。
//! 结果按 fused 降序，分数相同时较新的记录在前。

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::memory::embedding::{distance_to_similarity, squared_distance};
use crate::memory::record::{MemoryRecord, RecordId, RecordKind};
use crate::memory::store::MemoryStore;
use crate::memory::tokenizer;

/// 融合权重（非负、和为 1）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f64,
    pub keyword: f64,
}

impl FusionWeights {
    pub const DEFAULT_VECTOR: f64 = 0.6;
    pub const DEFAULT_KEYWORD: f64 = 0.4;

    pub fn new(vector: f64, keyword: f64) -> Result<Self, String> {
        let w = Self { vector, keyword };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.vector.is_finite() && self.keyword.is_finite())
            || self.vector < 0.0
            || self.keyword < 0.0
        {
            return Err(format!(
                "fusion weights must be non-negative, got {}/{}",
                self.vector, self.keyword
            ));
        }
        if (self.vector + self.keyword - 1.0).abs() > 1e-6 {
            return Err(format!(
                "fusion weights must sum to 1, got {}",
                self.vector + self.keyword
            ));
        }
        Ok(())
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: Self::DEFAULT_VECTOR,
            keyword: Self::DEFAULT_KEYWORD,
        }
    }
}

/// 一条检索命中及其分数拆分
#[derive(Debug, Clone)]
pub struct ScoredRecord<'a> {
    pub record: &'a MemoryRecord,
    pub vector_similarity: f64,
    pub keyword_overlap: f64,
    pub fused_score: f64,
}

impl ScoredRecord<'_> {
    pub fn to_hit(&self) -> RetrievalHit {
        RetrievalHit {
            record_id: self.record.id,
            kind: self.record.kind,
            topic: self.record.metadata.topic.clone(),
            vector_similarity: self.vector_similarity,
            keyword_overlap: self.keyword_overlap,
            fused_score: self.fused_score,
        }
    }
}

/// 可序列化的命中摘要（进 trace）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub record_id: RecordId,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub vector_similarity: f64,
    pub keyword_overlap: f64,
    pub fused_score: f64,
}

/// 检索引擎：无状态，只持有融合权重
#[derive(Debug, Clone, Default)]
pub struct Retriever {
    weights: FusionWeights,
}

impl Retriever {
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// 返回 top_k 条 (记录, 融合分)；空存储或规范化后没有词元的查询返回空序列
    pub fn retrieve<'a>(
        &self,
        store: &'a MemoryStore,
        query: &str,
        kinds: Option<&[RecordKind]>,
        top_k: usize,
    ) -> Vec<ScoredRecord<'a>> {
        self.retrieve_where(store, query, kinds, top_k, |_| true)
    }

    /// 同 retrieve，但只对 include 接受的记录打分（在截取 top_k 之前过滤）
    pub fn retrieve_where<'a>(
        &self,
        store: &'a MemoryStore,
        query: &str,
        kinds: Option<&[RecordKind]>,
        top_k: usize,
        include: impl Fn(&MemoryRecord) -> bool,
    ) -> Vec<ScoredRecord<'a>> {
        if store.is_empty() {
            return Vec::new();
        }
        // 没有词元时关键词分无定义，查询向量全零
        let query_tokens = tokenizer::tokenize_to_set(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let top_k = top_k.max(1);
        let query_vector = store.embed(query);

        let mut scored: Vec<ScoredRecord<'a>> = store
            .entries(None)
            .filter(|(record, _)| record.kind.matches(kinds) && include(record))
            .map(|(record, keywords)| {
                let vector_similarity =
                    distance_to_similarity(squared_distance(&query_vector, &record.embedding));
                let keyword_overlap = tokenizer::keyword_overlap(&query_tokens, keywords);
                let fused_score = (self.weights.vector * vector_similarity
                    + self.weights.keyword * keyword_overlap)
                    .clamp(0.0, 1.0);
                ScoredRecord {
                    record,
                    vector_similarity,
                    keyword_overlap,
                    fused_score,
                }
            })
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(top_k);

        tracing::debug!(
            query = %query,
            candidates = store.len(),
            returned = scored.len(),
            best = scored.first().map(|s| s.fused_score).unwrap_or(0.0),
            "memory retrieve"
        );
        scored
    }
}

/// 分数降序；相同分数时时间戳新者优先，再按 ID 新者优先
fn rank_order(a: &ScoredRecord<'_>, b: &ScoredRecord<'_>) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
        .then_with(|| b.record.id.cmp(&a.record.id))
}

//! 内置模拟知识源
//!
//! 条目来自 config/knowledge.toml（编译期嵌入），也可从任意 TOML 字符串加载。
//! 查找顺序：主题精确匹配 → 子串包含 → 关键词重叠；全部落空时返回 fallback 条目。

use std::collections::HashSet;

use serde::Deserialize;

use crate::core::Finding;
use crate::memory::tokenizer;

const BUILTIN: &str = include_str!("../../config/knowledge.toml");

/// 一次查找最多返回的条目数
pub const MAX_FINDINGS: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KnowledgeEntry {
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    pub source: String,
    pub confidence: f64,
}

impl KnowledgeEntry {
    fn to_finding(&self, confidence: f64) -> Finding {
        Finding {
            topic: self.topic.clone(),
            summary: self.summary.clone(),
            details: self.details.clone(),
            source: self.source.clone(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KnowledgeFile {
    #[serde(default)]
    fallback_topic: Option<String>,
    #[serde(default = "default_fallback_confidence")]
    fallback_confidence: f64,
    #[serde(default, rename = "entry")]
    entries: Vec<KnowledgeEntry>,
}

fn default_fallback_confidence() -> f64 {
    0.6
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    keywords: Vec<HashSet<String>>,
    fallback_topic: Option<String>,
    fallback_confidence: f64,
}

impl KnowledgeBase {
    pub fn builtin() -> Result<Self, toml::de::Error> {
        Self::from_toml_str(BUILTIN)
    }

    pub fn from_toml_str(data: &str) -> Result<Self, toml::de::Error> {
        let file: KnowledgeFile = toml::from_str(data)?;
        let keywords = file
            .entries
            .iter()
            .map(|e| tokenizer::tokenize_to_set(&e.topic))
            .collect();
        Ok(Self {
            entries: file.entries,
            keywords,
            fallback_topic: file.fallback_topic.map(|t| t.to_lowercase()),
            fallback_confidence: file.fallback_confidence,
        })
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.topic.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 严格匹配（不含 fallback），按匹配质量排序，最多 MAX_FINDINGS 条
    pub fn matches(&self, topic: &str) -> Vec<&KnowledgeEntry> {
        let needle = topic.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        if let Some(exact) = self.entries.iter().find(|e| e.topic.to_lowercase() == needle) {
            return vec![exact];
        }

        let mut contained: Vec<&KnowledgeEntry> = self
            .entries
            .iter()
            .filter(|e| {
                let t = e.topic.to_lowercase();
                t.contains(&needle) || needle.contains(&t)
            })
            .collect();
        if !contained.is_empty() {
            contained.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            contained.truncate(MAX_FINDINGS);
            return contained;
        }

        let words = tokenizer::tokenize_to_set(&needle);
        let mut overlapping: Vec<(usize, &KnowledgeEntry)> = self
            .entries
            .iter()
            .zip(self.keywords.iter())
            .map(|(e, kw)| (kw.intersection(&words).count(), e))
            .filter(|(n, _)| *n > 0)
            .collect();
        overlapping.sort_by(|(na, a), (nb, b)| nb.cmp(na).then(b.confidence.total_cmp(&a.confidence)));
        overlapping
            .into_iter()
            .take(MAX_FINDINGS)
            .map(|(_, e)| e)
            .collect()
    }

    /// 查找研究结论；没有匹配时退回 fallback 条目（置信度为 fallback_confidence）
    pub fn lookup(&self, topic: &str) -> Vec<Finding> {
        let found = self.matches(topic);
        if !found.is_empty() {
            return found.into_iter().map(|e| e.to_finding(e.confidence)).collect();
        }
        self.fallback_entry()
            .map(|e| vec![e.to_finding(self.fallback_confidence)])
            .unwrap_or_default()
    }

    fn fallback_entry(&self) -> Option<&KnowledgeEntry> {
        let topic = self.fallback_topic.as_deref()?;
        self.entries.iter().find(|e| e.topic.to_lowercase() == topic)
    }
}

//! 记忆记录：conversation / knowledge / agent_state 三种类型
//!
//! 记录只追加，不修改、不删除；嵌入在写入时计算一次。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 记录 ID（mem_0, mem_1, ...），分配后稳定不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mem_{}", self.0)
    }
}

/// 记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Conversation,
    Knowledge,
    AgentState,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Conversation,
        RecordKind::Knowledge,
        RecordKind::AgentState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Conversation => "conversation",
            RecordKind::Knowledge => "knowledge",
            RecordKind::AgentState => "agent_state",
        }
    }

    /// kinds 为 None 或空切片时匹配所有类型
    pub fn matches(&self, kinds: Option<&[RecordKind]>) -> bool {
        match kinds {
            None => true,
            Some([]) => true,
            Some(kinds) => kinds.contains(self),
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录元数据：常用字段强类型，其余放 extra
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// 产出该记录的组件（controller / research / analysis ...）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    /// 原始出处（知识源名称等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RecordMetadata {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_source_agent(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = Some(agent.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// 待写入的记录（id / 时间戳 / 嵌入由存储分配）
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub content: String,
    pub metadata: RecordMetadata,
}

impl NewRecord {
    pub fn new(kind: RecordKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: RecordMetadata::default(),
        }
    }

    pub fn conversation(content: impl Into<String>) -> Self {
        Self::new(RecordKind::Conversation, content)
    }

    pub fn knowledge(content: impl Into<String>) -> Self {
        Self::new(RecordKind::Knowledge, content)
    }

    pub fn agent_state(content: impl Into<String>) -> Self {
        Self::new(RecordKind::AgentState, content)
    }

    pub fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// 参与向量化的文本：主题 + 正文
    pub(crate) fn embedding_text(&self) -> String {
        match &self.metadata.topic {
            Some(topic) => format!("{} {}", topic, self.content),
            None => self.content.clone(),
        }
    }
}

/// 已写入的记忆记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    pub metadata: RecordMetadata,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

impl MemoryRecord {
    pub fn topic(&self) -> Option<&str> {
        self.metadata.topic.as_deref()
    }
}

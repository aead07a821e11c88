//! 组件间消息信封
//!
//! 每次交换都是一条不可变的 Message：sender / recipient / 时间戳 + 按类型区分的负载。
//! 负载是 tagged union（task / response / query / store / retrieve），每种类型的形状固定，
//! 由外部日志协作方原样记录。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{RecordId, RecordKind, RecordMetadata};

/// 用户、控制器、记忆存储在消息中的固定名字
pub const USER: &str = "user";
pub const CONTROLLER: &str = "controller";
pub const MEMORY_STORE: &str = "memory_store";

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内单调递增的消息 ID（msg_1, msg_2, ...）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// 计划步骤编号（从 1 开始，按执行顺序递增）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub usize);

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step_{}", self.0)
    }
}

/// 分析步骤的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Comparison,
    TradeOffs,
    Methodology,
    Challenges,
    Synthesis,
    General,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Comparison => "comparison",
            AnalysisKind::TradeOffs => "trade_offs",
            AnalysisKind::Methodology => "methodology",
            AnalysisKind::Challenges => "challenges",
            AnalysisKind::Synthesis => "synthesis",
            AnalysisKind::General => "general",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条带出处的研究结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    pub source: String,
    pub confidence: f64,
}

/// Worker 的结果负载：摘要 + 研究结论 / 分析要点 + 置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisKind>,
    pub confidence: f64,
}

impl WorkerOutput {
    /// 「没有结果」：空摘要、零置信度（Worker 不应为此返回错误）
    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            findings: Vec::new(),
            points: Vec::new(),
            recommendation: None,
            analysis: None,
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.points.is_empty() && self.recommendation.is_none()
    }
}

/// 注入到依赖步骤 task 负载中的上游结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyResult {
    pub step: StepId,
    pub worker: String,
    pub output: WorkerOutput,
}

/// 合并进计划的记忆记录（置信度处于合并区间时）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    pub score: f64,
}

/// task：Controller → Worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub step: StepId,
    pub query: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryContext>,
}

/// response 的完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
}

/// response：Worker → Controller；失败时 output 为零置信度占位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub step: StepId,
    pub status: ResponseStatus,
    pub output: WorkerOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// query：用户 → Controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub query: String,
}

/// retrieve：Controller → 记忆存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievePayload {
    pub query: String,
    pub kinds: Vec<RecordKind>,
    pub top_k: usize,
}

/// store：Controller → 记忆存储（记录写入后发出，带已分配的 id）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePayload {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    pub metadata: RecordMetadata,
}

/// 按消息类型区分的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    Task(TaskPayload),
    Response(ResponsePayload),
    Query(QueryPayload),
    Store(StorePayload),
    Retrieve(RetrievePayload),
}

impl MessageBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Task(_) => "task",
            MessageBody::Response(_) => "response",
            MessageBody::Query(_) => "query",
            MessageBody::Store(_) => "store",
            MessageBody::Retrieve(_) => "retrieve",
        }
    }
}

/// 不可变消息：创建后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: String,
    recipient: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    body: MessageBody,
}

impl Message {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: MessageId::next(),
            sender: sender.into(),
            recipient: recipient.into(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::new(USER, CONTROLLER, MessageBody::Query(QueryPayload { query: query.into() }))
    }

    pub fn task(worker: impl Into<String>, payload: TaskPayload) -> Self {
        Self::new(CONTROLLER, worker, MessageBody::Task(payload))
    }

    pub fn response(worker: impl Into<String>, payload: ResponsePayload) -> Self {
        Self::new(worker, CONTROLLER, MessageBody::Response(payload))
    }

    pub fn retrieve(payload: RetrievePayload) -> Self {
        Self::new(CONTROLLER, MEMORY_STORE, MessageBody::Retrieve(payload))
    }

    pub fn store(payload: StorePayload) -> Self {
        Self::new(CONTROLLER, MEMORY_STORE, MessageBody::Store(payload))
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} -> {} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.id,
            self.sender,
            self.recipient,
            self.type_name()
        )
    }
}

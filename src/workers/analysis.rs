//! 分析 Worker：对上游研究结论做比较 / 权衡 / 方法 / 挑战 / 综合分析
//!
//! 输入来自 task 负载中注入的依赖结果（以及可选的合并记忆记录），
//! 每种分析类型有固定的置信度；比较至少需要两条输入。

use async_trait::async_trait;

use crate::core::{AnalysisKind, Finding, TaskPayload, WorkerError, WorkerOutput};
use crate::workers::{Worker, ANALYSIS};

/// 比较输入不足时的置信度
pub const INSUFFICIENT_COMPARISON_CONFIDENCE: f64 = 0.3;

/// 在研究结论中识别的方法名
const METHOD_NAMES: &[&str] = &[
    "DQN",
    "PPO",
    "Q-Learning",
    "Policy Gradient",
    "Actor-Critic",
    "LSTM",
    "GRU",
    "self-attention",
    "convolution",
    "backpropagation",
];

pub fn kind_confidence(kind: AnalysisKind) -> f64 {
    match kind {
        AnalysisKind::Comparison => 0.85,
        AnalysisKind::TradeOffs => 0.80,
        AnalysisKind::Methodology => 0.78,
        AnalysisKind::Challenges => 0.83,
        AnalysisKind::Synthesis => 0.82,
        AnalysisKind::General => 0.80,
    }
}

pub struct AnalysisWorker {
    name: String,
}

impl AnalysisWorker {
    pub fn new() -> Self {
        Self {
            name: ANALYSIS.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for AnalysisWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for AnalysisWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[&'static str] {
        &["compare", "trade_offs", "methodology", "challenges", "synthesize"]
    }

    async fn invoke(&self, task: &TaskPayload) -> Result<WorkerOutput, WorkerError> {
        let kind = task.analysis.unwrap_or(AnalysisKind::General);
        let inputs = collect_inputs(task);
        tracing::debug!(worker = %self.name, kind = %kind, inputs = inputs.len(), "analysis");

        let mut out = if inputs.is_empty() {
            WorkerOutput::empty("No data to analyze")
        } else {
            analyze(kind, &inputs)
        };
        out.analysis = Some(kind);
        Ok(out)
    }
}

/// 依赖结果中的研究结论 + 合并进来的记忆记录
fn collect_inputs(task: &TaskPayload) -> Vec<Finding> {
    let mut inputs: Vec<Finding> = task
        .dependencies
        .iter()
        .flat_map(|d| d.output.findings.iter().cloned())
        .collect();
    if let Some(mem) = &task.memory {
        inputs.push(Finding {
            topic: "memory".to_string(),
            summary: first_line(&mem.content).to_string(),
            details: mem.content.clone(),
            source: mem.record_id.to_string(),
            confidence: mem.score,
        });
    }
    inputs
}

fn analyze(kind: AnalysisKind, inputs: &[Finding]) -> WorkerOutput {
    let mut out = WorkerOutput::empty("");
    out.confidence = kind_confidence(kind);
    match kind {
        AnalysisKind::Comparison => {
            if inputs.len() < 2 {
                out.summary = "Insufficient data for comparison".to_string();
                out.confidence = INSUFFICIENT_COMPARISON_CONFIDENCE;
                out.points = inputs.iter().map(topic_summary).collect();
                return out;
            }
            out.summary = format!("Compared {} items", inputs.len());
            out.points = inputs.iter().map(topic_summary).collect();
            if let Some(best) = inputs
                .iter()
                .reduce(|best, f| if f.confidence > best.confidence { f } else { best })
            {
                out.recommendation = Some(format!(
                    "Based on the available information, {} appears best suited to this question.",
                    best.topic
                ));
            }
        }
        AnalysisKind::TradeOffs => {
            out.summary = format!("Trade-offs across {} item(s)", inputs.len());
            out.points = inputs
                .iter()
                .map(|f| match sentence_after(&f.details, "trade-offs:") {
                    Some(sentence) => match sentence.split_once(" but ") {
                        Some((pro, con)) => format!(
                            "{}: advantages: {}; disadvantages: {}",
                            f.topic,
                            pro.trim(),
                            con.trim()
                        ),
                        None => format!("{}: {}", f.topic, sentence),
                    },
                    None => format!("{}: no explicit trade-offs recorded", f.topic),
                })
                .collect();
        }
        AnalysisKind::Methodology => {
            out.summary = format!("Methods identified across {} item(s)", inputs.len());
            out.points = inputs
                .iter()
                .map(|f| {
                    let text = format!("{} {}", f.summary, f.details).to_ascii_lowercase();
                    let methods: Vec<&str> = METHOD_NAMES
                        .iter()
                        .copied()
                        .filter(|m| text.contains(&m.to_ascii_lowercase()))
                        .collect();
                    if methods.is_empty() {
                        topic_summary(f)
                    } else {
                        format!("{}: {}", f.topic, methods.join(", "))
                    }
                })
                .collect();
        }
        AnalysisKind::Challenges => {
            out.summary = format!("Challenges across {} item(s)", inputs.len());
            out.points = inputs
                .iter()
                .map(|f| match sentence_after(&f.details, "challenges include") {
                    Some(sentence) => {
                        let items: Vec<&str> = sentence
                            .split(',')
                            .map(|s| s.trim().trim_start_matches("and ").trim())
                            .filter(|s| !s.is_empty())
                            .take(3)
                            .collect();
                        format!("{}: {}", f.topic, items.join("; "))
                    }
                    None => format!("{}: no specific challenges recorded", f.topic),
                })
                .collect();
        }
        AnalysisKind::Synthesis => {
            let mut sources: Vec<&str> = inputs.iter().map(|f| f.source.as_str()).collect();
            sources.sort_unstable();
            sources.dedup();
            out.summary = format!(
                "Synthesized {} finding(s) from {} source(s)",
                inputs.len(),
                sources.len()
            );
            out.points = inputs.iter().map(topic_summary).collect();
        }
        AnalysisKind::General => {
            out.summary = format!("Analyzed {} information source(s)", inputs.len());
            out.points = inputs.iter().map(topic_summary).collect();
        }
    }
    out
}

fn topic_summary(f: &Finding) -> String {
    format!("{}: {}", f.topic, f.summary)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

/// marker 之后到句号为止的文本（大小写不敏感）
fn sentence_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.to_ascii_lowercase().find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find('.').unwrap_or(rest.len());
    let sentence = rest[..end].trim();
    (!sentence.is_empty()).then_some(sentence)
}
